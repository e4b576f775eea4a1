/*
 * Tagdir
 * Copyright (C) 2021 The Tagdir authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

//! The reconciler between entity rows and real-path events.

mod common;

use common::{assert_errno, TestHelper, TestResult};
use nix::errno::Errno::ENODATA;
use notify::DebouncedEvent;
use std::path::PathBuf;
use tagdir::watch::{apply_event, Applied, PathWatcher};

#[test]
fn test_rename_repoints_the_entity() -> TestResult {
    let th = TestHelper::new();
    th.register("report", &PathBuf::from("/abs/old.txt"), &["work"]);

    let mut conn = tagdir::sql::get_conn(&th.db_path)?;
    let applied = apply_event(
        &mut conn,
        &DebouncedEvent::Rename(PathBuf::from("/abs/old.txt"), PathBuf::from("/abs/new.txt")),
    )?;
    assert_eq!(
        applied,
        Applied::Repointed {
            from: PathBuf::from("/abs/old.txt"),
            to: PathBuf::from("/abs/new.txt"),
        }
    );

    // still reachable under the same name, now pointing at the new location
    let (path, tags) = th.registration("report")?;
    assert_eq!(path, "/abs/new.txt");
    assert_eq!(tags, vec!["work"]);
    Ok(())
}

#[test]
fn test_removal_purges_the_entity() -> TestResult {
    let th = TestHelper::new();
    th.register("report", &PathBuf::from("/abs/report.txt"), &["work"]);

    let mut conn = tagdir::sql::get_conn(&th.db_path)?;
    let applied = apply_event(
        &mut conn,
        &DebouncedEvent::Remove(PathBuf::from("/abs/report.txt")),
    )?;
    assert_eq!(applied, Applied::Purged(PathBuf::from("/abs/report.txt")));

    assert_errno(th.registration("report"), ENODATA);
    // the tag itself persists
    assert_eq!(th.readdir_names("/")?, vec![".tagdir_entinfo", "@work"]);
    Ok(())
}

#[test]
fn test_spurious_events_are_ignored() -> TestResult {
    let th = TestHelper::new();
    th.register("report", &PathBuf::from("/abs/report.txt"), &["work"]);

    let mut conn = tagdir::sql::get_conn(&th.db_path)?;

    // events for paths we don't track
    assert_eq!(
        apply_event(
            &mut conn,
            &DebouncedEvent::Remove(PathBuf::from("/abs/unrelated"))
        )?,
        Applied::Ignored
    );
    assert_eq!(
        apply_event(
            &mut conn,
            &DebouncedEvent::Rename(PathBuf::from("/abs/a"), PathBuf::from("/abs/b"))
        )?,
        Applied::Ignored
    );
    // event kinds we don't care about
    assert_eq!(
        apply_event(
            &mut conn,
            &DebouncedEvent::Write(PathBuf::from("/abs/report.txt"))
        )?,
        Applied::Ignored
    );

    let (path, _tags) = th.registration("report")?;
    assert_eq!(path, "/abs/report.txt");
    Ok(())
}

#[test]
fn test_replayed_events_are_idempotent() -> TestResult {
    let th = TestHelper::new();
    th.register("report", &PathBuf::from("/abs/report.txt"), &["work"]);

    let mut conn = tagdir::sql::get_conn(&th.db_path)?;
    let event = DebouncedEvent::Remove(PathBuf::from("/abs/report.txt"));

    assert_eq!(
        apply_event(&mut conn, &event)?,
        Applied::Purged(PathBuf::from("/abs/report.txt"))
    );
    // at-least-once delivery means the same event can come around again
    assert_eq!(apply_event(&mut conn, &event)?, Applied::Ignored);
    Ok(())
}

/// End to end with a live inotify subscription: rename and delete a real
/// file and let the worker reconcile the store.
#[test]
fn test_live_watcher() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("watched");
    let old_path = dir.join("report.txt");
    std::fs::write(&old_path, "content")?;

    th.register("report", &old_path, &["work"]);

    // the worker subscribes to every known entity path on startup
    let watcher = PathWatcher::spawn(th.db_path.clone())?;
    std::thread::sleep(std::time::Duration::from_millis(200));

    // renames land with the debounce delay, so give the worker some room
    let new_path = dir.join("renamed.txt");
    std::fs::rename(&old_path, &new_path)?;
    std::thread::sleep(std::time::Duration::from_millis(2000));

    let (path, _tags) = th.registration("report")?;
    assert_eq!(path, new_path.to_string_lossy());

    std::fs::remove_file(&new_path)?;
    std::thread::sleep(std::time::Duration::from_millis(2000));

    assert_errno(th.registration("report"), ENODATA);

    watcher.stop();
    Ok(())
}
