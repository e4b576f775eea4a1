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

//! mkdir/rmdir against tags and memberships, including the cascade rules.

mod common;

use common::{assert_errno, TestHelper, TestResult};
use nix::errno::Errno::{EEXIST, EINVAL, ENODATA, ENOENT, EPERM};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;
use std::path::Path;

#[test]
fn test_mktag() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    assert_eq!(
        th.readdir_names("/")?,
        vec![".tagdir_entinfo", "@work"]
    );
    Ok(())
}

#[test]
fn test_mktag_duplicate() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    assert_errno(th.mkdir("/@work"), EEXIST);
    Ok(())
}

#[test]
fn test_mktag_bad_name() {
    let th = TestHelper::new();
    assert_errno(th.mkdir("/@Work"), EINVAL);
    assert_errno(th.mkdir("/@tag2"), EINVAL);
}

#[test]
fn test_mktag_not_nested() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    assert_errno(th.mkdir("/@work/@nested"), EPERM);
    Ok(())
}

#[test]
fn test_mkdir_unknown_entity() -> TestResult {
    // entities come in through the side channel only
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    assert_errno(th.mkdir("/@work/report"), ENOENT);
    Ok(())
}

#[test]
fn test_tagging_through_mkdir() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    th.mkdir("/@urgent")?;
    th.register("report", Path::new("/abs/report.txt"), &["urgent"]);

    th.mkdir("/@work/report")?;
    assert_eq!(th.readdir_names("/@work")?, vec!["report"]);
    assert_eq!(th.readdir_names("/@work/@urgent")?, vec!["report"]);

    let (_path, tags) = th.registration("report")?;
    assert_eq!(tags, vec!["urgent", "work"]);
    Ok(())
}

#[test]
fn test_tagging_is_idempotent() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    th.register("report", Path::new("/abs/report.txt"), &["work"]);

    th.mkdir("/@work/report")?;
    th.mkdir("/@work/report")?;

    let (_path, tags) = th.registration("report")?;
    assert_eq!(tags, vec!["work"]);
    assert_eq!(th.readdir_names("/@work")?, vec!["report"]);
    Ok(())
}

#[test]
fn test_tagging_requires_existing_chain() -> TestResult {
    let th = TestHelper::new();
    th.register("report", Path::new("/abs/report.txt"), &["work"]);
    assert_errno(th.mkdir("/@missing/report"), ENOENT);
    Ok(())
}

#[test]
fn test_untag_keeps_entity_with_remaining_tags() -> TestResult {
    let th = TestHelper::new();
    th.register("report", Path::new("/abs/report.txt"), &["work", "urgent"]);

    th.rmdir("/@work/report")?;

    assert_errno(th.access("/@work/report"), ENOENT);
    th.access("/@urgent/report")?;
    let (_path, tags) = th.registration("report")?;
    assert_eq!(tags, vec!["urgent"]);
    Ok(())
}

#[test]
fn test_untag_last_tag_deletes_entity() -> TestResult {
    let th = TestHelper::new();
    th.register("report", Path::new("/abs/report.txt"), &["work", "urgent"]);

    th.rmdir("/@work/report")?;
    th.rmdir("/@urgent/report")?;

    assert_errno(th.registration("report"), ENODATA);
    // the tags themselves stay
    assert_eq!(
        th.readdir_names("/")?,
        vec![".tagdir_entinfo", "@urgent", "@work"]
    );
    Ok(())
}

#[test]
fn test_untag_whole_chain_at_once() -> TestResult {
    let th = TestHelper::new();
    th.register("report", Path::new("/abs/report.txt"), &["work", "urgent"]);

    th.rmdir("/@work/@urgent/report")?;
    assert_errno(th.registration("report"), ENODATA);
    Ok(())
}

#[test]
fn test_untag_not_reachable() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    th.register("report", Path::new("/abs/report.txt"), &["urgent"]);
    assert_errno(th.rmdir("/@work/report"), ENOENT);
    Ok(())
}

#[test]
fn test_rmtag_unknown() {
    let th = TestHelper::new();
    assert_errno(th.rmdir("/@nope"), ENOENT);
}

#[test]
fn test_rmtag_cascades() -> TestResult {
    let th = TestHelper::new();
    th.register("lonely", Path::new("/abs/lonely"), &["work"]);
    th.register("shared", Path::new("/abs/shared"), &["work", "urgent"]);

    th.rmdir("/@work")?;

    // the tag is gone from the root, the orphaned entity is gone entirely,
    // the shared one lives on through its other tag
    assert_eq!(
        th.readdir_names("/")?,
        vec![".tagdir_entinfo", "@urgent"]
    );
    assert_errno(th.registration("lonely"), ENODATA);
    let (_path, tags) = th.registration("shared")?;
    assert_eq!(tags, vec!["urgent"]);
    Ok(())
}

#[test]
fn test_rmdir_root_and_reserved_file() {
    let th = TestHelper::new();
    assert_errno(th.rmdir("/"), EPERM);
    assert_errno(th.rmdir("/.tagdir_entinfo"), EPERM);
}

/// The root listing is exactly the live tag set, no matter what sequence of
/// creates and removes got us there.
#[test]
fn test_root_listing_tracks_tag_set() -> TestResult {
    let th = TestHelper::new();
    let mut rng = rand::thread_rng();
    let universe = ["alpha", "beta", "gamma", "delta"];
    let mut model: BTreeSet<String> = BTreeSet::new();

    for _round in 0..50 {
        let tag = universe.choose(&mut rng).unwrap();
        let path = format!("/@{}", tag);

        if rng.gen_bool(0.5) {
            match th.mkdir(&path) {
                Ok(()) => assert!(model.insert(tag.to_string())),
                Err(e) => {
                    assert_eq!(e.errno, EEXIST);
                    assert!(model.contains(*tag));
                }
            }
        } else {
            match th.rmdir(&path) {
                Ok(()) => assert!(model.remove(*tag)),
                Err(e) => {
                    assert_eq!(e.errno, ENOENT);
                    assert!(!model.contains(*tag));
                }
            }
        }

        let mut expected: Vec<String> = model.iter().map(|tag| format!("@{}", tag)).collect();
        expected.push(".tagdir_entinfo".to_string());
        expected.sort();
        assert_eq!(th.readdir_names("/")?, expected);
    }
    Ok(())
}
