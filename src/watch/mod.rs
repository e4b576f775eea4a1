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

//! The background reconciler between the entity table and the real
//! filesystem.  One worker, message passing in and store updates out; every
//! update is idempotent, so replayed or duplicated events are harmless.

use crate::common::err::{TagdirError, TagdirResult};
use crate::sql;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use notify::{watcher, DebouncedEvent, RecommendedWatcher, RecursiveMode, Watcher};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const WATCH_TAG: &str = "watch";

const DEBOUNCE_MS: u64 = 500;

pub enum WatchRequest {
    Watch(PathBuf),
    Unwatch(PathBuf),
    Shutdown,
}

/// What a single event did to the store.
#[derive(Debug, PartialEq, Eq)]
pub enum Applied {
    Repointed { from: PathBuf, to: PathBuf },
    Purged(PathBuf),
    Ignored,
}

/// The filesystem side's door into the watcher.  Cheap to clone.
#[derive(Clone)]
pub struct WatcherHandle {
    control_tx: Sender<WatchRequest>,
}

impl WatcherHandle {
    pub fn watch(&self, path: PathBuf) {
        if self.control_tx.send(WatchRequest::Watch(path)).is_err() {
            warn!(target: WATCH_TAG, "Watcher is gone, dropping watch request");
        }
    }

    pub fn unwatch(&self, path: PathBuf) {
        if self.control_tx.send(WatchRequest::Unwatch(path)).is_err() {
            warn!(target: WATCH_TAG, "Watcher is gone, dropping unwatch request");
        }
    }
}

/// Owns the worker thread.  `spawn` before the handlers are bound, `stop`
/// after the mount goes away.
pub struct PathWatcher {
    handle: WatcherHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl PathWatcher {
    pub fn spawn(db_path: PathBuf) -> TagdirResult<Self> {
        let conn = sql::get_conn(&db_path)?;

        let (control_tx, control_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        // notify only talks std mpsc, so a forwarder bridges its events into
        // a crossbeam channel we can select over.  it exits once the watcher
        // is dropped and the raw sender disconnects.
        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let fs_watcher = watcher(raw_tx, Duration::from_millis(DEBOUNCE_MS))
            .map_err(|e| TagdirError::Other(Box::new(e)))?;

        thread::Builder::new()
            .name("tagdir_watch_bridge".to_string())
            .spawn(move || {
                for event in raw_rx.iter() {
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                debug!(target: WATCH_TAG, "Event bridge finished");
            })
            .map_err(TagdirError::from)?;

        let worker = thread::Builder::new()
            .name("tagdir_watch".to_string())
            .spawn(move || {
                run_worker(conn, fs_watcher, control_rx, event_rx);
            })
            .map_err(TagdirError::from)?;

        Ok(Self {
            handle: WatcherHandle { control_tx },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }

    /// Signals the worker and joins it.
    pub fn stop(mut self) {
        info!(target: WATCH_TAG, "Stopping watcher");
        let _ = self.handle.control_tx.send(WatchRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(target: WATCH_TAG, "Watcher worker panicked");
            }
        }
    }
}

/// Renames only surface as paired `Rename(from, to)` events through a watch
/// on the containing directory, so subscriptions go on entity paths' parents.
/// Parents shared by several entities are refcounted.
struct Subscriptions {
    fs_watcher: RecommendedWatcher,
    dir_counts: HashMap<PathBuf, usize>,
}

impl Subscriptions {
    fn new(fs_watcher: RecommendedWatcher) -> Self {
        Self {
            fs_watcher,
            dir_counts: HashMap::new(),
        }
    }

    fn track(&mut self, entity_path: &Path) {
        let dir = match entity_path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => return,
        };
        let count = self.dir_counts.entry(dir.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(target: WATCH_TAG, "Watching {}", dir.display());
            if let Err(e) = self.fs_watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!(
                    target: WATCH_TAG,
                    "Couldn't watch {}: {:?}",
                    dir.display(),
                    e
                );
            }
        }
    }

    fn untrack(&mut self, entity_path: &Path) {
        let dir = match entity_path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => return,
        };
        match self.dir_counts.get_mut(&dir) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.dir_counts.remove(&dir);
                debug!(target: WATCH_TAG, "Unwatching {}", dir.display());
                if let Err(e) = self.fs_watcher.unwatch(&dir) {
                    debug!(
                        target: WATCH_TAG,
                        "Couldn't unwatch {}: {:?}",
                        dir.display(),
                        e
                    );
                }
            }
            None => {}
        }
    }
}

fn run_worker(
    mut conn: Connection,
    fs_watcher: RecommendedWatcher,
    control_rx: Receiver<WatchRequest>,
    event_rx: Receiver<DebouncedEvent>,
) {
    info!(target: WATCH_TAG, "Watcher worker starting");

    let mut subs = Subscriptions::new(fs_watcher);

    // every known entity path gets a subscription up front
    match sql::get_all_entity_paths(&conn) {
        Ok(paths) => {
            for path in paths {
                subs.track(Path::new(&path));
            }
        }
        Err(e) => error!(target: WATCH_TAG, "Couldn't list entity paths: {:?}", e),
    }

    loop {
        crossbeam::select! {
            recv(control_rx) -> msg => match msg {
                Ok(WatchRequest::Watch(path)) => subs.track(&path),
                Ok(WatchRequest::Unwatch(path)) => subs.untrack(&path),
                Ok(WatchRequest::Shutdown) | Err(_) => break,
            },
            recv(event_rx) -> event => match event {
                Ok(event) => match apply_event(&mut conn, &event) {
                    Ok(Applied::Repointed { from, to }) => {
                        subs.untrack(&from);
                        subs.track(&to);
                    }
                    Ok(Applied::Purged(path)) => {
                        subs.untrack(&path);
                    }
                    Ok(Applied::Ignored) => {}
                    // the filesystem stays up no matter what the watcher hits
                    Err(e) => error!(target: WATCH_TAG, "Error applying {:?}: {:?}", event, e),
                },
                Err(_) => break,
            },
        }
    }

    info!(target: WATCH_TAG, "Watcher worker done");
}

/// Maps one debounced event onto the store.  Renames repoint the entity row,
/// removals purge it, everything else is noise.
pub fn apply_event(conn: &mut Connection, event: &DebouncedEvent) -> TagdirResult<Applied> {
    match event {
        DebouncedEvent::Rename(from, to) => {
            let now = sql::get_now_secs();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
            let changed = sql::update_entity_path(
                &tx,
                &from.to_string_lossy(),
                &to.to_string_lossy(),
                now,
            )?;
            tx.commit()?;
            if changed {
                Ok(Applied::Repointed {
                    from: from.clone(),
                    to: to.clone(),
                })
            } else {
                Ok(Applied::Ignored)
            }
        }
        DebouncedEvent::Remove(path) | DebouncedEvent::NoticeRemove(path) => {
            let now = sql::get_now_secs();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
            let purged = sql::remove_entity_by_path(&tx, &path.to_string_lossy(), now)?;
            tx.commit()?;
            if purged {
                Ok(Applied::Purged(path.clone()))
            } else {
                Ok(Applied::Ignored)
            }
        }
        _ => Ok(Applied::Ignored),
    }
}
