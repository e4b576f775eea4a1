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

use super::err::TagdirShimError;
use crate::common;
use crate::common::types::VirtualPath;
use crate::fuse::util;
use crate::sql;
use crate::sql::tpool::ThreadConnPool;
use crate::sql::types::Entity;
use crate::watch::WatcherHandle;
use fuse_shim::err::FuseErrno;
use fuse_shim::{fuse_file_info, mode_t, off_t, stat, statvfs, timespec};
use fuse_shim::{Filesystem, FuseResult, Request};
use log::{debug, info};
use nix::errno::Errno::{EEXIST, EINVAL, ENOENT, EPERM};
use rusqlite::{Connection, TransactionBehavior};
use std::fs::OpenOptions;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const OP_TAG: &str = "tagdir_op";

mod getattr;
mod readdir;
mod xattr;

/// Where a chmod/chown/utimens lands after resolution: an attr row we own,
/// or a real path we forward to.
enum AttrNode {
    Stored(i64),
    Host(PathBuf),
}

pub struct TagdirFilesystem {
    conn_pool: Arc<ThreadConnPool>,
    watcher: Option<WatcherHandle>,
}

impl TagdirFilesystem {
    #[must_use]
    pub fn new(conn_pool: ThreadConnPool, watcher: Option<WatcherHandle>) -> TagdirFilesystem {
        TagdirFilesystem {
            conn_pool: Arc::new(conn_pool),
            watcher,
        }
    }

    fn notify_watch(&self, path: &str) {
        if let Some(watcher) = &self.watcher {
            watcher.watch(PathBuf::from(path));
        }
    }

    fn notify_unwatch(&self, path: &str) {
        if let Some(watcher) = &self.watcher {
            watcher.unwatch(PathBuf::from(path));
        }
    }

    /// The real location a resolved entity path points at.
    fn real_path(entity: &Entity, rest: &Path) -> PathBuf {
        if rest.as_os_str().is_empty() {
            PathBuf::from(&entity.path)
        } else {
            Path::new(&entity.path).join(rest)
        }
    }

    /// The entity named `name`, provided its tag set covers `tags`.  A
    /// tagless entity path is never addressable.
    fn resolve_entity(
        &self,
        conn: &Connection,
        tags: &[String],
        name: &str,
    ) -> FuseResult<Entity> {
        if tags.is_empty() {
            debug!(target: OP_TAG, "Entity {} addressed without tags", name);
            return Err(ENOENT.into());
        }
        match sql::get_entity_with_tags(conn, name, tags).map_err(TagdirShimError::from)? {
            Some(entity) => Ok(entity),
            None => {
                debug!(
                    target: OP_TAG,
                    "Entity {} not reachable through {:?}", name, tags
                );
                Err(ENOENT.into())
            }
        }
    }

    fn chain_exists(&self, conn: &Connection, tags: &[String]) -> FuseResult<()> {
        if sql::all_tags_exist(conn, tags).map_err(TagdirShimError::from)? {
            Ok(())
        } else {
            Err(ENOENT.into())
        }
    }

    /// Resolves the owning attr row of a synthetic node, or the host path
    /// for anything inside an entity.
    fn resolve_attr_node(&self, conn: &Connection, path: &Path) -> FuseResult<AttrNode> {
        match VirtualPath::parse(path) {
            VirtualPath::Root => Ok(AttrNode::Stored(common::constants::ROOT_ATTR_ID)),
            VirtualPath::Entinfo => Ok(AttrNode::Stored(common::constants::ENTINFO_ATTR_ID)),
            VirtualPath::TagChain(tags) => {
                self.chain_exists(conn, &tags)?;
                let last = tags.last().expect("chain can't be empty");
                match sql::get_tag(conn, last).map_err(TagdirShimError::from)? {
                    Some(tag) => Ok(AttrNode::Stored(tag.attr.id)),
                    None => Err(ENOENT.into()),
                }
            }
            VirtualPath::Entity { tags, name, rest } => {
                let entity = self.resolve_entity(conn, &tags, &name)?;
                if rest.as_os_str().is_empty() {
                    Ok(AttrNode::Stored(entity.attr.id))
                } else {
                    Ok(AttrNode::Host(Self::real_path(&entity, &rest)))
                }
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
        }
    }
}

impl Filesystem for TagdirFilesystem {
    /// Sets up our thread-local request id based on a global atomic request counter
    fn init_request_id(&self) {
        common::log::REQUEST_ID.with(|f| {
            let req_id = common::log::REQ_COUNTER.fetch_add(1, Ordering::SeqCst);
            *f.borrow_mut() = req_id;
        });
    }

    fn access(&self, _req: &Request, path: &Path, mask: i32) -> FuseResult<()> {
        info!(target: OP_TAG, "Checking access to {:?}", path);

        match VirtualPath::parse(path) {
            VirtualPath::Root | VirtualPath::Entinfo => Ok(()),
            VirtualPath::TagChain(tags) => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                self.chain_exists(&(*conn).borrow(), &tags)
            }
            VirtualPath::Entity { tags, name, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                    if rest.as_os_str().is_empty() {
                        return Ok(());
                    }
                    Self::real_path(&entity, &rest)
                };
                util::host_access(&real, mask).map_err(FuseErrno::from)
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
        }
    }

    fn getattr(&self, req: &Request, path: &Path) -> FuseResult<stat> {
        self.getattr_impl(req, path)
    }

    fn readdir(
        &self,
        req: &Request,
        path: &Path,
    ) -> FuseResult<Box<dyn Iterator<Item = fuse_shim::FileEntry>>> {
        self.readdir_impl(req, path)
    }

    fn readlink(&self, _req: &Request, path: &Path) -> FuseResult<PathBuf> {
        info!(target: OP_TAG, "Reading link {:?}", path);

        match VirtualPath::parse(path) {
            VirtualPath::Entity { tags, name, rest } => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;

                if rest.as_os_str().is_empty() {
                    // the entity node itself reads as a link to its real path
                    Ok(PathBuf::from(entity.path))
                } else {
                    let real = Self::real_path(&entity, &rest);
                    Ok(std::fs::read_link(&real)?)
                }
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
            // root, tag dirs and the reserved file are not links
            _ => Err(EINVAL.into()),
        }
    }

    fn mkdir(&self, req: &Request, path: &Path, mode: mode_t) -> FuseResult<()> {
        info!(target: OP_TAG, "Making dir {}", path.display());

        match VirtualPath::parse(path) {
            VirtualPath::Root | VirtualPath::Entinfo => Err(EEXIST.into()),
            VirtualPath::TagChain(tags) => {
                if tags.len() > 1 {
                    // tags are only creatable at the top level
                    return Err(EPERM.into());
                }
                let name = &tags[0];

                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let mut real_conn = (*conn).borrow_mut();

                if sql::tag_exists(&real_conn, name).map_err(TagdirShimError::from)? {
                    debug!(target: OP_TAG, "Tag {} already exists", name);
                    return Err(EEXIST.into());
                }

                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                sql::create_tag(&tx, name, req.uid, req.gid, sql::get_now_secs())
                    .map_err(TagdirShimError::from)?;
                tx.commit().map_err(TagdirShimError::from)?;
                Ok(())
            }
            VirtualPath::Entity { tags, name, rest } => {
                if rest.as_os_str().is_empty() {
                    if tags.is_empty() {
                        return Err(EPERM.into());
                    }

                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let mut real_conn = (*conn).borrow_mut();

                    self.chain_exists(&real_conn, &tags)?;

                    // unknown entities are registered through the side
                    // channel, never implicitly here
                    let entity = match sql::get_entity(&real_conn, &name)
                        .map_err(TagdirShimError::from)?
                    {
                        Some(entity) => entity,
                        None => return Err(ENOENT.into()),
                    };

                    let tx = real_conn
                        .transaction_with_behavior(TransactionBehavior::Exclusive)
                        .map_err(TagdirShimError::from)?;
                    sql::add_taggings(&tx, entity.id, &tags, sql::get_now_secs())
                        .map_err(TagdirShimError::from)?;
                    tx.commit().map_err(TagdirShimError::from)?;
                    Ok(())
                } else {
                    let real = {
                        let conn_lock = self.conn_pool.get_conn();
                        let conn = conn_lock.lock();
                        let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                        Self::real_path(&entity, &rest)
                    };
                    let mut builder = std::fs::DirBuilder::new();
                    builder.mode(mode);
                    builder.create(&real)?;
                    Ok(())
                }
            }
            VirtualPath::Invalid => Err(EINVAL.into()),
        }
    }

    fn rmdir(&self, _req: &Request, path: &Path) -> FuseResult<()> {
        info!(target: OP_TAG, "Removing dir {}", path.display());

        match VirtualPath::parse(path) {
            VirtualPath::Root | VirtualPath::Entinfo => Err(EPERM.into()),
            VirtualPath::TagChain(tags) => {
                if tags.len() > 1 {
                    return Err(EPERM.into());
                }

                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let mut real_conn = (*conn).borrow_mut();

                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                let purged = sql::remove_tag(&tx, &tags[0], sql::get_now_secs())
                    .map_err(TagdirShimError::from)?;
                match purged {
                    Some(orphaned_paths) => {
                        tx.commit().map_err(TagdirShimError::from)?;
                        for orphan in orphaned_paths {
                            self.notify_unwatch(&orphan);
                        }
                        Ok(())
                    }
                    None => Err(ENOENT.into()),
                }
            }
            VirtualPath::Entity { tags, name, rest } => {
                if rest.as_os_str().is_empty() {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let mut real_conn = (*conn).borrow_mut();

                    let entity = self.resolve_entity(&real_conn, &tags, &name)?;

                    let tx = real_conn
                        .transaction_with_behavior(TransactionBehavior::Exclusive)
                        .map_err(TagdirShimError::from)?;
                    let survived =
                        sql::remove_taggings(&tx, &entity, &tags, sql::get_now_secs())
                            .map_err(TagdirShimError::from)?;
                    tx.commit().map_err(TagdirShimError::from)?;

                    if !survived {
                        self.notify_unwatch(&entity.path);
                    }
                    Ok(())
                } else {
                    let real = {
                        let conn_lock = self.conn_pool.get_conn();
                        let conn = conn_lock.lock();
                        let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                        Self::real_path(&entity, &rest)
                    };
                    std::fs::remove_dir(&real)?;
                    Ok(())
                }
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
        }
    }

    fn unlink(&self, _req: &Request, path: &Path) -> FuseResult<()> {
        info!(target: OP_TAG, "Unlinking {}", path.display());

        match VirtualPath::parse(path) {
            VirtualPath::Entity { tags, name, rest } => {
                if rest.as_os_str().is_empty() {
                    // untagging goes through rmdir, never unlink
                    return Err(EPERM.into());
                }
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                    Self::real_path(&entity, &rest)
                };
                std::fs::remove_file(&real)?;
                Ok(())
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(EPERM.into()),
        }
    }

    fn rename(&self, _req: &Request, src: &Path, dst: &Path) -> FuseResult<()> {
        info!(
            target: OP_TAG,
            "Renaming {} to {}",
            src.display(),
            dst.display()
        );

        match (VirtualPath::parse(src), VirtualPath::parse(dst)) {
            (
                VirtualPath::Entity {
                    tags: src_tags,
                    name: src_name,
                    rest: src_rest,
                },
                VirtualPath::Entity {
                    tags: dst_tags,
                    name: dst_name,
                    rest: dst_rest,
                },
            ) if !src_rest.as_os_str().is_empty() && !dst_rest.as_os_str().is_empty() => {
                let (src_real, dst_real) = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let real_conn = (*conn).borrow();
                    let src_entity = self.resolve_entity(&real_conn, &src_tags, &src_name)?;
                    let dst_entity = self.resolve_entity(&real_conn, &dst_tags, &dst_name)?;
                    (
                        Self::real_path(&src_entity, &src_rest),
                        Self::real_path(&dst_entity, &dst_rest),
                    )
                };
                std::fs::rename(&src_real, &dst_real)?;
                Ok(())
            }
            (VirtualPath::Invalid, _) | (_, VirtualPath::Invalid) => Err(ENOENT.into()),
            // moving nodes across the synthetic structure would change tag or
            // entity identity behind the store's back
            _ => Err(EPERM.into()),
        }
    }

    fn chmod(&self, _req: &Request, path: &Path, mode: mode_t) -> FuseResult<()> {
        info!(target: OP_TAG, "chmod {:o} on {:?}", mode, path);

        let conn_lock = self.conn_pool.get_conn();
        let conn = conn_lock.lock();
        let mut real_conn = (*conn).borrow_mut();

        match self.resolve_attr_node(&real_conn, path)? {
            AttrNode::Stored(attr_id) => {
                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                sql::set_attr_mode(&tx, attr_id, mode, sql::get_now_secs())
                    .map_err(TagdirShimError::from)?;
                tx.commit().map_err(TagdirShimError::from)?;
                Ok(())
            }
            AttrNode::Host(real) => {
                util::host_chmod(&real, mode)?;
                Ok(())
            }
        }
    }

    fn chown(
        &self,
        _req: &Request,
        path: &Path,
        uid: fuse_shim::uid_t,
        gid: fuse_shim::gid_t,
    ) -> FuseResult<()> {
        info!(target: OP_TAG, "chown {}:{} on {:?}", uid, gid, path);

        let conn_lock = self.conn_pool.get_conn();
        let conn = conn_lock.lock();
        let mut real_conn = (*conn).borrow_mut();

        match self.resolve_attr_node(&real_conn, path)? {
            AttrNode::Stored(attr_id) => {
                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                sql::set_attr_owner(&tx, attr_id, uid, gid, sql::get_now_secs())
                    .map_err(TagdirShimError::from)?;
                tx.commit().map_err(TagdirShimError::from)?;
                Ok(())
            }
            AttrNode::Host(real) => {
                util::host_chown(&real, uid, gid)?;
                Ok(())
            }
        }
    }

    fn utimens(
        &self,
        _req: &Request,
        path: &Path,
        atime: timespec,
        mtime: timespec,
    ) -> FuseResult<()> {
        info!(target: OP_TAG, "utimens on {:?}", path);

        let conn_lock = self.conn_pool.get_conn();
        let conn = conn_lock.lock();
        let mut real_conn = (*conn).borrow_mut();

        match self.resolve_attr_node(&real_conn, path)? {
            AttrNode::Stored(attr_id) => {
                let attr = sql::get_attr(&real_conn, attr_id)
                    .map_err(TagdirShimError::from)?
                    .ok_or_else(|| FuseErrno::from(ENOENT))?;

                let now = sql::get_now_secs();
                let new_atime = resolve_utime(&atime, attr.atime, now);
                let new_mtime = resolve_utime(&mtime, attr.mtime, now);

                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                sql::set_attr_times(&tx, attr_id, new_atime, new_mtime)
                    .map_err(TagdirShimError::from)?;
                tx.commit().map_err(TagdirShimError::from)?;
                Ok(())
            }
            AttrNode::Host(real) => {
                util::host_utimens(&real, atime, mtime)?;
                Ok(())
            }
        }
    }

    fn truncate(&self, _req: &Request, path: &Path, offset: off_t) -> FuseResult<()> {
        info!(target: OP_TAG, "Truncating {:?}, offset: {}", path, offset);

        match VirtualPath::parse(path) {
            VirtualPath::Entity { tags, name, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                    Self::real_path(&entity, &rest)
                };
                util::truncate(&real, offset).map_err(FuseErrno::from)?;
                Ok(())
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(EINVAL.into()),
        }
    }

    fn create(&self, _req: &Request, path: &Path, mode: mode_t) -> FuseResult<RawFd> {
        info!(target: OP_TAG, "Creating {:?} with mode {:o}", path, mode);

        match VirtualPath::parse(path) {
            VirtualPath::Entity { tags, name, rest } => {
                if rest.as_os_str().is_empty() {
                    // entity nodes come from the side channel, not from create
                    return Err(EPERM.into());
                }
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                    Self::real_path(&entity, &rest)
                };
                let handle = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .mode(mode)
                    .open(&real)?;
                Ok(handle.into_raw_fd())
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(EPERM.into()),
        }
    }

    fn open(&self, _req: &Request, path: &Path, fi: *const fuse_file_info) -> FuseResult<RawFd> {
        let flags = (unsafe { *fi }).flags;
        info!(target: OP_TAG, "Opening {:?} with flags {}", path, flags);

        match VirtualPath::parse(path) {
            VirtualPath::Entity { tags, name, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                    Self::real_path(&entity, &rest)
                };
                let mut opts = OpenOptions::new();
                let handle = util::open_opts_from_mode(&mut opts, flags).open(&real)?;
                Ok(handle.into_raw_fd())
            }
            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(EPERM.into()),
        }
    }

    fn statfs(&self, _req: &Request, path: &Path) -> FuseResult<statvfs> {
        match VirtualPath::parse(path) {
            VirtualPath::Entity { tags, name, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &name)?;
                    Self::real_path(&entity, &rest)
                };
                Ok(util::host_statvfs(&real)?)
            }
            _ => Ok(util::synthetic_statvfs()),
        }
    }

    fn setxattr(
        &self,
        req: &Request,
        path: &Path,
        name: &str,
        value: &[u8],
        flags: i32,
    ) -> FuseResult<()> {
        self.setxattr_impl(req, path, name, value, flags)
    }

    fn getxattr(&self, req: &Request, path: &Path, name: &str) -> FuseResult<Vec<u8>> {
        self.getxattr_impl(req, path, name)
    }

    fn listxattr(&self, req: &Request, path: &Path) -> FuseResult<Vec<String>> {
        self.listxattr_impl(req, path)
    }

    fn removexattr(&self, req: &Request, path: &Path, name: &str) -> FuseResult<()> {
        self.removexattr_impl(req, path, name)
    }
}

fn resolve_utime(ts: &timespec, current: i64, now: i64) -> i64 {
    match ts.tv_nsec {
        n if n == libc::UTIME_NOW as i64 => now,
        n if n == libc::UTIME_OMIT as i64 => current,
        _ => ts.tv_sec,
    }
}
