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

use super::super::err::TagdirShimError;
use super::TagdirFilesystem;
use super::OP_TAG;
use crate::common::constants;
use crate::common::types::VirtualPath;
use crate::sql;
use fuse_shim::{FileEntry, FuseResult, Request};
use log::{debug, info};
use nix::errno::Errno::{EINVAL, ENOENT};
use std::path::Path;

impl TagdirFilesystem {
    pub fn readdir_impl(
        &self,
        _req: &Request,
        path: &Path,
    ) -> FuseResult<Box<dyn Iterator<Item = FileEntry>>> {
        info!(target: OP_TAG, "Listing directory {:?}", path);

        match VirtualPath::parse(path) {
            // the root shows every tag plus the reserved file
            VirtualPath::Root => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let real_conn = (*conn).borrow();

                let tags = sql::get_all_tags(&real_conn).map_err(TagdirShimError::from)?;
                debug!(target: OP_TAG, "Root holds {} tags", tags.len());

                let entinfo_attr =
                    sql::get_entinfo_attr(&real_conn).map_err(TagdirShimError::from)?;
                let entinfo = FileEntry {
                    name: constants::ENTINFO_NAME.to_string(),
                    mtime: entinfo_attr.mtime_utc(),
                };

                let entry_iter = tags
                    .into_iter()
                    .map(FileEntry::from)
                    .chain(std::iter::once(entinfo));
                Ok(Box::new(entry_iter))
            }

            // a chain lists the entities living at the conjunction
            VirtualPath::TagChain(tags) => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let real_conn = (*conn).borrow();

                self.chain_exists(&real_conn, &tags)?;

                let entities = sql::entities_tagged_with(&real_conn, &tags)
                    .map_err(TagdirShimError::from)?;
                debug!(
                    target: OP_TAG,
                    "Intersection {:?} holds {} entities",
                    tags,
                    entities.len()
                );

                Ok(Box::new(entities.into_iter().map(FileEntry::from)))
            }

            // inside an entity the listing is the host's business
            VirtualPath::Entity { tags, name, rest } => {
                if tags.is_empty() {
                    return Err(EINVAL.into());
                }

                let entity = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    self.resolve_entity(&(*conn).borrow(), &tags, &name)?
                };

                let real = Self::real_path(&entity, &rest);
                debug!(target: OP_TAG, "Passing through readdir to {:?}", real);

                let mut entries = vec![];
                for dirent in std::fs::read_dir(&real)? {
                    let dirent = dirent?;
                    let mtime = dirent
                        .metadata()
                        .and_then(|md| md.modified())
                        .map(chrono::DateTime::from)
                        .unwrap_or_else(|_| chrono::Utc::now());
                    entries.push(FileEntry {
                        name: dirent.file_name().to_string_lossy().to_string(),
                        mtime,
                    });
                }

                Ok(Box::new(entries.into_iter()))
            }

            VirtualPath::Invalid => Err(ENOENT.into()),
        }
    }
}
