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
use super::super::util;
use super::TagdirFilesystem;
use super::OP_TAG;
use crate::common::types::VirtualPath;
use crate::sql;
use fuse_shim::stat;
use fuse_shim::{FuseResult, Request};
use log::{debug, info};
use nix::errno::Errno::ENOENT;
use std::path::Path;

impl TagdirFilesystem {
    pub fn getattr_impl(&self, req: &Request, path: &Path) -> FuseResult<stat> {
        info!(target: OP_TAG, "Stating {:?} from PID {}", path, req.pid);

        match VirtualPath::parse(path) {
            VirtualPath::Root => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let attr =
                    sql::get_root_attr(&(*conn).borrow()).map_err(TagdirShimError::from)?;
                Ok(util::attr_stat(&attr, 0))
            }

            VirtualPath::Entinfo => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let attr =
                    sql::get_entinfo_attr(&(*conn).borrow()).map_err(TagdirShimError::from)?;
                Ok(util::attr_stat(&attr, 0))
            }

            VirtualPath::TagChain(tags) => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let real_conn = (*conn).borrow();

                // the chain is addressable only when every tag in it exists
                self.chain_exists(&real_conn, &tags)?;

                let last = tags.last().expect("chain can't be empty");
                match sql::get_tag(&real_conn, last).map_err(TagdirShimError::from)? {
                    Some(tag) => Ok(util::attr_stat(&tag.attr, 0)),
                    None => {
                        debug!(target: OP_TAG, "Tag {} doesn't exist", last);
                        Err(ENOENT.into())
                    }
                }
            }

            VirtualPath::Entity { tags, name, rest } => {
                let entity = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    self.resolve_entity(&(*conn).borrow(), &tags, &name)?
                };

                if rest.as_os_str().is_empty() {
                    Ok(util::attr_stat(&entity.attr, 0))
                } else {
                    let real = Self::real_path(&entity, &rest);
                    debug!(target: OP_TAG, "Passing through lstat to {:?}", real);
                    Ok(util::host_stat(&real)?)
                }
            }

            VirtualPath::Invalid => Err(ENOENT.into()),
        }
    }
}
