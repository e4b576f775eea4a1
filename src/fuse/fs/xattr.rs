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

//! The side-channel command surface.  Extended attributes on the reserved
//! file carry "list", "inspect", "register" and "deregister"; ordinary xattr
//! calls inside an entity pass through to the host.

use super::super::err::TagdirShimError;
use super::super::util;
use super::TagdirFilesystem;
use super::OP_TAG;
use crate::common::err::{TagdirError, TagdirResult};
use crate::common::types::{valid_entity_name, valid_tag_name, VirtualPath};
use crate::sql;
use fuse_shim::err::FuseErrno;
use fuse_shim::{FuseResult, Request};
use log::{debug, info};
use nix::errno::Errno::{ENODATA, ENOENT, EPERM};
use rusqlite::TransactionBehavior;
use std::path::Path;

/// Registration values look like `<abs_path>,<tag1>[,<tagN>]*`.  Every tag
/// has to satisfy the tag grammar, the path has to be absolute, and at least
/// one tag is required, since tagless entities don't persist.
fn parse_entinfo_value(value: &[u8]) -> TagdirResult<(String, Vec<String>)> {
    let text = std::str::from_utf8(value)
        .map_err(|_| TagdirError::BadEntinfoValue("<non-utf8>".to_string()))?;

    let mut parts = text.split(',');
    let path = parts.next().unwrap_or("");
    if path.is_empty() || !path.starts_with('/') {
        return Err(TagdirError::BadEntinfoValue(text.to_string()));
    }

    let mut tags: Vec<String> = vec![];
    for tag in parts {
        if !valid_tag_name(tag) {
            return Err(TagdirError::BadEntinfoValue(text.to_string()));
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    if tags.is_empty() {
        return Err(TagdirError::BadEntinfoValue(text.to_string()));
    }

    Ok((path.to_string(), tags))
}

/// The value handed back for one entity: its real path, then its tags.
fn format_entinfo_value(path: &str, tags: &[String]) -> Vec<u8> {
    let mut value = path.to_string();
    for tag in tags {
        value.push(',');
        value.push_str(tag);
    }
    value.into_bytes()
}

impl TagdirFilesystem {
    pub fn setxattr_impl(
        &self,
        req: &Request,
        path: &Path,
        name: &str,
        value: &[u8],
        flags: i32,
    ) -> FuseResult<()> {
        info!(
            target: OP_TAG,
            "Calling setxattr on {} for name {}",
            path.display(),
            name
        );

        match VirtualPath::parse(path) {
            VirtualPath::Entinfo => {
                if !valid_entity_name(name) {
                    return Err(
                        TagdirShimError::from(TagdirError::BadEntityName(name.to_string()))
                            .into(),
                    );
                }
                let (real_path, tags) =
                    parse_entinfo_value(value).map_err(TagdirShimError::from)?;

                debug!(
                    target: OP_TAG,
                    "Registering {} -> {} with {:?}", name, real_path, tags
                );

                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let mut real_conn = (*conn).borrow_mut();

                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                sql::upsert_entity(
                    &tx,
                    name,
                    &real_path,
                    &tags,
                    req.uid,
                    req.gid,
                    sql::get_now_secs(),
                )
                .map_err(TagdirShimError::from)?;
                tx.commit().map_err(TagdirShimError::from)?;

                self.notify_watch(&real_path);
                Ok(())
            }

            VirtualPath::Entity { tags, name: ent, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &ent)?;
                    Self::real_path(&entity, &rest)
                };
                Ok(util::setxattr(&real, name, value, flags).map_err(FuseErrno::from)?)
            }

            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(EPERM.into()),
        }
    }

    pub fn getxattr_impl(&self, _req: &Request, path: &Path, name: &str) -> FuseResult<Vec<u8>> {
        info!(
            target: OP_TAG,
            "Calling getxattr on {:?} for name {}", path, name
        );

        match VirtualPath::parse(path) {
            VirtualPath::Entinfo => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let real_conn = (*conn).borrow();

                match sql::get_entity(&real_conn, name).map_err(TagdirShimError::from)? {
                    Some(entity) => {
                        let tags = sql::entity_tag_names(&real_conn, entity.id)
                            .map_err(TagdirShimError::from)?;
                        Ok(format_entinfo_value(&entity.path, &tags))
                    }
                    None => Err(ENODATA.into()),
                }
            }

            VirtualPath::Entity { tags, name: ent, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &ent)?;
                    Self::real_path(&entity, &rest)
                };
                Ok(util::getxattr(&real, name).map_err(FuseErrno::from)?)
            }

            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(ENODATA.into()),
        }
    }

    pub fn listxattr_impl(&self, _req: &Request, path: &Path) -> FuseResult<Vec<String>> {
        info!(target: OP_TAG, "Calling listxattr on {}", path.display());

        match VirtualPath::parse(path) {
            VirtualPath::Entinfo => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let entities = sql::get_all_entities(&(*conn).borrow())
                    .map_err(TagdirShimError::from)?;
                Ok(entities.into_iter().map(|entity| entity.name).collect())
            }

            VirtualPath::Entity { tags, name: ent, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &ent)?;
                    Self::real_path(&entity, &rest)
                };
                Ok(util::listxattr(&real).map_err(FuseErrno::from)?)
            }

            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Ok(vec![]),
        }
    }

    pub fn removexattr_impl(&self, _req: &Request, path: &Path, name: &str) -> FuseResult<()> {
        info!(
            target: OP_TAG,
            "Calling removexattr on {} for name {}",
            path.display(),
            name
        );

        match VirtualPath::parse(path) {
            VirtualPath::Entinfo => {
                let conn_lock = self.conn_pool.get_conn();
                let conn = conn_lock.lock();
                let mut real_conn = (*conn).borrow_mut();

                let entity = match sql::get_entity(&real_conn, name)
                    .map_err(TagdirShimError::from)?
                {
                    Some(entity) => entity,
                    None => return Err(ENODATA.into()),
                };

                let tx = real_conn
                    .transaction_with_behavior(TransactionBehavior::Exclusive)
                    .map_err(TagdirShimError::from)?;
                sql::remove_entity(&tx, name, sql::get_now_secs())
                    .map_err(TagdirShimError::from)?;
                tx.commit().map_err(TagdirShimError::from)?;

                self.notify_unwatch(&entity.path);
                Ok(())
            }

            VirtualPath::Entity { tags, name: ent, rest } => {
                let real = {
                    let conn_lock = self.conn_pool.get_conn();
                    let conn = conn_lock.lock();
                    let entity = self.resolve_entity(&(*conn).borrow(), &tags, &ent)?;
                    Self::real_path(&entity, &rest)
                };
                Ok(util::removexattr(&real, name).map_err(FuseErrno::from)?)
            }

            VirtualPath::Invalid => Err(ENOENT.into()),
            _ => Err(EPERM.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entinfo_value() {
        let (path, tags) = parse_entinfo_value(b"/abs/report.txt,work,urgent").unwrap();
        assert_eq!(path, "/abs/report.txt");
        assert_eq!(tags, vec!["work".to_string(), "urgent".to_string()]);
    }

    #[test]
    fn test_parse_entinfo_value_dedupes_tags() {
        let (_path, tags) = parse_entinfo_value(b"/a,work,work").unwrap();
        assert_eq!(tags, vec!["work".to_string()]);
    }

    #[test]
    fn test_parse_entinfo_value_rejects_garbage() {
        assert!(parse_entinfo_value(b"").is_err());
        assert!(parse_entinfo_value(b"relative/path,work").is_err());
        assert!(parse_entinfo_value(b"/abs/path").is_err());
        assert!(parse_entinfo_value(b"/abs/path,").is_err());
        assert!(parse_entinfo_value(b"/abs/path,BadTag").is_err());
        assert!(parse_entinfo_value(b"/abs/path,tag1").is_err());
    }

    #[test]
    fn test_format_entinfo_value() {
        let value =
            format_entinfo_value("/abs/report.txt", &["urgent".to_string(), "work".to_string()]);
        assert_eq!(value, b"/abs/report.txt,urgent,work".to_vec());
    }
}
