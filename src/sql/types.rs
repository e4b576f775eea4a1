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

use crate::common::constants::TAG_PREFIX;
use crate::common::types::UtcDt;
use fuse_shim::FileEntry;
use libc::{gid_t, mode_t, uid_t};

/// The stat-shaped row every synthetic node owns, integer seconds.
#[derive(Debug, Clone)]
pub struct Attr {
    pub id: i64,
    pub mode: mode_t,
    pub uid: uid_t,
    pub gid: gid_t,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Attr {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn mtime_utc(&self) -> UtcDt {
        let naive = chrono::NaiveDateTime::from_timestamp(self.mtime, 0);
        chrono::DateTime::from_utc(naive, chrono::Utc)
    }
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub attr: Attr,
}

/// Tags list under the root with their prefix attached.
impl From<Tag> for FileEntry {
    fn from(tag: Tag) -> Self {
        FileEntry {
            name: format!("{}{}", TAG_PREFIX, tag.name),
            mtime: tag.attr.mtime_utc(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub attr: Attr,
}

impl From<Entity> for FileEntry {
    fn from(entity: Entity) -> Self {
        let mtime = entity.attr.mtime_utc();
        FileEntry {
            name: entity.name,
            mtime,
        }
    }
}
