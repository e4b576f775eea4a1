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

use fuse_shim::err::FuseErrno;
use nix::errno::Errno;
use std::error::Error;
use std::io::ErrorKind;
use std::path::PathBuf;

pub type TagdirResult<T> = Result<T, TagdirError>;

pub enum TagdirError {
    BadTagName(String),
    BadEntityName(String),
    BadEntinfoValue(String),
    DatabaseError(rusqlite::Error),
    InvalidPath(PathBuf),
    PathExists(PathBuf),
    UnknownTag(String),
    UnknownEntity(String),
    IOError(Box<dyn Error>),
    Other(Box<dyn Error>),
}

impl From<std::io::Error> for TagdirError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => TagdirError::IOError(Box::new(e)),
            ErrorKind::Other => TagdirError::IOError(Box::new(e)),
            _kind => TagdirError::Other(Box::new(e)),
        }
    }
}

impl From<nix::Error> for TagdirError {
    fn from(e: nix::Error) -> Self {
        TagdirError::Other(Box::new(e))
    }
}

impl From<rusqlite::Error> for TagdirError {
    fn from(e: rusqlite::Error) -> Self {
        TagdirError::DatabaseError(e)
    }
}

impl From<Box<dyn Error>> for TagdirError {
    fn from(e: Box<dyn Error>) -> Self {
        TagdirError::Other(e)
    }
}

impl Error for TagdirError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TagdirError::DatabaseError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TagdirError> for FuseErrno {
    fn from(e: TagdirError) -> Self {
        Self {
            errno: Errno::EIO,
            original: Some(Box::new(e)),
        }
    }
}

impl std::fmt::Display for TagdirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            TagdirError::BadTagName(tag) => write!(f, "Invalid tag name: {}", tag),
            TagdirError::BadEntityName(name) => write!(f, "Invalid entity name: {}", name),
            TagdirError::BadEntinfoValue(val) => {
                write!(f, "Malformed entity registration value: {}", val)
            }
            TagdirError::DatabaseError(dbe) => write!(f, "Database error: {:?}", dbe),
            TagdirError::InvalidPath(path) => write!(f, "Invalid path {}", path.display()),
            TagdirError::PathExists(dst) => write!(f, "Path {:?} already exists", dst),
            TagdirError::UnknownTag(tag) => write!(f, "No such tag: {}", tag),
            TagdirError::UnknownEntity(name) => write!(f, "No tagged entry {}", name),
            TagdirError::IOError(e) => write!(f, "IO error: {:?}", e),
            TagdirError::Other(e) => write!(f, "Other unknown error: {:?}", e),
        }
    }
}

impl std::fmt::Debug for TagdirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        std::fmt::Display::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct ParseOctalError;

impl std::fmt::Display for ParseOctalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Bad octal value")
    }
}
impl Error for ParseOctalError {}
