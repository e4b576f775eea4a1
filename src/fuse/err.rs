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

use crate::common::err::TagdirError;
use core::fmt;
use fuse_shim::err::FuseErrno;
use nix::errno::Errno;
use nix::errno::Errno::{EEXIST, EINVAL, EIO, ENOENT, EPERM};
use rusqlite::Error as SqlError;
use std::borrow::Borrow;
use std::error::Error;
use std::fmt::Formatter;
use std::io::ErrorKind;

/// A conversion shim between the crates that don't know each other: rusqlite
/// and domain errors on one side, `fuse_shim::FuseErrno` on the other.
/// Neither side owns both types, so `From` impls have to live on this
/// intermediate.
#[derive(Debug)]
pub(crate) struct TagdirShimError {
    errno: Errno,
    original: Option<Box<dyn Error>>,
}

impl std::fmt::Display for TagdirShimError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.errno, self.original)
    }
}

impl Error for TagdirShimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.original {
            Some(e) => Some(e.borrow()),
            None => None,
        }
    }
}

fn map_io_err(e: &std::io::Error) -> Errno {
    match e.kind() {
        ErrorKind::InvalidData => EIO,
        ErrorKind::PermissionDenied => EPERM,
        _ => Errno::from_i32(e.raw_os_error().unwrap_or(EIO as i32)),
    }
}

impl From<std::io::Error> for TagdirShimError {
    fn from(e: std::io::Error) -> Self {
        Self {
            errno: map_io_err(&e),
            original: Some(Box::new(e)),
        }
    }
}

impl From<SqlError> for TagdirShimError {
    fn from(e: SqlError) -> Self {
        let errno = match &e {
            // a duplicate tag or entity surfaces as the unique constraint
            SqlError::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EEXIST
            }
            SqlError::QueryReturnedNoRows => ENOENT,
            _ => EIO,
        };
        Self {
            errno,
            original: Some(Box::new(e)),
        }
    }
}

impl From<TagdirShimError> for FuseErrno {
    fn from(e: TagdirShimError) -> Self {
        Self {
            errno: e.errno,
            original: Some(Box::new(e)),
        }
    }
}

impl From<Box<dyn Error>> for TagdirShimError {
    fn from(e: Box<dyn Error>) -> Self {
        Self {
            errno: EIO,
            original: Some(e),
        }
    }
}

impl From<TagdirError> for TagdirShimError {
    fn from(e: TagdirError) -> Self {
        let new_err = match &e {
            TagdirError::BadTagName(_)
            | TagdirError::BadEntityName(_)
            | TagdirError::BadEntinfoValue(_) => EINVAL,
            TagdirError::PathExists(_p) => EEXIST,
            TagdirError::UnknownTag(_) | TagdirError::UnknownEntity(_) => ENOENT,
            TagdirError::DatabaseError(db) => {
                return TagdirShimError::from_db_error(db, Box::new(e))
            }
            _ => EIO,
        };
        Self {
            errno: new_err,
            original: Some(Box::new(e)),
        }
    }
}

impl TagdirShimError {
    fn from_db_error(db: &SqlError, original: Box<dyn Error>) -> Self {
        let errno = match db {
            SqlError::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EEXIST
            }
            SqlError::QueryReturnedNoRows => ENOENT,
            _ => EIO,
        };
        Self {
            errno,
            original: Some(original),
        }
    }
}
