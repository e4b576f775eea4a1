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

use crate::common::constants::ENTINFO_NAME;
use crate::common::mounts;
use std::error::Error;
use std::path::{Path, PathBuf};

pub mod commands;
pub mod handlers;

#[derive(Debug)]
pub enum CliError {
    InvalidMountDir(PathBuf),
    AlreadyMounted(String),
    NoMountpoint(Option<String>),
    UnknownEntity(String),
    PathMismatch(String, PathBuf),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::InvalidMountDir(mp) => {
                write!(f, "Mount directory {} does not exist", mp.display())
            }
            CliError::AlreadyMounted(name) => write!(f, "{} already exists.", name),
            CliError::NoMountpoint(Some(name)) => {
                write!(f, "mountpoint {} is not found.", name)
            }
            CliError::NoMountpoint(None) => write!(f, "no mountpoint found."),
            CliError::UnknownEntity(name) => write!(f, "No tagged entry {}", name),
            CliError::PathMismatch(name, path) => {
                write!(f, "Tagged entry {} is not {}", name, path.display())
            }
        }
    }
}

impl Error for CliError {}

/// The mountpoint for `--name`, or the sole mount when no name was given.
pub(crate) fn require_mountpoint(name: Option<&str>) -> Result<PathBuf, Box<dyn Error>> {
    match mounts::find_mountpoint(name)? {
        Some(mp) => Ok(mp),
        None => Err(CliError::NoMountpoint(name.map(str::to_string)).into()),
    }
}

/// Where the reserved side-channel file lives under a mountpoint.
pub(crate) fn entinfo_file(mountpoint: &Path) -> PathBuf {
    mountpoint.join(ENTINFO_NAME)
}

/// The virtual directory for a chain of tags, rooted at the mountpoint.
pub(crate) fn tag_chain_dir(mountpoint: &Path, tags: &[&str]) -> PathBuf {
    let mut dir = mountpoint.to_path_buf();
    for tag in tags {
        dir.push(format!("@{}", tag));
    }
    dir
}
