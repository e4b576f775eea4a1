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

//! `tag` and `untag`.  A previously unknown path is registered through the
//! side channel; everything else rides on mkdir/rmdir of the composed
//! virtual path.

use super::TAG;
use crate::cli::{entinfo_file, require_mountpoint, tag_chain_dir, CliError};
use crate::common::get_filename;
use clap::ArgMatches;
use log::{debug, info};
use std::error::Error;
use std::path::{Path, PathBuf};

fn resolve_source(args: &ArgMatches) -> Result<(PathBuf, String), Box<dyn Error>> {
    let source = std::fs::canonicalize(args.value_of("path").expect("Path required!"))?;
    let name = get_filename(&source)?.to_string();
    Ok((source, name))
}

pub fn tag(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mountpoint = require_mountpoint(args.value_of("name"))?;
    let (source, name) = resolve_source(args)?;
    let tags: Vec<&str> = args.values_of("tags").expect("Tags required!").collect();

    let entinfo = entinfo_file(&mountpoint);

    match xattr::get(&entinfo, &name)? {
        Some(value) => {
            // already registered: the stored path has to be the one the
            // caller means, then the memberships ride on mkdir
            let stored = String::from_utf8_lossy(&value).to_string();
            let stored_path = stored.split(',').next().unwrap_or("").to_string();
            if Path::new(&stored_path) != source.as_path() {
                return Err(CliError::PathMismatch(name, source).into());
            }

            let virt = tag_chain_dir(&mountpoint, &tags).join(&name);
            info!(target: TAG, "Tagging via mkdir {:?}", virt);
            std::fs::create_dir(&virt)?;
        }
        None => {
            let mut value = source.to_string_lossy().to_string();
            for tag in &tags {
                value.push(',');
                value.push_str(tag);
            }
            debug!(
                target: TAG,
                "Registering {} through the side channel: {}", name, value
            );
            xattr::set(&entinfo, &name, value.as_bytes())?;
        }
    }

    Ok(())
}

pub fn untag(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mountpoint = require_mountpoint(args.value_of("name"))?;
    let (_source, name) = resolve_source(args)?;
    let tags: Vec<&str> = args.values_of("tags").expect("Tags required!").collect();

    let entinfo = entinfo_file(&mountpoint);
    if xattr::get(&entinfo, &name)?.is_none() {
        return Err(CliError::UnknownEntity(name).into());
    }

    let virt = tag_chain_dir(&mountpoint, &tags).join(&name);
    info!(target: TAG, "Untagging via rmdir {:?}", virt);
    std::fs::remove_dir(&virt)?;
    Ok(())
}
