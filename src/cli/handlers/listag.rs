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

use crate::cli::{entinfo_file, require_mountpoint, CliError};
use crate::common::constants::TAG_PREFIX;
use crate::common::get_filename;
use clap::ArgMatches;
use std::error::Error;
use std::path::Path;

pub fn handle(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mountpoint = require_mountpoint(args.value_of("name"))?;

    match args.value_of("path") {
        // no path: the tag universe is just the root listing
        None => {
            let mut tags: Vec<String> = std::fs::read_dir(&mountpoint)?
                .filter_map(|dirent| dirent.ok())
                .filter_map(|dirent| {
                    let name = dirent.file_name().to_string_lossy().to_string();
                    if name.starts_with(TAG_PREFIX) {
                        Some(name[TAG_PREFIX.len_utf8()..].to_string())
                    } else {
                        None
                    }
                })
                .collect();
            tags.sort();
            for tag in tags {
                println!("{}", tag);
            }
            Ok(())
        }

        // with a path: ask the side channel about that entity
        Some(path) => {
            let source = std::fs::canonicalize(path)?;
            let name = get_filename(&source)?.to_string();

            let entinfo = entinfo_file(&mountpoint);
            let value = match xattr::get(&entinfo, &name)? {
                Some(value) => value,
                None => return Err(CliError::UnknownEntity(name).into()),
            };

            let text = String::from_utf8_lossy(&value).to_string();
            let mut parts = text.split(',');
            let stored_path = parts.next().unwrap_or("");
            if Path::new(stored_path) != source.as_path() {
                return Err(CliError::PathMismatch(name, source).into());
            }

            let mut tags: Vec<&str> = parts.collect();
            tags.sort_unstable();
            for tag in tags {
                println!("{}", tag);
            }
            Ok(())
        }
    }
}
