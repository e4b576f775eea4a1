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

//! `mktag`/`rmtag` are just mkdir/rmdir against `@tag` under the mountpoint;
//! the mounted filesystem does the real work.

use super::TAG;
use crate::cli::{require_mountpoint, tag_chain_dir};
use clap::ArgMatches;
use log::info;
use std::error::Error;

pub fn mktag(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mountpoint = require_mountpoint(args.value_of("name"))?;

    for tag in args.values_of("tags").expect("Tags required!") {
        let tag_dir = tag_chain_dir(&mountpoint, &[tag]);
        info!(target: TAG, "Creating tag dir {:?}", tag_dir);
        std::fs::create_dir(&tag_dir)?;
    }
    Ok(())
}

pub fn rmtag(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mountpoint = require_mountpoint(args.value_of("name"))?;

    for tag in args.values_of("tags").expect("Tags required!") {
        let tag_dir = tag_chain_dir(&mountpoint, &[tag]);
        info!(target: TAG, "Removing tag dir {:?}", tag_dir);
        std::fs::remove_dir(&tag_dir)?;
    }
    Ok(())
}
