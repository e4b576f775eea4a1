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

use crate::common::constants::VERSION;
use std::path::Path;

pub mod constants;
pub mod err;
pub mod log;
pub mod mounts;
pub mod settings;
pub mod types;

pub fn get_filename(path: &Path) -> err::TagdirResult<&str> {
    Ok(path
        .components()
        .last()
        .ok_or_else(|| err::TagdirError::InvalidPath(path.to_owned()))?
        .as_os_str()
        .to_str()
        .ok_or_else(|| err::TagdirError::InvalidPath(path.to_owned()))?)
}

pub fn version_str() -> String {
    format!("{}.{}.{}", VERSION.0, VERSION.1, VERSION.2)
}
