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

pub const VERSION: (&str, &str, &str) = (
    env!("CARGO_PKG_VERSION_MAJOR"),
    env!("CARGO_PKG_VERSION_MINOR"),
    env!("CARGO_PKG_VERSION_PATCH"),
);
pub const ENV_PREFIX: &str = "TAGDIR";
pub const APP_NAME: &str = "tagdir";
pub const ORG: &str = "io.tagdir";

/// Every tag segment in a virtual path begins with this.
pub const TAG_PREFIX: char = '@';

/// The reserved synthetic file whose extended attributes carry the
/// list/register command surface.  The name is part of the contract with
/// client tooling and must not change.
pub const ENTINFO_NAME: &str = ".tagdir_entinfo";
pub const ENTINFO_PATH: &str = "/.tagdir_entinfo";

/// Mounts register as `Tagdir_<name>`; discovery filters on this prefix.
pub const DEVICE_PREFIX: &str = "Tagdir_";

/// The attr row ids seeded by the bootstrap migration.
pub const ROOT_ATTR_ID: i64 = 1;
pub const ENTINFO_ATTR_ID: i64 = 2;

pub const DEFAULT_CONFIG_TOML: &str = r###"
[mount]
"###;

// https://github.com/torvalds/linux/blob/master/Documentation/admin-guide/devices.txt
// 60-63 LOCAL/EXPERIMENTAL USE
pub const DEVICE_ID: u64 = 63;
