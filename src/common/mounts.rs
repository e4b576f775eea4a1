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

//! Discovery of live Tagdir mounts through the kernel mount table.

use crate::common::constants::DEVICE_PREFIX;
use crate::common::err::TagdirResult;
use std::path::PathBuf;

const MOUNTS_FILE: &str = "/proc/mounts";

/// The fsname a mount registers under.
pub fn device_name(name: &str) -> String {
    format!("{}{}", DEVICE_PREFIX, name)
}

/// The `<name>` out of `Tagdir_<name>`, if this is one of ours.
pub fn mount_name(device: &str) -> Option<&str> {
    let mut parts = device.splitn(2, '_');
    match (parts.next(), parts.next()) {
        (Some(prefix), Some(name)) if format!("{}_", prefix) == DEVICE_PREFIX => Some(name),
        _ => None,
    }
}

/// One `(device, mountpoint)` row per Tagdir mount in the table.
pub fn parse_mounts(table: &str) -> Vec<(String, PathBuf)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            if mount_name(device).is_some() {
                Some((device.to_string(), PathBuf::from(unescape(mountpoint))))
            } else {
                None
            }
        })
        .collect()
}

// mountpoints with spaces come through /proc/mounts octal-escaped
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let code: String = chars.by_ref().take(3).collect();
            match u8::from_str_radix(&code, 8) {
                Ok(byte) => out.push(byte as char),
                Err(_) => {
                    out.push(c);
                    out.push_str(&code);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Picks the mountpoint for `name` out of the parsed table.  With no name
/// and exactly one Tagdir mount, that one wins.
pub fn select_mountpoint(mounts: &[(String, PathBuf)], name: Option<&str>) -> Option<PathBuf> {
    match name {
        None => {
            if mounts.len() == 1 {
                Some(mounts[0].1.clone())
            } else {
                None
            }
        }
        Some(wanted) => mounts
            .iter()
            .find(|(device, _)| mount_name(device) == Some(wanted))
            .map(|(_, mp)| mp.clone()),
    }
}

pub fn find_mountpoint(name: Option<&str>) -> TagdirResult<Option<PathBuf>> {
    let table = std::fs::read_to_string(MOUNTS_FILE)?;
    Ok(select_mountpoint(&parse_mounts(&table), name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid 0 0
Tagdir_work /mnt/work fuse.tagdir rw,nosuid,nodev 0 0
Tagdir_media /mnt/my\\040media fuse.tagdir rw 0 0
/dev/sda1 / ext4 rw,relatime 0 0
";

    #[test]
    fn test_parse_mounts_filters_foreign_devices() {
        let mounts = parse_mounts(TABLE);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].0, "Tagdir_work");
        assert_eq!(mounts[0].1, PathBuf::from("/mnt/work"));
        assert_eq!(mounts[1].1, PathBuf::from("/mnt/my media"));
    }

    #[test]
    fn test_select_by_name() {
        let mounts = parse_mounts(TABLE);
        assert_eq!(
            select_mountpoint(&mounts, Some("media")),
            Some(PathBuf::from("/mnt/my media"))
        );
        assert_eq!(select_mountpoint(&mounts, Some("nope")), None);
    }

    #[test]
    fn test_select_sole_mount_without_name() {
        let mounts = parse_mounts("Tagdir_solo /mnt/solo fuse.tagdir rw 0 0\n");
        assert_eq!(
            select_mountpoint(&mounts, None),
            Some(PathBuf::from("/mnt/solo"))
        );

        // ambiguous without a name
        let many = parse_mounts(TABLE);
        assert_eq!(select_mountpoint(&many, None), None);
    }

    #[test]
    fn test_device_name_roundtrip() {
        assert_eq!(device_name("work"), "Tagdir_work");
        assert_eq!(mount_name("Tagdir_work"), Some("work"));
        assert_eq!(mount_name("ext4"), None);
    }
}
