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

use crate::common::err::ParseOctalError;
use core::fmt;
use libc::mode_t;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display};
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UMask(pub mode_t);

impl UMask {
    pub fn file_perms(&self) -> Permissions {
        (0o666 & (!self.0)).into()
    }

    pub fn dir_perms(&self) -> Permissions {
        (0o777 & (!self.0)).into()
    }
}

impl Default for UMask {
    fn default() -> Self {
        unsafe {
            // umask can only be read by setting it
            let cur_umask = libc::umask(0);
            libc::umask(cur_umask);
            Self(cur_umask)
        }
    }
}

impl Debug for UMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}

impl Display for UMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "UMask({:03o})", self.0)
    }
}

impl From<mode_t> for UMask {
    fn from(umask: mode_t) -> Self {
        Self(umask)
    }
}

/// The permission bits of a mode, without the file-type bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions(mode_t);

impl Permissions {
    pub fn mode(&self) -> mode_t {
        self.0
    }

    pub fn octal_string(&self) -> String {
        format!("{:03o}", self.0)
    }
}

impl Debug for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}

impl Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.octal_string())
    }
}

impl Default for Permissions {
    fn default() -> Self {
        UMask::default().file_perms()
    }
}

impl From<mode_t> for Permissions {
    fn from(val: mode_t) -> Self {
        Self(val & 0o777)
    }
}

impl FromStr for Permissions {
    type Err = ParseOctalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(mode_t::from_str_radix(s, 8)
            .map_err(|_| ParseOctalError {})?
            .into())
    }
}

struct PermissionVisitor;

impl<'de> Visitor<'de> for PermissionVisitor {
    type Value = Permissions;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an octal mode value")
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(mode_t::from_str_radix(&v, 8)
            .map_err(|_| E::custom(format!("Invalid octal: {}", v)))?
            .into())
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_string(v.to_string())
    }
}

impl Serialize for Permissions {
    fn serialize<S>(&self, serializer: S) -> Result<<S as Serializer>::Ok, <S as Serializer>::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:o}", self.0))
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_string(PermissionVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perm_roundtrip() {
        let perms: Permissions = 0o664.into();
        assert_eq!(perms.mode(), 0o664);
        assert_eq!(perms.octal_string(), "664");
    }

    #[test]
    fn test_perm_from_str() {
        let perms = Permissions::from_str("755").unwrap();
        assert_eq!(perms.mode(), 0o755);
        assert!(Permissions::from_str("9z9").is_err());
    }

    #[test]
    fn test_umask_perms() {
        let um = UMask(0o022);
        assert_eq!(um.file_perms().mode(), 0o644);
        assert_eq!(um.dir_perms().mode(), 0o755);
    }
}
