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

use crate::common::constants::{ENTINFO_NAME, TAG_PREFIX};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Component::{Normal, RootDir};
use std::path::{Path, PathBuf};

pub type UtcDt = chrono::DateTime<chrono::Utc>;

pub mod file_perms;

lazy_static! {
    static ref TAG_NAME_RE: Regex = Regex::new("^[a-z]+$").unwrap();
}

/// Tag names are lowercase ascii letters, nothing else.
pub fn valid_tag_name(name: &str) -> bool {
    TAG_NAME_RE.is_match(name)
}

/// An entity name has to be addressable as a single path component that can
/// never be confused with a tag segment or the reserved file.
pub fn valid_entity_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name != ENTINFO_NAME
        && !name.contains('/')
        && !name.starts_with(TAG_PREFIX)
}

/// The structured form of a virtual path.  A path is at most `/` followed by
/// tag segments (`@name`), optionally an entity segment, optionally residual
/// components that live inside the entity's real tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualPath {
    /// The bare `/`.
    Root,
    /// The reserved side-channel file.
    Entinfo,
    /// One or more tag segments and nothing after them.
    TagChain(Vec<String>),
    /// Tag segments (possibly none), an entity segment, and whatever remains.
    /// `rest` is empty when the entity node itself is addressed.
    Entity {
        tags: Vec<String>,
        name: String,
        rest: PathBuf,
    },
    /// A malformed tag segment or an otherwise unparseable path.
    Invalid,
}

impl VirtualPath {
    /// Single forward pass over the components.  Repeated tags collapse to
    /// one occurrence.
    pub fn parse<P: AsRef<Path>>(path: P) -> VirtualPath {
        let mut comps = path.as_ref().components();

        // the kernel always hands us absolute paths
        match comps.next() {
            Some(RootDir) => {}
            _ => return VirtualPath::Invalid,
        }

        let mut tags: Vec<String> = vec![];
        let mut entity: Option<String> = None;
        let mut rest = PathBuf::new();

        for comp in comps {
            let part = match comp {
                Normal(os) => match os.to_str() {
                    Some(s) => s,
                    None => return VirtualPath::Invalid,
                },
                _ => return VirtualPath::Invalid,
            };

            if entity.is_some() {
                // inside the entity's real tree, anything goes
                rest.push(part);
            } else if let Some(tag) = strip_tag_prefix(part) {
                if !valid_tag_name(tag) {
                    return VirtualPath::Invalid;
                }
                if !tags.iter().any(|t| t == tag) {
                    tags.push(tag.to_owned());
                }
            } else {
                entity = Some(part.to_owned());
            }
        }

        match entity {
            None if tags.is_empty() => VirtualPath::Root,
            None => VirtualPath::TagChain(tags),
            Some(name) if tags.is_empty() && name == ENTINFO_NAME && rest.as_os_str().is_empty() => {
                VirtualPath::Entinfo
            }
            Some(name) => VirtualPath::Entity { tags, name, rest },
        }
    }
}

fn strip_tag_prefix(part: &str) -> Option<&str> {
    if part.starts_with(TAG_PREFIX) {
        Some(&part[TAG_PREFIX.len_utf8()..])
    } else {
        None
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VirtualPath::Root => write!(f, "Root"),
            VirtualPath::Entinfo => write!(f, "Entinfo"),
            VirtualPath::TagChain(tags) => write!(f, "TagChain({})", tags.join(",")),
            VirtualPath::Entity { tags, name, rest } => write!(
                f,
                "Entity({} @ [{}] + {:?})",
                name,
                tags.join(","),
                rest
            ),
            VirtualPath::Invalid => write!(f, "Invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        assert_eq!(VirtualPath::parse("/"), VirtualPath::Root);
    }

    #[test]
    fn test_parse_entinfo() {
        assert_eq!(VirtualPath::parse("/.tagdir_entinfo"), VirtualPath::Entinfo);
    }

    #[test]
    fn test_parse_tag_chain() {
        assert_eq!(
            VirtualPath::parse("/@work/@urgent"),
            VirtualPath::TagChain(vec!["work".to_string(), "urgent".to_string()])
        );
    }

    #[test]
    fn test_parse_repeated_tag_collapses() {
        assert_eq!(
            VirtualPath::parse("/@work/@work"),
            VirtualPath::TagChain(vec!["work".to_string()])
        );
    }

    #[test]
    fn test_parse_entity() {
        assert_eq!(
            VirtualPath::parse("/@work/report"),
            VirtualPath::Entity {
                tags: vec!["work".to_string()],
                name: "report".to_string(),
                rest: PathBuf::new(),
            }
        );
    }

    #[test]
    fn test_parse_entity_with_rest() {
        assert_eq!(
            VirtualPath::parse("/@work/report/sub/file.txt"),
            VirtualPath::Entity {
                tags: vec!["work".to_string()],
                name: "report".to_string(),
                rest: PathBuf::from("sub/file.txt"),
            }
        );
    }

    #[test]
    fn test_parse_tagless_entity() {
        assert_eq!(
            VirtualPath::parse("/report"),
            VirtualPath::Entity {
                tags: vec![],
                name: "report".to_string(),
                rest: PathBuf::new(),
            }
        );
    }

    #[test]
    fn test_parse_entinfo_under_tag_is_an_entity() {
        assert_eq!(
            VirtualPath::parse("/@work/.tagdir_entinfo"),
            VirtualPath::Entity {
                tags: vec!["work".to_string()],
                name: ".tagdir_entinfo".to_string(),
                rest: PathBuf::new(),
            }
        );
    }

    #[test]
    fn test_parse_bad_tag_names() {
        assert_eq!(VirtualPath::parse("/@"), VirtualPath::Invalid);
        assert_eq!(VirtualPath::parse("/@Work"), VirtualPath::Invalid);
        assert_eq!(VirtualPath::parse("/@tag1"), VirtualPath::Invalid);
        assert_eq!(VirtualPath::parse("/@a/@b c"), VirtualPath::Invalid);
    }

    #[test]
    fn test_tag_segments_inside_rest_are_literal() {
        assert_eq!(
            VirtualPath::parse("/@work/report/@notatag"),
            VirtualPath::Entity {
                tags: vec!["work".to_string()],
                name: "report".to_string(),
                rest: PathBuf::from("@notatag"),
            }
        );
    }

    #[test]
    fn test_entity_name_validity() {
        assert!(valid_entity_name("report"));
        assert!(valid_entity_name("report.txt"));
        assert!(!valid_entity_name(""));
        assert!(!valid_entity_name("."));
        assert!(!valid_entity_name("@report"));
        assert!(!valid_entity_name(".tagdir_entinfo"));
        assert!(!valid_entity_name("a/b"));
    }
}
