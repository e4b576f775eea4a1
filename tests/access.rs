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

mod common;

use common::{assert_errno, TestHelper, TestResult};
use nix::errno::Errno::ENOENT;

/// Two tags, entity1 carrying both, entity2 carrying only the second.
fn setup() -> TestHelper {
    let th = TestHelper::new();
    th.mkdir("/@tagone").unwrap();
    th.mkdir("/@tagtwo").unwrap();
    th.register("entityone", std::path::Path::new("/pathone"), &["tagone", "tagtwo"]);
    th.register("entitytwo", std::path::Path::new("/pathtwo"), &["tagtwo"]);
    th
}

#[test]
fn test_root() -> TestResult {
    let th = setup();
    th.access("/")?;
    Ok(())
}

#[test]
fn test_reserved_file() -> TestResult {
    let th = setup();
    th.access("/.tagdir_entinfo")?;
    Ok(())
}

#[test]
fn test_existent_tag() -> TestResult {
    let th = setup();
    th.access("/@tagone")?;
    Ok(())
}

#[test]
fn test_entity_through_one_tag() -> TestResult {
    let th = setup();
    th.access("/@tagone/entityone")?;
    Ok(())
}

#[test]
fn test_entity_through_both_tags() -> TestResult {
    let th = setup();
    th.access("/@tagone/@tagtwo/entityone")?;
    Ok(())
}

#[test]
fn test_nonexistent_tag() {
    let th = setup();
    assert_errno(th.access("/@nonexistent"), ENOENT);
}

#[test]
fn test_entity_without_tags() {
    let th = setup();
    assert_errno(th.access("/entityone"), ENOENT);
}

#[test]
fn test_entity_not_under_tag() {
    // entitytwo only carries tagtwo, so tagone can't reach it
    let th = setup();
    assert_errno(th.access("/@tagone/entitytwo"), ENOENT);
}

#[test]
fn test_unknown_entity_under_tag() {
    let th = setup();
    assert_errno(th.access("/@tagone/unknown"), ENOENT);
}

#[test]
fn test_malformed_tag_segment() {
    let th = setup();
    assert_errno(th.access("/@NotLower"), ENOENT);
}
