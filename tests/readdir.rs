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
use nix::errno::Errno::{EINVAL, ENOENT};
use std::path::Path;

fn setup() -> TestHelper {
    let th = TestHelper::new();
    th.mkdir("/@tagone").unwrap();
    th.mkdir("/@tagtwo").unwrap();
    th.register("entityone", Path::new("/pathone"), &["tagone", "tagtwo"]);
    th.register("entitytwo", Path::new("/pathtwo"), &["tagone"]);
    th
}

#[test]
fn test_empty_root() -> TestResult {
    let th = TestHelper::new();
    assert_eq!(
        th.readdir_full("/")?,
        vec![".", "..", ".tagdir_entinfo"]
    );
    Ok(())
}

#[test]
fn test_root() -> TestResult {
    let th = setup();
    assert_eq!(
        th.readdir_names("/")?,
        vec![".tagdir_entinfo", "@tagone", "@tagtwo"]
    );
    Ok(())
}

#[test]
fn test_filter_single_tag() -> TestResult {
    let th = setup();
    assert_eq!(th.readdir_names("/@tagone")?, vec!["entityone", "entitytwo"]);
    assert_eq!(th.readdir_names("/@tagtwo")?, vec!["entityone"]);
    Ok(())
}

#[test]
fn test_filter_conjunction() -> TestResult {
    let th = setup();
    assert_eq!(th.readdir_names("/@tagone/@tagtwo")?, vec!["entityone"]);
    Ok(())
}

#[test]
fn test_conjunction_is_order_insensitive() -> TestResult {
    let th = setup();
    assert_eq!(
        th.readdir_names("/@tagone/@tagtwo")?,
        th.readdir_names("/@tagtwo/@tagone")?
    );
    Ok(())
}

#[test]
fn test_repeated_tag_is_single_occurrence() -> TestResult {
    let th = setup();
    assert_eq!(
        th.readdir_names("/@tagone/@tagone")?,
        th.readdir_names("/@tagone")?
    );
    Ok(())
}

#[test]
fn test_nonexistent_tag() {
    let th = setup();
    assert_errno(th.readdir_names("/@nonexistent"), ENOENT);
}

#[test]
fn test_chain_with_unknown_member() {
    let th = setup();
    assert_errno(th.readdir_names("/@tagone/@nonexistent"), ENOENT);
}

#[test]
fn test_entity_without_tags() {
    let th = setup();
    assert_errno(th.readdir_names("/entityone"), EINVAL);
}

#[test]
fn test_entity_passes_through() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("inner.txt"), "hi")?;
    std::fs::create_dir(dir.join("sub"))?;

    th.mkdir("/@docs")?;
    th.register("docs", &dir, &["docs"]);

    assert_eq!(th.readdir_names("/@docs/docs")?, vec!["inner.txt", "sub"]);
    assert_eq!(th.readdir_names("/@docs/docs/sub")?, Vec::<String>::new());
    Ok(())
}
