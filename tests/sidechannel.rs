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

//! The xattr command surface on the reserved file.

mod common;

use common::{assert_errno, TestHelper, TestResult};
use nix::errno::Errno::{EINVAL, ENODATA};

const ENTINFO: &str = "/.tagdir_entinfo";

#[test]
fn test_register_and_get_roundtrip() -> TestResult {
    let th = TestHelper::new();
    th.setx(ENTINFO, "report", b"/abs/report.txt,work,urgent")?;

    let (path, tags) = th.registration("report")?;
    assert_eq!(path, "/abs/report.txt");
    assert_eq!(tags, vec!["urgent", "work"]);
    Ok(())
}

#[test]
fn test_register_creates_missing_tags() -> TestResult {
    let th = TestHelper::new();
    th.setx(ENTINFO, "report", b"/abs/report.txt,work")?;

    assert_eq!(
        th.readdir_names("/")?,
        vec![".tagdir_entinfo", "@work"]
    );
    assert_eq!(th.readdir_names("/@work")?, vec!["report"]);
    Ok(())
}

#[test]
fn test_list_registered_entities() -> TestResult {
    let th = TestHelper::new();
    assert_eq!(th.listx(ENTINFO)?, Vec::<String>::new());

    th.setx(ENTINFO, "beta", b"/abs/beta,work")?;
    th.setx(ENTINFO, "alpha", b"/abs/alpha,work")?;

    assert_eq!(th.listx(ENTINFO)?, vec!["alpha", "beta"]);
    Ok(())
}

#[test]
fn test_reregistration_replaces_path_and_tags() -> TestResult {
    let th = TestHelper::new();
    th.setx(ENTINFO, "report", b"/abs/old.txt,work,urgent")?;
    th.setx(ENTINFO, "report", b"/abs/new.txt,home")?;

    let (path, tags) = th.registration("report")?;
    assert_eq!(path, "/abs/new.txt");
    assert_eq!(tags, vec!["home"]);

    // memberships the new set doesn't carry are gone
    assert_eq!(th.readdir_names("/@work")?, Vec::<String>::new());
    Ok(())
}

#[test]
fn test_malformed_values() -> TestResult {
    let th = TestHelper::new();
    assert_errno(th.setx(ENTINFO, "report", b""), EINVAL);
    assert_errno(th.setx(ENTINFO, "report", b"relative,work"), EINVAL);
    assert_errno(th.setx(ENTINFO, "report", b"/abs/only-path"), EINVAL);
    assert_errno(th.setx(ENTINFO, "report", b"/abs/path,Bad Tag"), EINVAL);
    assert_errno(th.setx(ENTINFO, "report", b"/abs/path,tag9"), EINVAL);
    // nothing half-registered sticks around
    assert_errno(th.getx(ENTINFO, "report"), ENODATA);
    Ok(())
}

#[test]
fn test_bad_entity_names() {
    let th = TestHelper::new();
    assert_errno(th.setx(ENTINFO, "@report", b"/abs/p,work"), EINVAL);
    assert_errno(th.setx(ENTINFO, ".tagdir_entinfo", b"/abs/p,work"), EINVAL);
    assert_errno(th.setx(ENTINFO, "", b"/abs/p,work"), EINVAL);
}

#[test]
fn test_duplicate_real_path_is_rejected() -> TestResult {
    let th = TestHelper::new();
    th.setx(ENTINFO, "one", b"/abs/same,work")?;
    assert!(th.setx(ENTINFO, "two", b"/abs/same,work").is_err());
    Ok(())
}

#[test]
fn test_deregistration() -> TestResult {
    let th = TestHelper::new();
    th.setx(ENTINFO, "report", b"/abs/report.txt,work")?;

    th.removex(ENTINFO, "report")?;

    assert_errno(th.getx(ENTINFO, "report"), ENODATA);
    assert_eq!(th.listx(ENTINFO)?, Vec::<String>::new());
    // the tag survives its last member
    assert_eq!(th.readdir_names("/")?, vec![".tagdir_entinfo", "@work"]);
    Ok(())
}

#[test]
fn test_deregistration_of_unknown_entity() {
    let th = TestHelper::new();
    assert_errno(th.removex(ENTINFO, "ghost"), ENODATA);
}

#[test]
fn test_unknown_entity_lookup() {
    let th = TestHelper::new();
    assert_errno(th.getx(ENTINFO, "ghost"), ENODATA);
}
