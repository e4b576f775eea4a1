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
use libc::{gid_t, uid_t};
use rusqlite::Result as SqliteResult;
use rusqlite::{params, Transaction, NO_PARAMS};

pub fn migrate(tx: &Transaction, uid: uid_t, gid: gid_t, now: i64) -> SqliteResult<()> {
    // our metadata table for future proofing
    tx.execute(
        "CREATE TABLE IF NOT EXISTS tagdir_meta (
            migration_version INTEGER NOT NULL DEFAULT 0,
            tagdir_version TEXT NOT NULL
        )",
        NO_PARAMS,
    )?;

    tx.execute(
        "INSERT INTO tagdir_meta
        (migration_version, tagdir_version)
        VALUES (0, '0.0.0')",
        NO_PARAMS,
    )?;

    // every synthetic node owns exactly one attr row
    tx.execute(
        "CREATE TABLE IF NOT EXISTS attrs (
            id INTEGER PRIMARY KEY NOT NULL,
            st_mode INTEGER NOT NULL,
            st_uid INTEGER NOT NULL,
            st_gid INTEGER NOT NULL,
            st_atime INTEGER NOT NULL,
            st_mtime INTEGER NOT NULL,
            st_ctime INTEGER NOT NULL
        )",
        NO_PARAMS,
    )?;

    // the root dir attr has to land on row id 1, the reserved entinfo file's
    // attr on row id 2
    tx.execute(
        "INSERT INTO attrs (st_mode, st_uid, st_gid, st_atime, st_mtime, st_ctime)
        VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
        params![
            (libc::S_IFDIR | 0o644) as i64,
            uid as i64,
            gid as i64,
            now
        ],
    )?;
    tx.execute(
        "INSERT INTO attrs (st_mode, st_uid, st_gid, st_atime, st_mtime, st_ctime)
        VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
        params![
            (libc::S_IFREG | 0o644) as i64,
            uid as i64,
            gid as i64,
            now
        ],
    )?;

    // tags manifest as the top-level directories
    tx.execute(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY NOT NULL,
            tag_name TEXT NOT NULL UNIQUE,
            attr_id INTEGER NOT NULL,
            FOREIGN KEY (attr_id) REFERENCES attrs (id)
        )",
        NO_PARAMS,
    )?;

    // entities reference real paths on the host filesystem; both the name
    // and the path are unique across the mount
    tx.execute(
        "CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY NOT NULL,
            entity_name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL UNIQUE,
            attr_id INTEGER NOT NULL,
            FOREIGN KEY (attr_id) REFERENCES attrs (id)
        )",
        NO_PARAMS,
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS tagging (
            entity_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (entity_id, tag_id),
            FOREIGN KEY (entity_id) REFERENCES entities (id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE
        )",
        NO_PARAMS,
    )?;

    Ok(())
}
