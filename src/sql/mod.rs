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

use rusqlite::{params, Connection, Row, ToSql, Transaction, NO_PARAMS};
use rusqlite::{OptionalExtension, Result};

use crate::common::constants::{ENTINFO_ATTR_ID, ROOT_ATTR_ID};
use libc::{gid_t, mode_t, uid_t};
use log::{debug, error, info, trace, warn};
use std::path::Path;

pub mod migrations;
pub mod tpool;
pub mod types;

use types::*;

pub const SQL_TAG: &str = "sql";
pub const MAX_CONN: u32 = 50;

/// Mode bits for a freshly created synthetic directory node (tags, entities,
/// the root) and for the reserved file.
pub const DIR_ATTR_MODE: mode_t = libc::S_IFDIR | 0o644;
pub const FILE_ATTR_MODE: mode_t = libc::S_IFREG | 0o644;

// sqlite only natively supports i64, so mode/uid/gid round-trip through
// casts.  the bytes are preserved, so casting back yields the original.

/// Returns a correct connection with a very permissive contention handler
pub fn get_conn<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    trace!(target: SQL_TAG, "Opening {:?}", db_path.as_ref());
    let conn = Connection::open(&db_path)?;
    trace!(target: SQL_TAG, "Opened {:?}", db_path.as_ref());

    trace!(target: SQL_TAG, "Enabling foreign keys");
    // so we get cascading deletes in the tagging relation
    conn.execute("PRAGMA foreign_keys = 1", NO_PARAMS)?;
    trace!(target: SQL_TAG, "Installing busy handler");
    conn.busy_handler(Some(|num| -> bool {
        if num >= MAX_CONN as i32 {
            error!(target: SQL_TAG, "Timed out waiting for connection lock");
            false
        } else {
            warn!(
                target: SQL_TAG,
                "Sqlite database contention!  Tried {} times to acquire lock.  Trying again soon...",
                num + 1
            );
            std::thread::sleep(std::time::Duration::from_millis(100));
            true
        }
    }))?;
    Ok(conn)
}

pub fn get_now_secs() -> i64 {
    let now = std::time::SystemTime::now();
    let unix_ts = now.duration_since(std::time::UNIX_EPOCH).unwrap();
    unix_ts.as_secs() as i64
}

fn attr_from_row(row: &Row, offset: usize) -> Result<Attr> {
    Ok(Attr {
        id: row.get(offset)?,
        mode: row.get::<usize, i64>(offset + 1)? as mode_t,
        uid: row.get::<usize, i64>(offset + 2)? as uid_t,
        gid: row.get::<usize, i64>(offset + 3)? as gid_t,
        atime: row.get(offset + 4)?,
        mtime: row.get(offset + 5)?,
        ctime: row.get(offset + 6)?,
    })
}

fn to_attr(row: &Row) -> Result<Attr> {
    attr_from_row(row, 0)
}

fn to_tag(row: &Row) -> Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        attr: attr_from_row(row, 2)?,
    })
}

fn to_entity(row: &Row) -> Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        attr: attr_from_row(row, 3)?,
    })
}

const ATTR_COLS: &str = "a.id, a.st_mode, a.st_uid, a.st_gid, a.st_atime, a.st_mtime, a.st_ctime";

/// A convenience method that builds a string of sqlite placeholders
fn make_params(num: usize, offset: usize) -> String {
    let mut param_offset = offset + 1;
    let mut params = vec![];
    for _ in 0..num {
        params.push(format!("?{}", param_offset));
        param_offset += 1;
    }
    params.join(",")
}

//
// attrs
//

pub fn create_attr(
    tx: &Transaction,
    mode: mode_t,
    uid: uid_t,
    gid: gid_t,
    now: i64,
) -> Result<i64> {
    tx.execute(
        "INSERT INTO attrs (st_mode, st_uid, st_gid, st_atime, st_mtime, st_ctime)
        VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
        params![mode as i64, uid as i64, gid as i64, now],
    )?;
    Ok(tx.last_insert_rowid())
}

fn delete_attr(tx: &Transaction, attr_id: i64) -> Result<()> {
    tx.execute("DELETE FROM attrs WHERE id=?1", params![attr_id])?;
    Ok(())
}

pub fn get_attr(conn: &Connection, attr_id: i64) -> Result<Option<Attr>> {
    conn.query_row(
        "SELECT id, st_mode, st_uid, st_gid, st_atime, st_mtime, st_ctime
        FROM attrs WHERE id=?1",
        params![attr_id],
        to_attr,
    )
    .optional()
}

/// The root attr row is seeded at bootstrap, so its absence is a hard error.
pub fn get_root_attr(conn: &Connection) -> Result<Attr> {
    get_attr(conn, ROOT_ATTR_ID)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_entinfo_attr(conn: &Connection) -> Result<Attr> {
    get_attr(conn, ENTINFO_ATTR_ID)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn set_attr_mode(tx: &Transaction, attr_id: i64, mode: mode_t, now: i64) -> Result<()> {
    debug!(
        target: SQL_TAG,
        "Setting mode {:o} on attr {}", mode, attr_id
    );
    // permission bits only, the file type of a node never changes
    tx.execute(
        "UPDATE attrs SET st_mode=((st_mode & ?1) | ?2), st_ctime=?3 WHERE id=?4",
        params![
            libc::S_IFMT as i64,
            (mode & 0o7777) as i64,
            now,
            attr_id
        ],
    )?;
    Ok(())
}

pub fn set_attr_owner(
    tx: &Transaction,
    attr_id: i64,
    uid: uid_t,
    gid: gid_t,
    now: i64,
) -> Result<()> {
    debug!(
        target: SQL_TAG,
        "Setting owner {}:{} on attr {}", uid, gid, attr_id
    );
    tx.execute(
        "UPDATE attrs SET st_uid=?1, st_gid=?2, st_ctime=?3 WHERE id=?4",
        params![uid as i64, gid as i64, now, attr_id],
    )?;
    Ok(())
}

pub fn set_attr_times(tx: &Transaction, attr_id: i64, atime: i64, mtime: i64) -> Result<()> {
    tx.execute(
        "UPDATE attrs SET st_atime=?1, st_mtime=?2 WHERE id=?3",
        params![atime, mtime, attr_id],
    )?;
    Ok(())
}

fn touch_attr(tx: &Transaction, attr_id: i64, now: i64) -> Result<()> {
    tx.execute(
        "UPDATE attrs SET st_mtime=?1, st_ctime=?1 WHERE id=?2",
        params![now, attr_id],
    )?;
    Ok(())
}

/// Creating or removing top-level nodes shows up as root directory changes.
fn touch_root(tx: &Transaction, now: i64) -> Result<()> {
    touch_attr(tx, ROOT_ATTR_ID, now)
}

//
// tags
//

pub fn get_tag(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let query = format!(
        "SELECT t.id, t.tag_name, {}
        FROM tags AS t JOIN attrs AS a ON a.id=t.attr_id
        WHERE t.tag_name=?1",
        ATTR_COLS
    );
    conn.query_row(&query, params![name], to_tag).optional()
}

pub fn get_all_tags(conn: &Connection) -> Result<Vec<Tag>> {
    info!(target: SQL_TAG, "Getting all tags");
    let query = format!(
        "SELECT t.id, t.tag_name, {}
        FROM tags AS t JOIN attrs AS a ON a.id=t.attr_id
        ORDER BY t.tag_name",
        ATTR_COLS
    );
    trace!(target: SQL_TAG, "{}", query);
    conn.prepare(&query)?.query_map(NO_PARAMS, to_tag)?.collect()
}

/// Returns `true` if the tag named `name` exists
pub fn tag_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM tags WHERE tag_name=?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Checks the whole chain in one query.
pub fn all_tags_exist(conn: &Connection, names: &[String]) -> Result<bool> {
    if names.is_empty() {
        return Ok(true);
    }
    let query = format!(
        "SELECT COUNT(*) FROM tags WHERE tag_name IN ({})",
        make_params(names.len(), 0)
    );
    let sql_params: Vec<Box<dyn ToSql>> = names
        .iter()
        .map(|n| Box::new(n.to_owned()) as Box<dyn ToSql>)
        .collect();
    let found: i64 = conn.query_row(&query, sql_params, |row| row.get(0))?;
    Ok(found as usize == names.len())
}

/// Creates the tag with a fresh attr row.  The unique constraint on the name
/// surfaces duplicate creation as a constraint violation.
pub fn create_tag(tx: &Transaction, name: &str, uid: uid_t, gid: gid_t, now: i64) -> Result<i64> {
    info!(target: SQL_TAG, "Creating tag {}", name);

    let attr_id = create_attr(tx, DIR_ATTR_MODE, uid, gid, now)?;
    tx.execute(
        "INSERT INTO tags (tag_name, attr_id) VALUES (?1, ?2)",
        params![name, attr_id],
    )?;
    let tag_id = tx.last_insert_rowid();

    // a new tag appears under the root listing
    touch_root(tx, now)?;
    Ok(tag_id)
}

/// Ensures a tag exists, creating it if needed.  Answers the tag id.
pub fn ensure_tag(tx: &Transaction, name: &str, uid: uid_t, gid: gid_t, now: i64) -> Result<i64> {
    debug!(target: SQL_TAG, "Ensuring tag {} exists", name);
    match get_tag(tx, name)? {
        Some(tag) => Ok(tag.id),
        None => create_tag(tx, name, uid, gid, now),
    }
}

/// Removes a tag and cascades: every membership of the tag goes away, and any
/// entity left without tags is deleted outright.  Answers the real paths of
/// the deleted entities, or `None` if the tag didn't exist.
pub fn remove_tag(tx: &Transaction, name: &str, now: i64) -> Result<Option<Vec<String>>> {
    info!(target: SQL_TAG, "Deleting tag {}", name);

    let tag = match get_tag(tx, name)? {
        Some(tag) => tag,
        None => return Ok(None),
    };

    // entities whose only remaining tag is this one won't survive the delete
    let orphan_query = "
SELECT e.id, e.attr_id, e.path
FROM entities AS e
JOIN tagging AS ti ON ti.entity_id=e.id
WHERE
    ti.tag_id=?1
    AND NOT EXISTS (
        SELECT 1 FROM tagging AS other
        WHERE other.entity_id=e.id AND other.tag_id != ?1
    )";
    trace!(target: SQL_TAG, "{}", orphan_query);
    let orphans: Vec<(i64, i64, String)> = tx
        .prepare(orphan_query)?
        .query_map(params![tag.id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>>>()?;

    debug!(
        target: SQL_TAG,
        "Tag {} leaves {} orphaned entities",
        name,
        orphans.len()
    );

    for (entity_id, attr_id, _path) in &orphans {
        tx.execute("DELETE FROM entities WHERE id=?1", params![entity_id])?;
        delete_attr(tx, *attr_id)?;
    }

    // remaining memberships cascade away with the tag row
    tx.execute("DELETE FROM tags WHERE id=?1", params![tag.id])?;
    delete_attr(tx, tag.attr.id)?;

    touch_root(tx, now)?;
    Ok(Some(orphans.into_iter().map(|(_, _, path)| path).collect()))
}

//
// entities
//

pub fn get_entity(conn: &Connection, name: &str) -> Result<Option<Entity>> {
    let query = format!(
        "SELECT e.id, e.entity_name, e.path, {}
        FROM entities AS e JOIN attrs AS a ON a.id=e.attr_id
        WHERE e.entity_name=?1",
        ATTR_COLS
    );
    conn.query_row(&query, params![name], to_entity).optional()
}

pub fn get_all_entities(conn: &Connection) -> Result<Vec<Entity>> {
    info!(target: SQL_TAG, "Getting all entities");
    let query = format!(
        "SELECT e.id, e.entity_name, e.path, {}
        FROM entities AS e JOIN attrs AS a ON a.id=e.attr_id
        ORDER BY e.entity_name",
        ATTR_COLS
    );
    conn.prepare(&query)?
        .query_map(NO_PARAMS, to_entity)?
        .collect()
}

/// Set containment, not a graph walk: does the entity carry every listed tag?
pub fn entity_has_tags(conn: &Connection, entity_id: i64, tags: &[String]) -> Result<bool> {
    if tags.is_empty() {
        return Ok(true);
    }
    let query = format!(
        "SELECT COUNT(DISTINCT t.id)
        FROM tagging AS ti
        JOIN tags AS t ON t.id=ti.tag_id
        WHERE ti.entity_id=?1 AND t.tag_name IN ({})",
        make_params(tags.len(), 1)
    );
    let mut sql_params: Vec<Box<dyn ToSql>> = vec![Box::new(entity_id)];
    sql_params.extend(
        tags.iter()
            .map(|t| Box::new(t.to_owned()) as Box<dyn ToSql>),
    );
    let found: i64 = conn.query_row(&query, sql_params, |row| row.get(0))?;
    Ok(found as usize == tags.len())
}

/// The entity named `name`, but only if its tag set covers `tags`.
pub fn get_entity_with_tags(
    conn: &Connection,
    name: &str,
    tags: &[String],
) -> Result<Option<Entity>> {
    match get_entity(conn, name)? {
        Some(entity) => {
            if entity_has_tags(conn, entity.id, tags)? {
                Ok(Some(entity))
            } else {
                Ok(None)
            }
        }
        None => Ok(None),
    }
}

/// All entities whose tag set is a superset of `tags`, name order.
pub fn entities_tagged_with(conn: &Connection, tags: &[String]) -> Result<Vec<Entity>> {
    if tags.is_empty() {
        return get_all_entities(conn);
    }
    let query = format!(
        "SELECT e.id, e.entity_name, e.path, {attrs}
        FROM entities AS e
        JOIN attrs AS a ON a.id=e.attr_id
        JOIN tagging AS ti ON ti.entity_id=e.id
        JOIN tags AS t ON t.id=ti.tag_id
        WHERE t.tag_name IN ({placeholders})
        GROUP BY e.id
        HAVING COUNT(DISTINCT t.id) = ?{count_param}
        ORDER BY e.entity_name",
        attrs = ATTR_COLS,
        placeholders = make_params(tags.len(), 0),
        count_param = tags.len() + 1,
    );
    trace!(target: SQL_TAG, "{}", query);

    let mut sql_params: Vec<Box<dyn ToSql>> = tags
        .iter()
        .map(|t| Box::new(t.to_owned()) as Box<dyn ToSql>)
        .collect();
    sql_params.push(Box::new(tags.len() as i64));

    conn.prepare(&query)?.query_map(sql_params, to_entity)?.collect()
}

pub fn entity_tag_names(conn: &Connection, entity_id: i64) -> Result<Vec<String>> {
    conn.prepare(
        "SELECT t.tag_name
        FROM tags AS t
        JOIN tagging AS ti ON ti.tag_id=t.id
        WHERE ti.entity_id=?1
        ORDER BY t.tag_name",
    )?
    .query_map(params![entity_id], |row| row.get(0))?
    .collect()
}

/// Adds memberships, skipping ones already present.
pub fn add_taggings(tx: &Transaction, entity_id: i64, tags: &[String], now: i64) -> Result<()> {
    for tag in tags {
        debug!(
            target: SQL_TAG,
            "Linking entity {} to tag {}", entity_id, tag
        );
        tx.execute(
            "INSERT OR IGNORE INTO tagging (entity_id, tag_id)
            VALUES (?1, (SELECT id FROM tags WHERE tag_name=?2))",
            params![entity_id, tag],
        )?;
        tx.execute(
            "UPDATE attrs SET st_mtime=?1, st_ctime=?1
            WHERE id=(SELECT attr_id FROM tags WHERE tag_name=?2)",
            params![now, tag],
        )?;
    }
    Ok(())
}

/// Removes memberships; if the entity ends up tagless it is deleted.
/// Answers whether the entity row still exists.
pub fn remove_taggings(
    tx: &Transaction,
    entity: &Entity,
    tags: &[String],
    now: i64,
) -> Result<bool> {
    for tag in tags {
        debug!(
            target: SQL_TAG,
            "Unlinking entity {} from tag {}", entity.name, tag
        );
        tx.execute(
            "DELETE FROM tagging
            WHERE entity_id=?1 AND tag_id=(SELECT id FROM tags WHERE tag_name=?2)",
            params![entity.id, tag],
        )?;
        tx.execute(
            "UPDATE attrs SET st_mtime=?1, st_ctime=?1
            WHERE id=(SELECT attr_id FROM tags WHERE tag_name=?2)",
            params![now, tag],
        )?;
    }

    let remaining: i64 = tx.query_row(
        "SELECT COUNT(*) FROM tagging WHERE entity_id=?1",
        params![entity.id],
        |row| row.get(0),
    )?;

    if remaining == 0 {
        info!(
            target: SQL_TAG,
            "Entity {} has no tags left, deleting", entity.name
        );
        tx.execute("DELETE FROM entities WHERE id=?1", params![entity.id])?;
        delete_attr(tx, entity.attr.id)?;
        touch_root(tx, now)?;
        Ok(false)
    } else {
        Ok(true)
    }
}

/// Registers or re-registers an entity: the row is created or repointed to
/// `path`, missing tags are created, and the membership set is replaced.
pub fn upsert_entity(
    tx: &Transaction,
    name: &str,
    path: &str,
    tags: &[String],
    uid: uid_t,
    gid: gid_t,
    now: i64,
) -> Result<()> {
    info!(
        target: SQL_TAG,
        "Registering entity {} -> {} with tags {:?}", name, path, tags
    );

    for tag in tags {
        ensure_tag(tx, tag, uid, gid, now)?;
    }

    let entity_id = match get_entity(tx, name)? {
        Some(entity) => {
            tx.execute(
                "UPDATE entities SET path=?1 WHERE id=?2",
                params![path, entity.id],
            )?;
            touch_attr(tx, entity.attr.id, now)?;
            entity.id
        }
        None => {
            let attr_id = create_attr(tx, DIR_ATTR_MODE, uid, gid, now)?;
            tx.execute(
                "INSERT INTO entities (entity_name, path, attr_id) VALUES (?1, ?2, ?3)",
                params![name, path, attr_id],
            )?;
            tx.last_insert_rowid()
        }
    };

    // replace the membership set with the given one
    let query = format!(
        "DELETE FROM tagging
        WHERE entity_id=?1
        AND tag_id NOT IN (SELECT id FROM tags WHERE tag_name IN ({}))",
        make_params(tags.len(), 1)
    );
    let mut sql_params: Vec<Box<dyn ToSql>> = vec![Box::new(entity_id)];
    sql_params.extend(
        tags.iter()
            .map(|t| Box::new(t.to_owned()) as Box<dyn ToSql>),
    );
    tx.execute(&query, sql_params)?;

    add_taggings(tx, entity_id, tags, now)?;
    touch_root(tx, now)?;
    Ok(())
}

pub fn remove_entity(tx: &Transaction, name: &str, now: i64) -> Result<bool> {
    info!(target: SQL_TAG, "Deleting entity {}", name);
    match get_entity(tx, name)? {
        Some(entity) => {
            tx.execute("DELETE FROM entities WHERE id=?1", params![entity.id])?;
            delete_attr(tx, entity.attr.id)?;
            touch_root(tx, now)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

//
// watcher support
//

pub fn get_entity_by_path(conn: &Connection, path: &str) -> Result<Option<Entity>> {
    let query = format!(
        "SELECT e.id, e.entity_name, e.path, {}
        FROM entities AS e JOIN attrs AS a ON a.id=e.attr_id
        WHERE e.path=?1",
        ATTR_COLS
    );
    conn.query_row(&query, params![path], to_entity).optional()
}

/// Follows a rename of the referenced real path.  The entity stays reachable
/// under its name.
pub fn update_entity_path(
    tx: &Transaction,
    old_path: &str,
    new_path: &str,
    now: i64,
) -> Result<bool> {
    info!(
        target: SQL_TAG,
        "Repointing entity path {} -> {}", old_path, new_path
    );
    let changed = tx.execute(
        "UPDATE entities SET path=?1 WHERE path=?2",
        params![new_path, old_path],
    )?;
    if changed > 0 {
        tx.execute(
            "UPDATE attrs SET st_mtime=?1, st_ctime=?1
            WHERE id=(SELECT attr_id FROM entities WHERE path=?2)",
            params![now, new_path],
        )?;
    }
    Ok(changed > 0)
}

/// Drops the entity whose real path vanished.  Its tags persist.
pub fn remove_entity_by_path(tx: &Transaction, path: &str, now: i64) -> Result<bool> {
    info!(target: SQL_TAG, "Purging entity at path {}", path);
    match get_entity_by_path(tx, path)? {
        Some(entity) => {
            tx.execute("DELETE FROM entities WHERE id=?1", params![entity.id])?;
            delete_attr(tx, entity.attr.id)?;
            touch_root(tx, now)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn get_all_entity_paths(conn: &Connection) -> Result<Vec<String>> {
    conn.prepare("SELECT path FROM entities ORDER BY entity_name")?
        .query_map(NO_PARAMS, |row| row.get(0))?
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_params() {
        assert_eq!(make_params(3, 0), "?1,?2,?3");
        assert_eq!(make_params(2, 1), "?2,?3");
        assert_eq!(make_params(0, 0), "");
    }

    #[test]
    fn test_bootstrap_seeds_the_singleton_attrs() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::migrate(&mut conn, "0.0.0", 1000, 1000).unwrap();

        let root = get_root_attr(&conn).unwrap();
        assert_eq!(root.id, crate::common::constants::ROOT_ATTR_ID);
        assert!(root.is_dir());

        let entinfo = get_entinfo_attr(&conn).unwrap();
        assert_eq!(entinfo.id, crate::common::constants::ENTINFO_ATTR_ID);
        assert!(!entinfo.is_dir());
    }
}
