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

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

use crate::sql;
use log::trace;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::PathBuf;

const TAG: &str = "db_thread_pool";

// A connection is handed out as Arc<Mutex<RefCell<Connection>>>: the Arc
// because the map keeps one too, the Mutex because nothing stops another
// thread from holding a clone, and the RefCell because starting a
// transaction needs &mut Connection.
type PooledConn = Arc<Mutex<RefCell<Connection>>>;

/// Lazily opens one database connection per requesting thread and hands the
/// same one back on every later call from that thread.  Request handlers run
/// on whatever thread libfuse picked, so this is what "a session per
/// request" looks like in practice: sessions never migrate across threads.
pub struct ThreadConnPool {
    pool: Mutex<HashMap<ThreadId, PooledConn>>,
    db_path: PathBuf,
}

impl ThreadConnPool {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
            db_path,
        }
    }

    pub fn raw_conn(&self) -> Connection {
        sql::get_conn(&self.db_path).expect("Couldn't create db connection")
    }

    pub fn get_conn(&self) -> PooledConn {
        let tid = std::thread::current().id();
        trace!(target: TAG, "Getting a db connection for {:?}", tid);

        let mut pool = self.pool.lock();
        match pool.get(&tid) {
            Some(conn) => Arc::clone(conn),
            None => {
                // opening the connection under the map lock briefly stalls
                // other threads' lookups, which is fine: it happens once per
                // thread over the life of the mount
                trace!(target: TAG, "No existing db connection, creating");
                let conn = Arc::new(Mutex::new(RefCell::new(self.raw_conn())));
                pool.insert(tid, Arc::clone(&conn));
                conn
            }
        }
    }
}
