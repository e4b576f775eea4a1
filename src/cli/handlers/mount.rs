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
use super::TAG;
use crate::cli::CliError;
use crate::common::mounts;
use crate::common::settings::Settings;
use crate::sql::tpool::ThreadConnPool;
use crate::watch::PathWatcher;
use crate::{common, fuse, sql};
use clap::ArgMatches;
use log::{debug, info};
use nix::unistd::{fork, ForkResult};
use rusqlite::Connection;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub fn handle(args: &ArgMatches, settings: &Settings) -> Result<(), Box<dyn Error>> {
    info!(target: TAG, "Running mount");
    let name = args.value_of("name").expect("Name required!");

    // one device per name
    if mounts::find_mountpoint(Some(name))?.is_some() {
        return Err(CliError::AlreadyMounted(name.to_string()).into());
    }

    let mountpoint = PathBuf::from(args.value_of("mountpoint").expect("Mountpoint required!"));
    println!("Mounting to {:?}", mountpoint);

    // fuse mounts over an existing directory
    if !mountpoint.exists() {
        return Err(CliError::InvalidMountDir(mountpoint).into());
    }

    let db_path = PathBuf::from(args.value_of("db").expect("Db required!"));
    let conf = settings.get_config();

    let mut conn = match Connection::open(&db_path) {
        Err(_why) => return Err("Couldn't open database".into()),
        Ok(c) => c,
    };

    debug!(target: TAG, "Running migrations");
    sql::migrations::migrate(
        &mut conn,
        &common::version_str(),
        conf.mount.uid,
        conf.mount.gid,
    )?;
    drop(conn);

    let conn_pool = ThreadConnPool::new(db_path.clone());

    let fuse_conf = fuse::util::make_fuse_config();
    let mount_conf = fuse::util::make_mount_config(name);

    let foreground = args.is_present("interactive");

    if foreground {
        info!(
            target: TAG,
            "Mounting {} to {}",
            db_path.display(),
            mountpoint.display()
        );

        // the watcher comes up before the handlers are reachable
        let watcher = PathWatcher::spawn(db_path)?;

        let term = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::SIGINT, Arc::clone(&term))?;
        signal_hook::flag::register(signal_hook::SIGTERM, Arc::clone(&term))?;

        let fsh = fuse::TagdirFilesystem::new(conn_pool, Some(watcher.handle()));
        let mount_handle = fuse_shim::mount(&mountpoint, fsh, false, fuse_conf, mount_conf)?;

        while !term.load(Ordering::Relaxed) {
            thread::sleep(std::time::Duration::from_millis(100));
        }
        info!(target: TAG, "Got a signal, unmounting and cleaning up");

        // dropping the handle unmounts and drains in-flight handlers, then
        // the watcher can go
        drop(mount_handle);
        watcher.stop();
        Ok(())
    } else {
        debug!(target: TAG, "Forking into the background...");
        match fork().expect("Fork failed") {
            ForkResult::Parent { child } => {
                debug!(target: TAG, "Forked PID {}, now exiting", child);
                println!("Forked into background PID {}", child);
                Ok(())
            }
            ForkResult::Child => {
                let watcher = PathWatcher::spawn(db_path)?;

                let fsh = fuse::TagdirFilesystem::new(conn_pool, Some(watcher.handle()));
                let mount_handle =
                    fuse_shim::mount(&mountpoint, fsh, false, fuse_conf, mount_conf)?;
                debug!(target: TAG, "Waiting on mount handle");
                mount_handle.lock().wait();
                debug!(target: TAG, "Done waiting on mount handle");

                drop(mount_handle);
                watcher.stop();
                Ok(())
            }
        }
    }
}
