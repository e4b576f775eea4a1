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

use super::constants;
use directories::ProjectDirs;
use log::debug;
use parking_lot::RwLock;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod config;

const TAG: &str = "settings";

/// `Settings` combines the merged configuration with the platform-specific
/// project directories.  One instance serves the whole process.
pub struct Settings {
    config: RwLock<Option<config::Config>>,
    merged_config: ::config::Config,
    project_dirs: Arc<ProjectDirs>,
}

fn ensure_dir(path: impl AsRef<Path>) -> std::io::Result<()> {
    debug!(
        target: TAG,
        "Ensuring dir {} exists",
        path.as_ref().display()
    );
    if !path.as_ref().exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

fn ensure_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    debug!(
        target: TAG,
        "Ensuring file {} exists",
        path.as_ref().display()
    );
    if !path.as_ref().exists() {
        let mut f = std::fs::File::create(&path)?;
        f.write_all(contents.as_ref())?;
    }
    Ok(())
}

impl Settings {
    pub fn new(project_dirs: Arc<ProjectDirs>) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = Settings {
            config: Default::default(),
            merged_config: Default::default(),
            project_dirs,
        };
        settings.ensure_config_files()?;
        Ok(settings)
    }

    fn ensure_config_files(&self) -> std::io::Result<()> {
        ensure_dir(self.config_dir())?;
        ensure_dir(self.data_dir())?;
        ensure_file(self.base_config_file(), constants::DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Makes sure the per-mount directories (logs, db parent) exist.
    pub fn ensure_mount_files(&self, name: &str) -> std::io::Result<()> {
        ensure_dir(self.mount_dir(name))?;
        ensure_dir(self.log_dir(name))?;
        Ok(())
    }

    pub fn update_config<T>(&mut self, merged_config: T)
    where
        T: ::config::Source + Send + Sync + 'static,
    {
        let mut guard = self.config.write();
        self.merged_config
            .merge(merged_config)
            .expect("Couldn't merge in new config");
        let frozen = self.merged_config.clone().try_into().unwrap();
        *guard = Some(frozen);
    }

    pub fn get_config(&self) -> config::Config {
        let guard = self.config.read();
        guard.as_ref().expect("Config not set!").clone()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.project_dirs.data_local_dir().to_owned()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.project_dirs.config_dir().to_owned()
    }

    pub fn mounts_dir(&self) -> PathBuf {
        self.data_dir().join("mounts")
    }

    pub fn mount_dir(&self, name: &str) -> PathBuf {
        self.mounts_dir().join(name)
    }

    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.mount_dir(name).join("logs/")
    }

    pub fn base_config_file(&self) -> PathBuf {
        self.config_dir().join("config.toml")
    }
}
