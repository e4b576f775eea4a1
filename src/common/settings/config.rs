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

use crate::common::constants;
use crate::common::types::file_perms::Permissions;
use ::config::{ConfigError, Source, Value};
use libc::{gid_t, uid_t};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HashMapSource(pub HashMap<String, config::Value>);

impl config::Source for HashMapSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Mount settings.  They apply to the root of the mounted tree; everything
/// underneath carries the attrs persisted in the store.
#[derive(Serialize, Deserialize, Clone)]
pub struct Mount {
    pub uid: uid_t,
    pub gid: gid_t,
    pub permissions: Permissions,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    pub mount: Mount,
}

/// Builds the merged config from our default toml, the user's config file
/// (via `sources`), and environment variables.
pub fn build<T>(source: T) -> ::config::Config
where
    T: config::Source + Send + Sync + 'static,
{
    let mut merged_config = config::Config::new();

    merged_config
        .merge(config::File::from_str(
            constants::DEFAULT_CONFIG_TOML,
            config::FileFormat::Toml,
        ))
        .expect("Unable to merge default config")
        .merge(source)
        .expect("Unable to merge app config")
        .merge(config::Environment::with_prefix(constants::ENV_PREFIX))
        .expect("Unable to merge settings from environment variables");

    merged_config
}
