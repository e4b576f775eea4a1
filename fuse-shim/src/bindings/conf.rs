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

//-o hard_remove         immediate removal (don't hide files)
//-o direct_io           use direct I/O
//-o kernel_cache        cache files in kernel
//-o [no]auto_cache      enable caching based on modification times (off)
//-o entry_timeout=T     cache timeout for names (1.0s)
//-o negative_timeout=T  cache timeout for deleted names (0.0s)
//-o attr_timeout=T      cache timeout for attributes (1.0s)
//-o intr                allow requests to be interrupted
//-o max_write=N         set maximum size of write requests
//-o big_writes          enable larger than 4kB writes
pub struct FuseConfig {
    pub hard_remove: Option<bool>,
    pub direct_io: Option<bool>,
    pub kernel_cache: Option<bool>,
    pub auto_cache: Option<bool>,
    pub entry_timeout: Option<i32>,
    pub negative_timeout: Option<i32>,
    pub attr_timeout: Option<i32>,
    pub intr: Option<bool>,
    pub max_write: Option<i32>,
    pub big_writes: Option<bool>,
}

impl Default for FuseConfig {
    fn default() -> Self {
        FuseConfig {
            hard_remove: None,
            direct_io: None,
            kernel_cache: None,
            auto_cache: None,
            entry_timeout: None,
            negative_timeout: None,
            attr_timeout: None,
            intr: None,
            max_write: None,
            big_writes: None,
        }
    }
}

macro_rules! opt_expand {
    (bool, $conf:ident, $args:ident, $name:ident) => {
        if let Some(true) = $conf.$name {
            $args.push(String::from(format!("-o{}", stringify!($name))));
        }
    };
    (int, $conf:ident, $args:ident, $name:ident) => {
        if let Some(val) = $conf.$name {
            $args.push(String::from(format!("-o{}={}", stringify!($name), val)));
        }
    };
    (str, $conf:ident, $args:ident, $name:ident) => {
        if let Some(val) = $conf.$name {
            $args.push(String::from(format!("-o{}={}", stringify!($name), val)));
        }
    };
}

impl From<FuseConfig> for Vec<String> {
    fn from(conf: FuseConfig) -> Self {
        let mut args: Vec<String> = Vec::new();

        opt_expand!(bool, conf, args, hard_remove);
        opt_expand!(bool, conf, args, direct_io);
        opt_expand!(bool, conf, args, kernel_cache);
        opt_expand!(bool, conf, args, auto_cache);
        opt_expand!(int, conf, args, entry_timeout);
        opt_expand!(int, conf, args, negative_timeout);
        opt_expand!(int, conf, args, attr_timeout);
        opt_expand!(bool, conf, args, intr);
        opt_expand!(int, conf, args, max_write);
        opt_expand!(bool, conf, args, big_writes);

        args
    }
}

//-o allow_other         allow access to other users
//-o allow_root          allow access to root
//-o auto_unmount        auto unmount on process termination
//-o nonempty            allow mounts over non-empty file/dir
//-o default_permissions enable permission checking by kernel
//-o fsname=NAME         set filesystem name
//-o subtype=NAME        set filesystem type
//-o max_read=N          set maximum size of read requests
pub struct MountConfig {
    pub allow_other: Option<bool>,
    pub allow_root: Option<bool>,
    pub auto_unmount: Option<bool>,
    pub nonempty: Option<bool>,
    pub default_permissions: Option<bool>,
    pub fsname: Option<String>,
    pub subtype: Option<String>,
    pub max_read: Option<i32>,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            allow_other: None,
            allow_root: None,
            auto_unmount: None,
            nonempty: None,
            default_permissions: None,
            fsname: None,
            subtype: None,
            max_read: None,
        }
    }
}

impl From<MountConfig> for Vec<String> {
    fn from(conf: MountConfig) -> Self {
        let mut args: Vec<String> = Vec::new();

        opt_expand!(bool, conf, args, allow_other);
        opt_expand!(bool, conf, args, allow_root);
        opt_expand!(bool, conf, args, auto_unmount);
        opt_expand!(bool, conf, args, nonempty);
        opt_expand!(bool, conf, args, default_permissions);
        opt_expand!(str, conf, args, fsname);
        opt_expand!(str, conf, args, subtype);
        opt_expand!(int, conf, args, max_read);

        args
    }
}
