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
use crate::common::types::valid_tag_name;
use clap::{Arg, SubCommand};

pub struct ArgDefaults {
    pub uid: String,
    pub gid: String,
    pub mount_perms: String,
}

type ValidatorResult = Result<(), String>;

fn name_validator(v: String) -> ValidatorResult {
    if valid_tag_name(&v) {
        Ok(())
    } else {
        Err(format!("{} is not a valid name, [a-z]+ is required", v))
    }
}

fn id_validator(v: String) -> ValidatorResult {
    let _ = v
        .parse::<u32>()
        .map_err(|_| format!("{} is not a valid id", v))?;
    Ok(())
}

fn perm_validator(v: String) -> ValidatorResult {
    u32::from_str_radix(&v, 8).map_err(|_| format!("{} is not a valid octal number", v))?;
    Ok(())
}

fn name_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("name")
        .help("Which Tagdir mount to talk to.  Optional when exactly one is mounted.")
        .long("--name")
        .takes_value(true)
        .validator(name_validator)
}

fn tags_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("tags")
        .help("One or more tag names, [a-z]+ each.")
        .required(true)
        .multiple(true)
        .validator(name_validator)
}

pub fn add_subcommands<'a, 'b>(
    app: clap::App<'a, 'b>,
    defaults: &'a ArgDefaults,
) -> clap::App<'a, 'b> {
    app.subcommand(
        SubCommand::with_name("mount")
            .about("Mounts a Tagdir filesystem")
            .arg(
                Arg::with_name("name")
                    .help("Mount name, registered as device Tagdir_<name>.")
                    .required(true)
                    .validator(name_validator)
                    .takes_value(true),
            )
            .arg(
                Arg::with_name("db")
                    .help("Path of the sqlite database.  Created on first mount.")
                    .required(true)
                    .takes_value(true),
            )
            .arg(
                Arg::with_name("mountpoint")
                    .help("An existing directory to mount over.")
                    .required(true)
                    .takes_value(true),
            )
            .arg(
                Arg::with_name("interactive")
                    .help("Stay in the foreground and log to stdout.")
                    .short("-i"),
            )
            .arg(
                Arg::with_name("level")
                    .help("Log verbosity.")
                    .long("--level")
                    .takes_value(true)
                    .possible_values(&["debug", "error"])
                    .default_value("error"),
            )
            .arg(
                Arg::with_name("uid")
                    .help("The UID owning the mounted directory.  Defaults to the process owner.")
                    .default_value(&defaults.uid)
                    .validator(id_validator)
                    .long("--uid"),
            )
            .arg(
                Arg::with_name("gid")
                    .help("The GID owning the mounted directory.  Defaults to the process group.")
                    .default_value(&defaults.gid)
                    .validator(id_validator)
                    .long("--gid"),
            )
            .arg(
                Arg::with_name("permissions")
                    .help("Octal permissions of the mounted directory.  Defaults from the umask.")
                    .default_value(&defaults.mount_perms)
                    .validator(perm_validator)
                    .long("--permissions"),
            ),
    )
    .subcommand(
        SubCommand::with_name("mktag")
            .about("Creates tags")
            .arg(name_arg())
            .arg(tags_arg()),
    )
    .subcommand(
        SubCommand::with_name("rmtag")
            .about("Removes tags and every membership of them")
            .arg(name_arg())
            .arg(tags_arg()),
    )
    .subcommand(
        SubCommand::with_name("tag")
            .about("Tags a real path, registering it on first use")
            .arg(name_arg())
            .arg(
                Arg::with_name("path")
                    .help("The real file or directory to tag.")
                    .required(true)
                    .takes_value(true),
            )
            .arg(tags_arg()),
    )
    .subcommand(
        SubCommand::with_name("untag")
            .about("Removes tags from a tagged path")
            .arg(name_arg())
            .arg(
                Arg::with_name("path")
                    .help("The real file or directory to untag.")
                    .required(true)
                    .takes_value(true),
            )
            .arg(tags_arg()),
    )
    .subcommand(
        SubCommand::with_name("listag")
            .about("Lists all tags, or the tags of one tagged path")
            .arg(name_arg())
            .arg(
                Arg::with_name("path")
                    .help("A tagged real path.  Without it, every tag is listed.")
                    .takes_value(true),
            ),
    )
}
