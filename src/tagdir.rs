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

//! This is the entrypoint for the commandline interface to the Tagdir ops

#![warn(
    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::expect_used,
    clippy::multiple_crate_versions,
    clippy::implicit_return,
    clippy::missing_docs_in_private_items,
    clippy::missing_inline_in_public_items,
    clippy::shadow_reuse,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::wildcard_enum_match_arm
)]

use std::error::Error;

use clap::{App, Arg};

use common::constants;
use common::settings::config::HashMapSource;
use common::settings::Settings;
use common::types::file_perms::UMask;
use std::sync::Arc;
use tagdir::cli::commands::ArgDefaults;
use tagdir::cli::handlers;
use tagdir::{cli, common};

fn main() {
    std::process::exit(match run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            -1
        }
    })
}

fn run() -> Result<(), Box<dyn Error>> {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let umask = UMask::default();

    let defaults = ArgDefaults {
        uid: uid.to_string(),
        gid: gid.to_string(),
        mount_perms: format!("{:o}", umask.dir_perms().mode()),
    };

    let version_str = common::version_str();
    let app = App::new("Tagdir")
        .version(&*version_str)
        .about("Tag-indexed view over real filesystem entities")
        .settings(&[clap::AppSettings::ArgRequiredElseHelp])
        .arg(
            Arg::with_name("verbosity")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        );

    let attached_app = cli::commands::add_subcommands(app, &defaults);
    let matches = attached_app.get_matches();

    let pd =
        Arc::new(directories::ProjectDirs::from("", constants::ORG, constants::APP_NAME).unwrap());

    let mut settings = Settings::new(pd)?;
    let conf_file = settings.base_config_file();

    let mut config_sources: Vec<Box<dyn config::Source + Send + Sync>> =
        vec![Box::new(config::File::from(conf_file))];

    // the logger is wired up two different ways: the mount daemon logs to the
    // per-mount rotating file (plus stdout with -i), every other subcommand
    // logs to stdout and defaults to silent
    if let Some(args) = matches.subcommand_matches("mount") {
        let name = args.value_of("name").expect("Name required!");
        settings.ensure_mount_files(name)?;

        let log_level = match args.value_of("level") {
            Some("debug") => log::LevelFilter::Debug,
            _ => log::LevelFilter::Error,
        };

        let mut log_outputs: Vec<fern::Output> = vec![];

        let rotating_log = common::log::RotatingLogger::new(
            settings.log_dir(name),
            format!("%Y-%m-%d-%H-{}.log", name),
            6,
            100,
        )?;

        log_outputs.push(From::<Box<dyn log::Log>>::from(Box::new(rotating_log)));
        if args.is_present("interactive") {
            log_outputs.push(std::io::stdout().into());
        }
        common::log::setup_logger(log_level, log_outputs)?;

        let mut cli_source = HashMapSource(Default::default());
        cli_source.0.insert(
            "mount.uid".to_string(),
            args.value_of("uid")
                .expect("Uid not specified")
                .parse::<i64>()?
                .into(),
        );
        cli_source.0.insert(
            "mount.gid".to_string(),
            args.value_of("gid")
                .expect("Gid not specified")
                .parse::<i64>()?
                .into(),
        );
        cli_source.0.insert(
            "mount.permissions".to_string(),
            args.value_of("permissions")
                .expect("Permissions not specified")
                .into(),
        );

        config_sources.push(Box::new(cli_source));
    } else {
        let maybe_log = match matches.occurrences_of("verbosity") {
            0 => None,
            1 => Some(log::LevelFilter::Info),
            2 => Some(log::LevelFilter::Debug),
            _ => Some(log::LevelFilter::Trace),
        };
        if let Some(log_level) = maybe_log {
            common::log::setup_logger(log_level, vec![std::io::stdout().into()])?;
        }

        // the mount settings aren't used by the tag subcommands, but the
        // config won't deserialize without them
        let unused_defaults = config::File::from_str(
            r#"
[mount]
uid=0
gid=0
permissions="777""#,
            config::FileFormat::Toml,
        );
        config_sources.push(Box::new(unused_defaults));
    }

    let conf = common::settings::config::build(config_sources);
    settings.update_config(conf);

    match matches.subcommand() {
        ("mount", Some(args)) => handlers::mount::handle(args, &settings),
        ("mktag", Some(args)) => handlers::tags::mktag(args),
        ("rmtag", Some(args)) => handlers::tags::rmtag(args),
        ("tag", Some(args)) => handlers::tagging::tag(args),
        ("untag", Some(args)) => handlers::tagging::untag(args),
        ("listag", Some(args)) => handlers::listag::handle(args),
        _ => Err("Command not found".into()),
    }
}
