//  Copyright (C) 2025  Ifaz Kabir

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use log::{error, info};
use std::fs;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};

use zcustodian::cli::{Cli, Command, SendArgs};
use zcustodian::compress::Compression;
use zcustodian::config::ConfigTree;
use zcustodian::model::parse_location;
use zcustodian::policy::{dispatch, execute_send, host_for, Mode, SendRequest};
use zcustodian::zfs::ZfsHost;

const STARTER_CONFIG: &str = "\
# zcustodian config: one [dataset/path] section per managed subtree.
# Child sections inherit any key they don't set from their closest
# configured ancestor.
#
# [tank/data]
# hourly = 24
# daily = 7
# weekly = 4
# monthly = 6
# yearly = 1
# dest = ssh::backup@example.com:pool/data
# compress = lz4
# exclude = tank/data/tmp*
";

/// Flipped by the SIGINT handler; dispatch polls it between datasets so an
/// interrupt still lets in-flight pipeline teardown run its grace period.
static CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    CANCELLED.store(true, Ordering::SeqCst);
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }

    match cli.command {
        Command::Setup { path } => {
            if let Some(parent) = path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    error!("failed to create {}: {e}", parent.display());
                    exit(1);
                }
            }
            if let Err(e) = fs::write(&path, STARTER_CONFIG) {
                error!("failed to write {}: {e}", path.display());
                exit(1);
            }
            info!("wrote starter config to {}", path.display());
        }
        Command::Snap(snap_args) => {
            run_from_config(&cli.config, snap_args.mode());
        }
        Command::Send(send_args) => match (&send_args.source, &send_args.dest) {
            (Some(source), Some(dest)) => run_one_shot_send(source, dest, &send_args),
            (None, None) => run_from_config(&cli.config, Mode::Send),
            _ => {
                error!("-s/--source and -d/--dest must be given together, or both omitted to use the config file");
                exit(2);
            }
        },
    }
}

fn run_one_shot_send(source: &str, dest: &str, args: &SendArgs) {
    let source_location = match parse_location(source) {
        Ok(l) => l,
        Err(e) => {
            error!("invalid --source: {e}");
            exit(2);
        }
    };
    let dest_location = match parse_location(dest) {
        Ok(l) => l,
        Err(e) => {
            error!("invalid --dest: {e}");
            exit(2);
        }
    };
    let source_key = args.source_key.as_deref().or(args.key.as_deref());
    let dest_key = args.dest_key.as_deref().or(args.key.as_deref());
    let source_host = host_for(&source_location, source_key);
    let dest_host = host_for(&dest_location, dest_key);
    let source_zfs = ZfsHost::new(source_host);
    let compression = Compression::parse(&args.compression).unwrap_or(Compression::None);

    let result = execute_send(SendRequest {
        source_zfs: &source_zfs,
        source_root: source_location.path(),
        dest_host,
        dest_root: dest_location.path().to_string(),
        exclude: &args.exclude,
        dest_auto_create: args.dest_auto_create,
        resume: args.resume,
        retries: args.retries,
        retry_interval: args.retry_interval,
        compression,
        raw_send: args.raw,
        cancel: &CANCELLED,
    });
    if let Err(e) = result {
        error!("{source} -> {dest}: {e}");
        exit(1);
    }
}

fn run_from_config(config_path: &std::path::Path, mode: Mode) {
    let input = match fs::read_to_string(config_path) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to read {}: {e}", config_path.display());
            exit(1);
        }
    };
    let tree = match ConfigTree::parse(&input) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to parse {}: {e}", config_path.display());
            exit(1);
        }
    };
    let report = dispatch(&tree, mode, &CANCELLED);
    for (dataset, message) in &report.failures {
        error!("{dataset}: {message}");
    }
    if !report.ok() {
        exit(1);
    }
}
