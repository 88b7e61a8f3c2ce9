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

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "zcustodian", version, about = "Policy-driven ZFS snapshot and replication controller")]
pub struct Cli {
    /// Path to the config file (INI-like; see the `setup` subcommand).
    #[arg(short = 'c', long, default_value = "/etc/zcustodian/zcustodian.conf")]
    pub config: PathBuf,

    /// Raises the default log filter from `warn` to `debug`.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a starter config file at the given path.
    Setup {
        #[arg(short = 'p', long, default_value = "/etc/zcustodian/zcustodian.conf")]
        path: PathBuf,
    },
    /// Take and/or prune snapshots per the config file.
    Snap(SnapArgs),
    /// Replicate source datasets to their configured destinations.
    Send(SendArgs),
}

#[derive(Debug, ClapArgs)]
#[group(multiple = false)]
pub struct SnapArgs {
    /// Only take new snapshots, don't prune.
    #[arg(long)]
    pub take: bool,
    /// Only prune existing snapshots, don't take new ones.
    #[arg(long)]
    pub clean: bool,
    /// Take new snapshots and prune (the default).
    #[arg(long)]
    pub full: bool,
}

impl SnapArgs {
    pub fn mode(&self) -> crate::policy::Mode {
        if self.take {
            crate::policy::Mode::SnapTake
        } else if self.clean {
            crate::policy::Mode::SnapClean
        } else {
            crate::policy::Mode::SnapFull
        }
    }
}

#[derive(Debug, ClapArgs)]
pub struct SendArgs {
    /// One-shot source dataset, bypassing the config file.
    #[arg(short = 's', long)]
    pub source: Option<String>,
    /// One-shot destination (`[ssh:PORT:]USER@HOST:DATASET` or a bare path).
    #[arg(short = 'd', long)]
    pub dest: Option<String>,
    /// `lzop` unless overridden; falls back to `none` when unavailable.
    #[arg(short = 'c', long, default_value = "lzop")]
    pub compression: String,
    #[arg(short = 'i', long)]
    pub key: Option<PathBuf>,
    #[arg(short = 'j', long)]
    pub source_key: Option<PathBuf>,
    #[arg(short = 'k', long)]
    pub dest_key: Option<PathBuf>,
    #[arg(short = 'e', long = "exclude", num_args = 0..)]
    pub exclude: Vec<String>,
    /// Send a raw (encrypted-at-rest preserving) stream.
    #[arg(short = 'w', long)]
    pub raw: bool,
    /// Resume from a receive_resume_token if one is present on the destination.
    #[arg(short = 'r', long)]
    pub resume: bool,
    #[arg(long)]
    pub dest_auto_create: bool,
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
    #[arg(long, default_value_t = 10)]
    pub retry_interval: u32,
}
