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

use crate::compress::Compression;
use crate::config::{ConfigTree, Policy};
use crate::error::CoreError;
use crate::model::Location;
use crate::pipeline::{build_send_pipeline, run_send_pipeline, PipelineOptions};
use crate::process::Host;
use crate::replicate::{plan_subtree, Action};
use crate::retention::{retain, take, RetentionCounts};
use crate::ssh::SshTarget;
use crate::zfs::ZfsHost;
use chrono::Local;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SnapTake,
    SnapClean,
    SnapFull,
    Send,
}

pub struct DispatchReport {
    pub failures: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

fn counts(policy: &Policy) -> RetentionCounts {
    RetentionCounts {
        frequent: policy.frequent,
        hourly: policy.hourly,
        daily: policy.daily,
        weekly: policy.weekly,
        monthly: policy.monthly,
        yearly: policy.yearly,
    }
}

/// Walks every configured dataset path, parents before children, applying
/// `mode`. One dataset's failure is recorded and dispatch continues with the
/// rest; `cancel` is polled between datasets for cooperative SIGINT teardown.
pub fn dispatch(tree: &ConfigTree, mode: Mode, cancel: &AtomicBool) -> DispatchReport {
    let mut paths: Vec<&str> = tree.sections().iter().map(|s| s.path.as_str()).collect();
    paths.sort_by_key(|p| p.matches('/').count());

    let mut failures = Vec::new();
    for dataset_path in paths {
        if cancel.load(Ordering::SeqCst) {
            failures.push((dataset_path.to_string(), "cancelled".to_string()));
            continue;
        }
        let policy = match tree.effective_policy(dataset_path) {
            Ok(p) => p,
            Err(e) => {
                failures.push((dataset_path.to_string(), e.to_string()));
                continue;
            }
        };
        let zfs = ZfsHost::new(Host::Local);

        if matches!(mode, Mode::SnapTake | Mode::SnapFull) && policy.snap {
            if let Err(e) = apply_take(&zfs, dataset_path, &policy) {
                failures.push((dataset_path.to_string(), e.to_string()));
            }
        }
        if matches!(mode, Mode::SnapClean | Mode::SnapFull) && policy.clean {
            if let Err(e) = apply_clean(&zfs, dataset_path, &policy) {
                failures.push((dataset_path.to_string(), e.to_string()));
            }
        }
        if mode == Mode::Send {
            for idx in 0..policy.dest.len() {
                if let Err(e) = apply_send(&zfs, dataset_path, &policy, idx, cancel) {
                    failures.push((format!("{dataset_path} -> dest[{idx}]"), e.to_string()));
                }
            }
        }
    }
    DispatchReport { failures }
}

fn apply_take(zfs: &ZfsHost, dataset: &str, policy: &Policy) -> Result<(), CoreError> {
    let snaps = zfs.list_snapshots(dataset)?;
    let now = Local::now();
    for (granularity, name) in take(&snaps, &policy.prefix, counts(policy), now) {
        info!("{dataset}: taking {granularity:?} snapshot {name}");
        if let Err(e) = zfs.create_snapshot(dataset, &name) {
            error!("{dataset}: failed to create snapshot {name}: {e}");
        }
    }
    Ok(())
}

fn apply_clean(zfs: &ZfsHost, dataset: &str, policy: &Policy) -> Result<(), CoreError> {
    let snaps = zfs.list_snapshots(dataset)?;
    let now = Local::now();
    let plan = retain(&snaps, &policy.prefix, counts(policy), now, |snap| {
        zfs.receive_in_progress(&snap.dataset).unwrap_or(true)
    });
    for warning in &plan.warnings {
        warn!("{dataset}: {warning}");
    }
    for snap in plan.destroy {
        if let Err(e) = zfs.destroy(snap) {
            error!("{dataset}: failed to destroy {}: {e}", snap.full_name());
        }
    }
    Ok(())
}

pub fn host_for(location: &Location, key: Option<&std::path::Path>) -> Host {
    match location {
        Location::Local { .. } => Host::Local,
        Location::Remote { user, host, port, key: loc_key, .. } => {
            let key = loc_key.clone().or_else(|| key.map(|p| p.to_path_buf()));
            Host::Remote(SshTarget::new(user.clone(), host.clone(), *port, key))
        }
    }
}

fn apply_send(zfs: &ZfsHost, source_root: &str, policy: &Policy, idx: usize, cancel: &AtomicBool) -> Result<(), CoreError> {
    let dest_location = &policy.dest[idx];
    let dest_key = policy.dest_key.get(idx).cloned().flatten();
    let dest_host = host_for(dest_location, dest_key.as_deref().or(policy.key.as_deref()));

    execute_send(SendRequest {
        source_zfs: zfs,
        source_root,
        dest_host,
        dest_root: dest_location.path().to_string(),
        exclude: policy.exclude_for(idx),
        dest_auto_create: policy.dest_auto_create_for(idx),
        resume: policy.resume_for(idx),
        retries: policy.retries_for(idx),
        retry_interval: policy.retry_interval_for(idx),
        compression: Compression::parse(policy.compress_for(idx)).unwrap_or(Compression::None),
        raw_send: policy.raw_send_for(idx),
        cancel,
    })
}

pub struct SendRequest<'a> {
    pub source_zfs: &'a ZfsHost,
    pub source_root: &'a str,
    pub dest_host: Host,
    pub dest_root: String,
    pub exclude: &'a [String],
    pub dest_auto_create: bool,
    pub resume: bool,
    pub retries: u32,
    pub retry_interval: u32,
    pub compression: Compression,
    pub raw_send: bool,
    pub cancel: &'a AtomicBool,
}

/// Enumerates the source subtree, plans every non-excluded dataset against
/// its mirrored destination path, and runs the resulting actions. Shared by
/// the config-driven dispatcher and the one-shot `send -s/-d` CLI path.
pub fn execute_send(req: SendRequest) -> Result<(), CoreError> {
    let dest_zfs = ZfsHost::new(req.dest_host.clone());
    let source_datasets: Vec<String> = req
        .source_zfs
        .list_datasets(req.source_root)?
        .into_iter()
        .map(|d| d.path)
        .collect();

    let plans = plan_subtree(
        req.source_root,
        &req.dest_root,
        &source_datasets,
        req.exclude,
        |dataset| req.source_zfs.list_snapshots(dataset),
        |dataset| {
            if !dest_zfs.dataset_exists(dataset)? {
                return Ok(None);
            }
            let snaps = dest_zfs.list_snapshots(dataset)?;
            let token = dest_zfs.resume_token(dataset)?;
            Ok(Some((snaps, token)))
        },
        req.dest_auto_create,
        req.resume,
    )?;

    for plan in plans {
        if req.cancel.load(Ordering::SeqCst) {
            return Err(CoreError::Cancelled);
        }
        for action in plan.actions {
            run_action(
                req.source_zfs,
                &dest_zfs,
                &req.dest_host,
                &plan.dest_dataset,
                action,
                req.compression,
                req.raw_send,
                req.retries,
                req.retry_interval,
            )?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_action(
    source_zfs: &ZfsHost,
    dest_zfs: &ZfsHost,
    dest_host: &Host,
    dest_dataset: &str,
    action: Action,
    compression: Compression,
    raw_send: bool,
    retries: u32,
    retry_interval: u32,
) -> Result<(), CoreError> {
    match action {
        Action::CreateAncestors { dataset } => {
            dest_zfs.create_ancestors(&dataset)?;
            Ok(())
        }
        Action::Resume { dataset, token } => {
            let recv = dest_zfs.receive_stage("receiver", &dataset, true);
            let send = source_zfs.resume_send_stage("sender", &token);
            let total_size = source_zfs.estimate_resume_send_size(&token);
            run_with_retries(source_zfs, dest_host, send, recv, compression, raw_send, total_size, retries, retry_interval)
        }
        Action::FullSend { dataset, snapshot } => {
            let to = format!("{dataset}@{snapshot}");
            let send = source_zfs.send_stage("sender", None, &to, raw_send);
            let recv = dest_zfs.receive_stage("receiver", dest_dataset, false);
            let total_size = source_zfs.estimate_send_size(None, &to, raw_send);
            run_with_retries(source_zfs, dest_host, send, recv, compression, raw_send, total_size, retries, retry_interval)
        }
        Action::Incremental { dataset, from, to } => {
            let from_full = format!("{dataset}@{from}");
            let to_full = format!("{dataset}@{to}");
            let send = source_zfs.send_stage("sender", Some(&from_full), &to_full, raw_send);
            let recv = dest_zfs.receive_stage("receiver", dest_dataset, false);
            let total_size = source_zfs.estimate_send_size(Some(&from_full), &to_full, raw_send);
            run_with_retries(source_zfs, dest_host, send, recv, compression, raw_send, total_size, retries, retry_interval)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_with_retries(
    source_zfs: &ZfsHost,
    dest_host: &Host,
    send_stage: crate::process::Stage,
    recv_stage: crate::process::Stage,
    compression: Compression,
    raw_send: bool,
    total_size: Option<u64>,
    retries: u32,
    retry_interval: u32,
) -> Result<(), CoreError> {
    let opts = PipelineOptions {
        compression,
        raw_send,
        use_mbuffer: true,
        mbuffer_size: "1G".to_string(),
        total_size,
    };
    let mut attempt = 0;
    loop {
        let plan = build_send_pipeline(&source_zfs.host, dest_host, &Host::Local, send_stage.clone(), recv_stage.clone(), &opts);
        let outcome = run_send_pipeline(plan).map_err(CoreError::Io)?;
        if outcome.success {
            return Ok(());
        }
        let stage = outcome.failed_stage.as_deref().unwrap_or("unknown");
        let error = crate::error::classify_stage_failure(stage, &outcome.stderr_tail);
        let transient = matches!(&error, CoreError::Pipeline(e) if e.is_transient());
        if attempt >= retries || !transient {
            return Err(error);
        }
        attempt += 1;
        warn!("send attempt {attempt} failed, retrying in {retry_interval}s: {error}");
        std::thread::sleep(Duration::from_secs(retry_interval as u64));
    }
}
