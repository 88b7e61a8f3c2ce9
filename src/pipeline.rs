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
use crate::process::{Host, PipelineBuilder, Stage, StageOutcome};
use crate::zfs::ZfsHost;
use std::io::{self, IsTerminal};

/// How the source and destination hosts relate, which decides where the
/// compress/decompress and buffering stages land. Mirrors
/// `sync_pipelines.rs`'s `ConnectionType`, generalized for send/receive.
pub enum ConnectionShape {
    Local,
    Push,
    Pull,
    RemoteToRemote,
}

pub fn connection_shape(source: &Host, dest: &Host) -> ConnectionShape {
    match (source, dest) {
        (Host::Local, Host::Local) => ConnectionShape::Local,
        (Host::Local, Host::Remote(_)) => ConnectionShape::Push,
        (Host::Remote(_), Host::Local) => ConnectionShape::Pull,
        (Host::Remote(_), Host::Remote(_)) => ConnectionShape::RemoteToRemote,
    }
}

/// An ordered run of stages all chained left to right, possibly spanning
/// more than one host when an `ssh` stage bridges the gap between segments.
#[derive(Default)]
pub struct Segment {
    pub stages: Vec<Stage>,
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }
}

pub struct SendPlan {
    pub source: Segment,
    pub local: Option<Segment>,
    pub dest: Segment,
}

pub struct PipelineOptions {
    pub compression: Compression,
    pub raw_send: bool,
    pub use_mbuffer: bool,
    pub mbuffer_size: String,
    /// Byte count from a `zfs send -nvP` dry run, if one succeeded. Feeds
    /// `pv -s` so the progress bar can show an ETA instead of just a rate.
    pub total_size: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            raw_send: false,
            use_mbuffer: false,
            mbuffer_size: "1G".to_string(),
            total_size: None,
        }
    }
}

/// Splices a progress stage right after the sender. Width is fixed at 100
/// columns when stdout is a terminal; piped to a log file instead, `pv`
/// switches to periodic numeric updates roughly once a minute so the log
/// doesn't fill with carriage-return spam.
fn pv_stage(host: &Host, label: &'static str, total_size: Option<u64>) -> Option<Stage> {
    if !ZfsHost::new(host.clone()).tool_available("pv") {
        return None;
    }
    let mut args = vec!["-p".to_string(), "-t".to_string(), "-e".to_string(), "-r".to_string(), "-b".to_string()];
    if io::stdout().is_terminal() {
        args.push("-w".to_string());
        args.push("100".to_string());
    } else {
        args.push("-i".to_string());
        args.push("60".to_string());
    }
    if let Some(size) = total_size {
        args.push("-s".to_string());
        args.push(size.to_string());
    }
    Some(Stage::new(label, host.clone(), "pv", args))
}

fn mbuffer_stage(host: &Host, label: &'static str, opts: &PipelineOptions) -> Option<Stage> {
    if !opts.use_mbuffer || !ZfsHost::new(host.clone()).tool_available("mbuffer") {
        return None;
    }
    Some(Stage::new(
        label,
        host.clone(),
        "mbuffer",
        vec!["-q".to_string(), "-s".to_string(), "128k".to_string(), "-m".to_string(), opts.mbuffer_size.clone()],
    ))
}

/// A compressor is only wired in when BOTH ends have the matching binary --
/// compressing on the sender with nothing to decompress on the receiver
/// would hand `zfs receive` a corrupt stream, so an asymmetric tool
/// availability falls back to sending uncompressed rather than half-wiring
/// one side.
fn compression_pair(compress_host: &Host, decompress_host: &Host, opts: &PipelineOptions) -> Option<(Stage, Stage)> {
    if opts.raw_send {
        return None;
    }
    let cmd = opts.compression.command()?;
    if !ZfsHost::new(compress_host.clone()).tool_available(cmd.compress.0)
        || !ZfsHost::new(decompress_host.clone()).tool_available(cmd.decompress.0)
    {
        return None;
    }
    let compress = Stage::new(
        "compress",
        compress_host.clone(),
        cmd.compress.0,
        cmd.compress.1.iter().map(|s| s.to_string()).collect(),
    );
    let decompress = Stage::new(
        "decompress",
        decompress_host.clone(),
        cmd.decompress.0,
        cmd.decompress.1.iter().map(|s| s.to_string()).collect(),
    );
    Some((compress, decompress))
}

/// Lays out the stage graph for one send/receive action: `sender -> [compress]
/// -> [mbuffer] -> (ssh hop, implicit in stage hosts) -> [mbuffer] ->
/// [decompress] -> receiver`. The compress/decompress pair always sits on the
/// source/dest hosts themselves (mirrors `sync_pipelines.rs`'s
/// `sourcecompress`/`targetcompress` naming) even when both are remote and a
/// local relay sits between them for buffering only.
pub fn build_send_pipeline(source_host: &Host, dest_host: &Host, local_host: &Host, send_stage: Stage, recv_stage: Stage, opts: &PipelineOptions) -> SendPlan {
    let pair = compression_pair(source_host, dest_host, opts);
    match connection_shape(source_host, dest_host) {
        ConnectionShape::Local => {
            let mut source = Segment::new().push(send_stage);
            if let Some(stage) = pv_stage(source_host, "pv", opts.total_size) {
                source = source.push(stage);
            }
            if let Some(stage) = mbuffer_stage(source_host, "mbuffer", opts) {
                source = source.push(stage);
            }
            source = source.push(recv_stage);
            SendPlan { source, local: None, dest: Segment::new() }
        }
        ConnectionShape::Push => {
            let mut source = Segment::new().push(send_stage);
            if let Some(stage) = pv_stage(source_host, "pv", opts.total_size) {
                source = source.push(stage);
            }
            if let Some((compress, _)) = &pair {
                source = source.push(compress.clone());
            }
            if let Some(stage) = mbuffer_stage(source_host, "sourcembuffer", opts) {
                source = source.push(stage);
            }
            let mut dest = Segment::new();
            if let Some((_, decompress)) = &pair {
                dest = dest.push(decompress.clone());
            }
            if let Some(stage) = mbuffer_stage(dest_host, "targetmbuffer", opts) {
                dest = dest.push(stage);
            }
            dest = dest.push(recv_stage);
            SendPlan { source, local: None, dest }
        }
        ConnectionShape::Pull => {
            let mut source = Segment::new().push(send_stage);
            if let Some(stage) = pv_stage(source_host, "pv", opts.total_size) {
                source = source.push(stage);
            }
            if let Some((compress, _)) = &pair {
                source = source.push(compress.clone());
            }
            let mut dest = Segment::new();
            if let Some((_, decompress)) = &pair {
                dest = dest.push(decompress.clone());
            }
            if let Some(stage) = mbuffer_stage(dest_host, "targetmbuffer", opts) {
                dest = dest.push(stage);
            }
            dest = dest.push(recv_stage);
            SendPlan { source, local: None, dest }
        }
        ConnectionShape::RemoteToRemote => {
            let mut source = Segment::new().push(send_stage);
            if let Some(stage) = pv_stage(source_host, "pv", opts.total_size) {
                source = source.push(stage);
            }
            if let Some((compress, _)) = &pair {
                source = source.push(compress.clone());
            }
            let mut local = Segment::new();
            if let Some(stage) = mbuffer_stage(local_host, "localmbuffer", opts) {
                local = local.push(stage);
            }
            let mut dest = Segment::new();
            if let Some((_, decompress)) = &pair {
                dest = dest.push(decompress.clone());
            }
            dest = dest.push(recv_stage);
            let local = if local.stages.is_empty() { None } else { Some(local) };
            SendPlan { source, local, dest }
        }
    }
}

pub struct SendOutcome {
    pub success: bool,
    pub failed_stage: Option<String>,
    pub stderr_tail: String,
}

/// Spawns the full cross-host chain (source segment, optional local relay,
/// dest segment) as one flat `stage | stage | ... | stage` run, piping each
/// stage's stdout into the next regardless of which segment it came from.
/// Spawning segment by segment and waiting on each before starting the next
/// would deadlock as soon as a segment's last stage writes more than an OS
/// pipe buffer's worth of output, since nothing downstream would be running
/// yet to drain it; flattening into a single [`PipelineBuilder::run`] spawns
/// every stage across every host before any of them are waited on.
pub fn run_send_pipeline(plan: SendPlan) -> io::Result<SendOutcome> {
    let SendPlan { source, local, dest } = plan;

    let mut builder = PipelineBuilder::new();
    for stage in source.stages.into_iter().chain(local.into_iter().flat_map(|s| s.stages)).chain(dest.stages) {
        builder = builder.stage(stage);
    }
    let outcome = builder.run()?;

    let mut failed_stage = None;
    let mut stderr_tail = String::new();
    let success = if let Some(failure) = outcome.first_failure() {
        record_failure(failure, &mut failed_stage, &mut stderr_tail);
        false
    } else {
        true
    };
    Ok(SendOutcome { success, failed_stage, stderr_tail })
}

fn record_failure(failure: &StageOutcome, failed_stage: &mut Option<String>, stderr_tail: &mut String) {
    failed_stage.get_or_insert_with(|| failure.label.clone());
    *stderr_tail = String::from_utf8_lossy(&failure.stderr).into_owned();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SshTarget;

    #[test]
    fn local_to_local_is_local_shape() {
        assert!(matches!(connection_shape(&Host::Local, &Host::Local), ConnectionShape::Local));
    }

    #[test]
    fn remote_to_remote_needs_a_relay() {
        let remote = Host::Remote(SshTarget::new("u", "h", 22, None));
        assert!(matches!(connection_shape(&remote, &remote), ConnectionShape::RemoteToRemote));
    }

    #[test]
    fn push_and_pull_are_distinguished_by_which_side_is_remote() {
        let remote = Host::Remote(SshTarget::new("u", "h", 22, None));
        assert!(matches!(connection_shape(&Host::Local, &remote), ConnectionShape::Push));
        assert!(matches!(connection_shape(&remote, &Host::Local), ConnectionShape::Pull));
    }

    #[test]
    fn two_segment_chain_runs_end_to_end() {
        let plan = SendPlan {
            source: Segment::new().push(Stage::new("sender", Host::Local, "true", vec![])),
            local: None,
            dest: Segment::new().push(Stage::new("receiver", Host::Local, "true", vec![])),
        };
        let outcome = run_send_pipeline(plan).expect("spawns");
        assert!(outcome.success);
    }

    #[test]
    fn relay_segment_failure_is_reported() {
        let plan = SendPlan {
            source: Segment::new().push(Stage::new("sender", Host::Local, "true", vec![])),
            local: Some(Segment::new().push(Stage::new("relay", Host::Local, "false", vec![]))),
            dest: Segment::new().push(Stage::new("receiver", Host::Local, "true", vec![])),
        };
        let outcome = run_send_pipeline(plan).expect("spawns");
        assert!(!outcome.success);
        assert_eq!(outcome.failed_stage.as_deref(), Some("relay"));
    }
}
