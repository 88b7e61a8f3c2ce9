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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0}")]
    Parse(String),
    #[error("section {section:?}: option {key:?} has {actual} entries, expected {count} (one per dest)")]
    MismatchedDestList {
        section: String,
        key: String,
        count: usize,
        actual: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SshError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("remote command failed: {0}")]
    RemoteError(String),
}

/// Subcategories per spec.md §7. `from_stderr` is a best-effort classifier;
/// unrecognized messages fall through to `Generic`.
#[derive(Error, Debug)]
pub enum ZfsError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("no common snapshot between source and destination")]
    NoCommonBase,
    #[error("destination is mid-receive: {0}")]
    ReceiveInProgress(String),
    #[error("stream content mismatch: {0}")]
    StreamMismatch(String),
    #[error("destination out of space: {0}")]
    OutOfSpace(String),
    #[error("snapshot busy (holds or clones): {0}")]
    Busy(String),
    #[error("{0}")]
    Generic(String),
}

impl ZfsError {
    pub fn from_stderr(stderr: &str) -> Self {
        let s = stderr.trim();
        let lower = s.to_lowercase();
        if lower.contains("dataset does not exist") || lower.contains("could not find any snapshots") {
            ZfsError::DatasetNotFound(s.to_string())
        } else if lower.contains("destination has snapshots") || lower.contains("no matching snapshots") {
            ZfsError::NoCommonBase
        } else if lower.contains("receive is in progress") || lower.contains("resume token") {
            ZfsError::ReceiveInProgress(s.to_string())
        } else if lower.contains("checksum mismatch") || lower.contains("invalid stream") || lower.contains("truncated stream") {
            ZfsError::StreamMismatch(s.to_string())
        } else if lower.contains("out of space") || lower.contains("no space left") {
            ZfsError::OutOfSpace(s.to_string())
        } else if lower.contains("dataset is busy")
            || lower.contains("has dependent clones")
            || lower.contains("snapshot has dependent clone")
        {
            ZfsError::Busy(s.to_string())
        } else {
            ZfsError::Generic(s.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stage {stage} failed: {stderr}")]
    StageFailed { stage: String, stderr: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl PipelineError {
    /// Transient (network/transport) errors are retriable; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transport(_))
    }
}

/// Classifies a failed pipeline stage into the taxonomy: the `zfs send`/
/// `zfs receive` stages get the full `ZfsError` subcategories (no common
/// base, out of space, busy, ...), every other stage (ssh, compressor,
/// mbuffer) is a `PipelineError`, transient only when its stderr looks like
/// a network/transport problem.
pub fn classify_stage_failure(stage_label: &str, stderr: &str) -> CoreError {
    if stage_label == "sender" || stage_label == "receiver" {
        return CoreError::Zfs(ZfsError::from_stderr(stderr));
    }
    let lower = stderr.to_lowercase();
    if lower.contains("connection") || lower.contains("broken pipe") || lower.contains("timed out") {
        CoreError::Pipeline(PipelineError::Transport(stderr.trim().to_string()))
    } else {
        CoreError::Pipeline(PipelineError::StageFailed {
            stage: stage_label.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error(transparent)]
    Zfs(#[from] ZfsError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("required tool missing: {0}")]
    ToolMissing(String),
    #[error("cancelled by user interrupt")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zfs_stages_classify_as_zfs_errors() {
        let err = classify_stage_failure("receiver", "cannot receive: destination has snapshots");
        assert!(matches!(err, CoreError::Zfs(ZfsError::NoCommonBase)));
    }

    #[test]
    fn connection_drops_on_non_zfs_stages_are_transient() {
        let err = classify_stage_failure("ssh", "ssh: connect to host example.com port 22: Connection refused");
        let CoreError::Pipeline(pipeline_err) = err else {
            panic!("expected a pipeline error");
        };
        assert!(pipeline_err.is_transient());
    }

    #[test]
    fn unrecognized_non_zfs_failures_are_not_retried() {
        let err = classify_stage_failure("mbuffer", "mbuffer: fatal: out of memory");
        let CoreError::Pipeline(pipeline_err) = err else {
            panic!("expected a pipeline error");
        };
        assert!(!pipeline_err.is_transient());
    }
}
