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

use crate::ssh::SshTarget;
use std::io::{self, Read};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Where a command runs. `Host::command` hides the local/ssh distinction from
/// every caller above it, so `zfs.rs` never branches on locality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Local,
    Remote(SshTarget),
}

impl Host {
    pub fn command(&self, program: &str, args: &[String]) -> Command {
        match self {
            Host::Local => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Host::Remote(target) => {
                let mut cmd = target.ssh_command();
                let mut line = vec![quote_arg(program)];
                line.extend(args.iter().map(|a| quote_arg(a)));
                cmd.arg(line.join(" "));
                cmd
            }
        }
    }
}

/// Quotes a single remote-shell argument. Anything outside the safe set of
/// dataset-name characters is single-quoted, with embedded quotes escaped.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/@_.:+-".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// One command in a pipeline, bound to the host it runs on.
#[derive(Debug, Clone)]
pub struct Stage {
    pub label: String,
    pub host: Host,
    pub program: String,
    pub args: Vec<String>,
}

impl Stage {
    pub fn new(label: impl Into<String>, host: Host, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label: label.into(),
            host,
            program: program.into(),
            args,
        }
    }

    pub fn to_command(&self) -> Command {
        self.host.command(&self.program, &self.args)
    }
}

/// Wraps a spawned child so a dropped or explicitly torn-down pipeline always
/// reaps its process: SIGTERM first, SIGKILL after a grace period.
pub struct ChildGuard {
    child: Option<Child>,
    grace: Duration,
}

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        Self {
            child: Some(child),
            grace: Duration::from_secs(10),
        }
    }

    pub fn stdout(&mut self) -> Option<std::process::ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    pub fn wait(mut self) -> io::Result<ExitStatus> {
        let status = self.child.as_mut().expect("child present").wait()?;
        self.child = None;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else { return };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        terminate(child, self.grace);
    }
}

fn terminate(child: &mut Child, grace: Duration) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return,
            Ok(None) => {
                if Instant::now() >= deadline {
                    unsafe {
                        libc::kill(child.id() as libc::pid_t, libc::SIGKILL);
                    }
                    let _ = child.wait();
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

pub struct StageOutcome {
    pub label: String,
    pub status: Option<ExitStatus>,
    pub stderr: Vec<u8>,
    pub killed: bool,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

pub struct PipelineOutcome {
    pub stages: Vec<StageOutcome>,
}

impl PipelineOutcome {
    pub fn success(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(|s| s.succeeded())
    }

    pub fn first_failure(&self) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| !s.succeeded())
    }
}

/// Builds and runs a left-to-right chain of stages (`a | b | c`), each
/// possibly on a different host (an ssh-piping stage bridges the gap).
/// On failure of any stage, the remaining running stages are torn down
/// (SIGTERM, then SIGKILL after a grace period) rather than left to block on
/// a pipe nobody drains.
pub struct PipelineBuilder {
    stages: Vec<Stage>,
    stderr_cap: usize,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            stderr_cap: 64 * 1024,
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Spawns every stage in the chain before waiting on any of them, then
    /// waits for them all together. Spawning one stage at a time and waiting
    /// on it before starting the next would deadlock as soon as a stage's
    /// output exceeds the OS pipe buffer (~64 KB): with nobody downstream
    /// running yet to drain it, the stage blocks on `write` forever and
    /// never reaches the point this function is waiting for.
    pub fn run(self) -> io::Result<PipelineOutcome> {
        if self.stages.is_empty() {
            return Ok(PipelineOutcome { stages: Vec::new() });
        }
        let n = self.stages.len();
        let mut children: Vec<Child> = Vec::with_capacity(n);
        let mut prev_stdout: Option<std::process::ChildStdout> = None;
        for stage in &self.stages {
            let mut cmd = stage.to_command();
            match prev_stdout.take() {
                Some(out) => {
                    cmd.stdin(Stdio::from(out));
                }
                None => {
                    cmd.stdin(Stdio::null());
                }
            }
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            let mut child = cmd.spawn()?;
            prev_stdout = child.stdout.take();
            children.push(child);
        }

        let mut capture_handles = Vec::with_capacity(n);
        for child in children.iter_mut() {
            let stderr = child.stderr.take().expect("stderr piped above");
            capture_handles.push(spawn_capture(stderr, self.stderr_cap));
        }
        // Nothing downstream reads the last stage's stdout; drain it too so
        // it can't block on a full pipe the same way a mid-chain stage would.
        let stdout_drain = prev_stdout.take().map(|out| spawn_capture(out, 64 * 1024));

        let grace = Duration::from_secs(10);
        let mut statuses: Vec<Option<ExitStatus>> = vec![None; n];
        let mut killed = vec![false; n];
        loop {
            let mut failure_idx = None;
            let mut all_done = true;
            for (i, child) in children.iter_mut().enumerate() {
                if statuses[i].is_some() {
                    continue;
                }
                match child.try_wait()? {
                    Some(status) => {
                        statuses[i] = Some(status);
                        if !status.success() && failure_idx.is_none() {
                            failure_idx = Some(i);
                        }
                    }
                    None => all_done = false,
                }
            }
            if failure_idx.is_some() {
                for (i, child) in children.iter_mut().enumerate() {
                    if statuses[i].is_none() {
                        terminate(child, grace);
                        statuses[i] = child.try_wait()?.or_else(|| child.wait().ok());
                        killed[i] = true;
                    }
                }
                break;
            }
            if all_done {
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }

        if let Some(handle) = stdout_drain {
            handle.join().ok();
        }
        let mut stages = Vec::with_capacity(n);
        for (i, handle) in capture_handles.into_iter().enumerate() {
            let stderr = handle.join().unwrap_or_default();
            stages.push(StageOutcome {
                label: self.stages[i].label.clone(),
                status: statuses[i],
                stderr,
                killed: killed[i] || statuses[i].is_some_and(|s| s.signal().is_some()),
            });
        }
        Ok(PipelineOutcome { stages })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_capture<R: Read + Send + 'static>(mut stream: R, cap: usize) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if buf.len() < cap {
                        let take = (cap - buf.len()).min(n);
                        buf.extend_from_slice(&chunk[..take]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        buf
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_leaves_plain_dataset_names_bare() {
        assert_eq!(quote_arg("tank/data@pyznap_2026-01-01_00:00:00_daily"), "tank/data@pyznap_2026-01-01_00:00:00_daily");
    }

    #[test]
    fn quote_arg_escapes_spaces_and_quotes() {
        assert_eq!(quote_arg("it's a dataset"), r"'it'\''s a dataset'");
    }

    #[test]
    fn single_stage_pipeline_runs_to_completion() {
        let outcome = PipelineBuilder::new()
            .stage(Stage::new("true", Host::Local, "true", vec![]))
            .run()
            .expect("spawns");
        assert!(outcome.success());
    }

    #[test]
    fn chain_does_not_deadlock_on_output_past_one_pipe_buffer() {
        // `dd` writes 200 KB, well past the ~64 KB OS pipe buffer. If `wc`
        // weren't already spawned and draining it before this chain is
        // waited on, `dd` would block on `write` forever.
        let outcome = PipelineBuilder::new()
            .stage(Stage::new(
                "dd",
                Host::Local,
                "dd",
                vec!["if=/dev/zero".to_string(), "bs=1024".to_string(), "count=200".to_string()],
            ))
            .stage(Stage::new("wc", Host::Local, "wc", vec!["-c".to_string()]))
            .run()
            .expect("spawns");
        assert!(outcome.success());
    }

    #[test]
    fn failing_stage_is_reported() {
        let outcome = PipelineBuilder::new()
            .stage(Stage::new("false", Host::Local, "false", vec![]))
            .run()
            .expect("spawns");
        assert!(!outcome.success());
        assert!(outcome.first_failure().is_some());
    }
}
