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

use crate::error::SshError;
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub key: Option<PathBuf>,
    pub connect_timeout: u32,
}

impl SshTarget {
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16, key: Option<PathBuf>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
            key,
            connect_timeout: 10,
        }
    }

    /// `ssh -o BatchMode=yes -o ConnectTimeout=<T> [-i key] -p port user@host --`,
    /// ready to have the remote command line appended as a single argument.
    pub fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o").arg(format!("ConnectTimeout={}", self.connect_timeout));
        if let Some(key) = &self.key {
            cmd.arg("-i").arg(key);
        }
        cmd.arg("-p").arg(self.port.to_string());
        cmd.arg(format!("{}@{}", self.user, self.host));
        cmd.arg("--");
        cmd
    }

    pub fn probe_reachable(&self) -> Result<(), SshError> {
        let mut cmd = self.ssh_command();
        cmd.arg("true");
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        let output = cmd.output().map_err(|e| SshError::Unreachable(e.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_ssh_failure(output.status.code(), &stderr))
    }
}

fn classify_ssh_failure(exit_code: Option<i32>, stderr: &str) -> SshError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") || lower.contains("authentication") {
        SshError::AuthFailed(stderr.trim().to_string())
    } else if lower.contains("could not resolve hostname")
        || lower.contains("connection timed out")
        || lower.contains("connection refused")
        || lower.contains("no route to host")
        || exit_code == Some(255)
    {
        SshError::Unreachable(stderr.trim().to_string())
    } else {
        SshError::RemoteError(stderr.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_ssh_prefix() {
        let target = SshTarget::new("backup", "example.com", 2222, Some(PathBuf::from("/root/.ssh/id_ed25519")));
        let cmd = target.ssh_command();
        let program = cmd.get_program().to_string_lossy().to_string();
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(program, "ssh");
        assert_eq!(
            args,
            vec![
                "-o", "BatchMode=yes",
                "-o", "ConnectTimeout=10",
                "-i", "/root/.ssh/id_ed25519",
                "-p", "2222",
                "backup@example.com",
                "--",
            ]
        );
    }

    #[test]
    fn classifies_auth_vs_unreachable_vs_remote() {
        assert!(matches!(
            classify_ssh_failure(Some(255), "Permission denied (publickey)."),
            SshError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_ssh_failure(Some(255), "ssh: connect to host example.com port 22: Connection refused"),
            SshError::Unreachable(_)
        ));
        assert!(matches!(
            classify_ssh_failure(Some(1), "zfs: command not found"),
            SshError::RemoteError(_)
        ));
    }
}
