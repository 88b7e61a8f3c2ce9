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

use crate::error::ZfsError;
use crate::model::{Dataset, DatasetKind, Snapshot};
use crate::process::{Host, Stage};
use chrono::{Local, TimeZone};
use std::cell::RefCell;
use std::collections::HashMap;
use std::process::Stdio;

/// A ZFS endpoint bound to a host. Every method shells out to `zfs`/`command`
/// on that host, local or remote, without the caller needing to know which.
pub struct ZfsHost {
    pub host: Host,
    tool_cache: RefCell<HashMap<String, bool>>,
}

impl ZfsHost {
    pub fn new(host: Host) -> Self {
        Self {
            host,
            tool_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn tool_available(&self, name: &str) -> bool {
        if let Some(v) = self.tool_cache.borrow().get(name) {
            return *v;
        }
        let mut cmd = self.host.command("command", &["-v".to_string(), name.to_string()]);
        let ok = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        self.tool_cache.borrow_mut().insert(name.to_string(), ok);
        ok
    }

    pub fn list_datasets(&self, root: &str) -> Result<Vec<Dataset>, ZfsError> {
        let args = vec![
            "list".into(),
            "-H".into(),
            "-p".into(),
            "-r".into(),
            "-t".into(),
            "filesystem,volume".into(),
            "-o".into(),
            "name,type,receive_resume_token,userrefs".into(),
            root.into(),
        ];
        let output = self
            .host
            .command("zfs", &args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if !output.status.success() {
            return Err(ZfsError::from_stderr(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_dataset_line)
            .collect())
    }

    pub fn dataset_exists(&self, dataset: &str) -> Result<bool, ZfsError> {
        let output = self
            .host
            .command("zfs", &["list".into(), "-H".into(), dataset.into()])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("dataset does not exist") {
            Ok(false)
        } else {
            Err(ZfsError::from_stderr(&stderr))
        }
    }

    pub fn list_snapshots(&self, dataset: &str) -> Result<Vec<Snapshot>, ZfsError> {
        let args = vec![
            "list".into(),
            "-H".into(),
            "-p".into(),
            "-d".into(),
            "1".into(),
            "-t".into(),
            "snapshot".into(),
            "-s".into(),
            "creation".into(),
            "-o".into(),
            "name,creation,guid".into(),
            dataset.into(),
        ];
        let output = self
            .host
            .command("zfs", &args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("dataset does not exist") {
                return Err(ZfsError::DatasetNotFound(dataset.to_string()));
            }
            return Err(ZfsError::from_stderr(&stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_snapshot_line)
            .collect())
    }

    pub fn create_snapshot(&self, dataset: &str, name: &str) -> Result<(), ZfsError> {
        let full = format!("{dataset}@{name}");
        let output = self
            .host
            .command("zfs", &["snapshot".into(), full])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if !output.status.success() {
            return Err(ZfsError::from_stderr(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(())
    }

    pub fn destroy(&self, snapshot: &Snapshot) -> Result<(), ZfsError> {
        let output = self
            .host
            .command("zfs", &["destroy".into(), snapshot.full_name()])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if !output.status.success() {
            return Err(ZfsError::from_stderr(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(())
    }

    pub fn receive_in_progress(&self, dataset: &str) -> Result<bool, ZfsError> {
        match self.resume_token(dataset)? {
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    pub fn resume_token(&self, dataset: &str) -> Result<Option<String>, ZfsError> {
        let output = self
            .host
            .command(
                "zfs",
                &[
                    "get".into(),
                    "-H".into(),
                    "-o".into(),
                    "value".into(),
                    "receive_resume_token".into(),
                    dataset.into(),
                ],
            )
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("dataset does not exist") {
                return Ok(None);
            }
            return Err(ZfsError::from_stderr(&stderr));
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() || value == "-" {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    pub fn create_ancestors(&self, dataset: &str) -> Result<(), ZfsError> {
        let output = self
            .host
            .command("zfs", &["create".into(), "-p".into(), dataset.into()])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ZfsError::Generic(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("already exists") {
                return Ok(());
            }
            return Err(ZfsError::from_stderr(&stderr));
        }
        Ok(())
    }

    pub fn send_stage(&self, label: &str, from: Option<&str>, to: &str, raw: bool) -> Stage {
        let mut args = vec!["send".to_string()];
        if raw {
            args.push("-w".to_string());
        }
        if let Some(from) = from {
            args.push("-I".to_string());
            args.push(from.to_string());
        }
        args.push(to.to_string());
        Stage::new(label, self.host.clone(), "zfs", args)
    }

    pub fn resume_send_stage(&self, label: &str, token: &str) -> Stage {
        Stage::new(label, self.host.clone(), "zfs", vec!["send".to_string(), "-t".to_string(), token.to_string()])
    }

    pub fn receive_stage(&self, label: &str, dataset: &str, resume: bool) -> Stage {
        let mut args = vec!["receive".to_string()];
        if resume {
            args.push("-s".to_string());
        }
        args.push(dataset.to_string());
        Stage::new(label, self.host.clone(), "zfs", args)
    }

    /// Best-effort dry-run size estimate (`zfs send -nvP`), used to size the
    /// `pv` progress bar. `None` on any failure -- an estimate is a nicety,
    /// never a reason to fail or delay the real send.
    pub fn estimate_send_size(&self, from: Option<&str>, to: &str, raw: bool) -> Option<u64> {
        let mut args = vec!["send".to_string(), "-n".to_string(), "-v".to_string(), "-P".to_string()];
        if raw {
            args.push("-w".to_string());
        }
        if let Some(from) = from {
            args.push("-I".to_string());
            args.push(from.to_string());
        }
        args.push(to.to_string());
        self.parse_size_estimate(&args)
    }

    pub fn estimate_resume_send_size(&self, token: &str) -> Option<u64> {
        let args = vec![
            "send".to_string(),
            "-n".to_string(),
            "-v".to_string(),
            "-P".to_string(),
            "-t".to_string(),
            token.to_string(),
        ];
        self.parse_size_estimate(&args)
    }

    fn parse_size_estimate(&self, args: &[String]) -> Option<u64> {
        let output = self.host.command("zfs", args).stdin(Stdio::null()).output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_size_line(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_size_line(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| line.strip_prefix("size\t")).and_then(|s| s.trim().parse().ok())
}

fn parse_dataset_line(line: &str) -> Option<Dataset> {
    let mut f = line.split('\t');
    let name = f.next()?.to_string();
    let kind = match f.next()? {
        "filesystem" => DatasetKind::Filesystem,
        "volume" => DatasetKind::Volume,
        "snapshot" => DatasetKind::Snapshot,
        "bookmark" => DatasetKind::Bookmark,
        _ => return None,
    };
    let token = f.next()?;
    let receive_resume_token = if token == "-" { None } else { Some(token.to_string()) };
    let userrefs = f.next().unwrap_or("0");
    let has_holds = userrefs.parse::<u64>().unwrap_or(0) > 0;
    Some(Dataset {
        path: name,
        kind,
        receive_resume_token,
        has_holds,
    })
}

fn parse_snapshot_line(line: &str) -> Option<Snapshot> {
    let mut f = line.split('\t');
    let name = f.next()?;
    let (dataset, snap_name) = name.split_once('@')?;
    let creation_secs: i64 = f.next()?.parse().ok()?;
    let guid = f.next().map(|s| s.to_string()).filter(|s| s != "-");
    let creation = Local.timestamp_opt(creation_secs, 0).single()?;
    Some(Snapshot {
        dataset: dataset.to_string(),
        snap_name: snap_name.to_string(),
        creation,
        guid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dataset_list_line() {
        let line = "tank/data\tfilesystem\t-\t0";
        let dataset = parse_dataset_line(line).unwrap();
        assert_eq!(dataset.path, "tank/data");
        assert_eq!(dataset.kind, DatasetKind::Filesystem);
        assert!(dataset.receive_resume_token.is_none());
        assert!(!dataset.has_holds);
    }

    #[test]
    fn parses_dataset_with_resume_token_and_holds() {
        let line = "tank/data\tfilesystem\t1-abcdef\t2";
        let dataset = parse_dataset_line(line).unwrap();
        assert_eq!(dataset.receive_resume_token.as_deref(), Some("1-abcdef"));
        assert!(dataset.has_holds);
    }

    #[test]
    fn parses_size_estimate_from_dry_run_output() {
        let stdout = "full\ttank/data@pyznap_2026-01-01_00:00:00_daily\t12345\nsize\t67890\n";
        assert_eq!(parse_size_line(stdout), Some(67890));
    }

    #[test]
    fn missing_size_line_yields_none() {
        assert_eq!(parse_size_line("incremental\ttank/data@a\ttank/data@b\t12345\n"), None);
    }

    #[test]
    fn parses_snapshot_list_line() {
        let line = "tank/data@pyznap_2026-01-01_00:00:00_daily\t1767225600\t12345";
        let snap = parse_snapshot_line(line).unwrap();
        assert_eq!(snap.dataset, "tank/data");
        assert_eq!(snap.snap_name, "pyznap_2026-01-01_00:00:00_daily");
        assert_eq!(snap.guid.as_deref(), Some("12345"));
    }
}
