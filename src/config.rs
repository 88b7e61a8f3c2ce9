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

use crate::error::ConfigError;
use crate::model::{parse_location, Location};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub prefix: String,
    pub snap: bool,
    pub clean: bool,
    pub frequent: u32,
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub yearly: u32,
    pub key: Option<PathBuf>,
    pub dest: Vec<Location>,
    pub dest_key: Vec<Option<PathBuf>>,
    pub compress: Vec<String>,
    pub exclude: Vec<Vec<String>>,
    pub raw_send: Vec<bool>,
    pub resume: Vec<bool>,
    pub dest_auto_create: Vec<bool>,
    pub retries: Vec<u32>,
    pub retry_interval: Vec<u32>,
}

impl Policy {
    /// Every per-dest list option is either absent (the default applies to
    /// every `dest`) or has exactly one entry per `dest`.
    pub fn validate_dest_lists(&self, section: &str) -> Result<(), ConfigError> {
        let n = self.dest.len();
        let checks: [(&str, usize); 8] = [
            ("dest_key", self.dest_key.len()),
            ("compress", self.compress.len()),
            ("exclude", self.exclude.len()),
            ("raw_send", self.raw_send.len()),
            ("resume", self.resume.len()),
            ("dest_auto_create", self.dest_auto_create.len()),
            ("retries", self.retries.len()),
            ("retry_interval", self.retry_interval.len()),
        ];
        for (key, len) in checks {
            if len != 0 && len != n {
                return Err(ConfigError::MismatchedDestList {
                    section: section.to_string(),
                    key: key.to_string(),
                    count: n,
                    actual: len,
                });
            }
        }
        Ok(())
    }

    /// `lzop` unless overridden; `apply_send` falls back to `none` itself
    /// when the chosen compressor isn't installed on both ends.
    pub fn compress_for(&self, idx: usize) -> &str {
        self.compress.get(idx).map(|s| s.as_str()).unwrap_or("lzop")
    }

    pub fn raw_send_for(&self, idx: usize) -> bool {
        self.raw_send.get(idx).copied().unwrap_or(false)
    }

    pub fn resume_for(&self, idx: usize) -> bool {
        self.resume.get(idx).copied().unwrap_or(true)
    }

    pub fn dest_auto_create_for(&self, idx: usize) -> bool {
        self.dest_auto_create.get(idx).copied().unwrap_or(false)
    }

    pub fn exclude_for(&self, idx: usize) -> &[String] {
        self.exclude.get(idx).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn retries_for(&self, idx: usize) -> u32 {
        self.retries.get(idx).copied().unwrap_or(0)
    }

    pub fn retry_interval_for(&self, idx: usize) -> u32 {
        self.retry_interval.get(idx).copied().unwrap_or(10)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawSection {
    pub path: String,
    pub values: HashMap<String, String>,
}

/// Parses the INI-like format: `[dataset/path]` sections, `key = value`
/// lines, comma-separated lists, `#`/`;` full-line comments.
pub fn parse_sections(input: &str) -> Result<Vec<RawSection>, ConfigError> {
    let mut sections = Vec::new();
    let mut current: Option<RawSection> = None;
    for (i, raw_line) in input.lines().enumerate() {
        let lineno = i + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            current = Some(RawSection {
                path: stripped.trim().to_string(),
                values: HashMap::new(),
            });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Parse(format!("line {lineno}: expected \"key = value\"")));
        };
        let section = current
            .as_mut()
            .ok_or_else(|| ConfigError::Parse(format!("line {lineno}: value outside of any [section]")))?;
        section.values.insert(key.trim().to_string(), value.trim().to_string());
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }
    Ok(sections)
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s.to_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => Err(ConfigError::Parse(format!("invalid boolean {other:?}"))),
    }
}

fn split_bool_list(value: &str) -> Result<Vec<bool>, ConfigError> {
    split_list(value).iter().map(|s| parse_bool(s)).collect()
}

fn split_u32_list(value: &str) -> Result<Vec<u32>, ConfigError> {
    split_list(value)
        .iter()
        .map(|s| s.parse().map_err(|_| ConfigError::Parse(format!("invalid integer {s:?}"))))
        .collect()
}

pub fn build_policy(section: &str, values: &HashMap<String, String>) -> Result<Policy, ConfigError> {
    let mut policy = Policy {
        prefix: "pyznap".to_string(),
        snap: true,
        clean: true,
        ..Policy::default()
    };
    for (key, value) in values {
        match key.as_str() {
            "prefix" => policy.prefix = value.clone(),
            "snap" => policy.snap = parse_bool(value)?,
            "clean" => policy.clean = parse_bool(value)?,
            "frequent" => policy.frequent = value.parse().map_err(|_| ConfigError::Parse(format!("invalid frequent {value:?}")))?,
            "hourly" => policy.hourly = value.parse().map_err(|_| ConfigError::Parse(format!("invalid hourly {value:?}")))?,
            "daily" => policy.daily = value.parse().map_err(|_| ConfigError::Parse(format!("invalid daily {value:?}")))?,
            "weekly" => policy.weekly = value.parse().map_err(|_| ConfigError::Parse(format!("invalid weekly {value:?}")))?,
            "monthly" => policy.monthly = value.parse().map_err(|_| ConfigError::Parse(format!("invalid monthly {value:?}")))?,
            "yearly" => policy.yearly = value.parse().map_err(|_| ConfigError::Parse(format!("invalid yearly {value:?}")))?,
            "key" => policy.key = Some(PathBuf::from(value)),
            "dest" => {
                policy.dest = split_list(value)
                    .iter()
                    .map(|s| parse_location(s).map_err(ConfigError::Parse))
                    .collect::<Result<_, _>>()?;
            }
            "dest_key" => {
                policy.dest_key = split_list(value)
                    .into_iter()
                    .map(|s| if s.is_empty() || s == "-" { None } else { Some(PathBuf::from(s)) })
                    .collect();
            }
            "compress" => policy.compress = split_list(value),
            "exclude" => {
                policy.exclude = value
                    .split(',')
                    .map(|group| group.split_whitespace().map(|s| s.to_string()).collect())
                    .collect();
            }
            "raw_send" => policy.raw_send = split_bool_list(value)?,
            "resume" => policy.resume = split_bool_list(value)?,
            "dest_auto_create" => policy.dest_auto_create = split_bool_list(value)?,
            "retries" => policy.retries = split_u32_list(value)?,
            "retry_interval" => policy.retry_interval = split_u32_list(value)?,
            other => return Err(ConfigError::Parse(format!("unknown config key {other:?}"))),
        }
    }
    policy.validate_dest_lists(section)?;
    Ok(policy)
}

/// The parsed config file as a set of dataset-path sections, with
/// longest-matching-ancestor inheritance applied on lookup.
pub struct ConfigTree {
    sections: Vec<RawSection>,
}

impl ConfigTree {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Ok(Self { sections: parse_sections(input)? })
    }

    pub fn sections(&self) -> &[RawSection] {
        &self.sections
    }

    /// Merges every ancestor section's raw key/value pairs (including the
    /// dataset's own section, if present) from least to most specific, then
    /// builds a `Policy` from the result. A child section overriding only
    /// `daily` still inherits `hourly`/`dest`/etc. from its parent.
    pub fn effective_policy(&self, dataset_path: &str) -> Result<Policy, ConfigError> {
        let mut matching: Vec<&RawSection> = self
            .sections
            .iter()
            .filter(|s| dataset_path == s.path || dataset_path.starts_with(&format!("{}/", s.path)))
            .collect();
        matching.sort_by_key(|s| s.path.len());
        let mut merged: HashMap<String, String> = HashMap::new();
        for section in matching {
            for (k, v) in &section.values {
                merged.insert(k.clone(), v.clone());
            }
        }
        build_policy(dataset_path, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_lists() {
        let input = "\
[tank/data]
hourly = 24
dest = ssh::backup@example.com:pool/data
exclude = tank/data/tmp*, tank/data/cache*
";
        let tree = ConfigTree::parse(input).unwrap();
        let policy = tree.effective_policy("tank/data").unwrap();
        assert_eq!(policy.hourly, 24);
        assert_eq!(policy.dest.len(), 1);
        assert_eq!(policy.exclude[0], vec!["tank/data/tmp*".to_string(), "tank/data/cache*".to_string()]);
    }

    #[test]
    fn child_inherits_unset_keys_from_closest_ancestor() {
        let input = "\
[tank]
hourly = 24
daily = 7

[tank/data]
daily = 30
";
        let tree = ConfigTree::parse(input).unwrap();
        let policy = tree.effective_policy("tank/data").unwrap();
        assert_eq!(policy.hourly, 24, "inherited from [tank]");
        assert_eq!(policy.daily, 30, "overridden by [tank/data]");
    }

    #[test]
    fn mismatched_dest_list_length_is_rejected() {
        let input = "\
[tank/data]
dest = ssh::a@h:pool/a, ssh::b@h:pool/b
compress = gzip
";
        let tree = ConfigTree::parse(input).unwrap();
        let err = tree.effective_policy("tank/data").unwrap_err();
        assert!(matches!(err, ConfigError::MismatchedDestList { .. }));
    }

    #[test]
    fn unparseable_line_is_rejected() {
        assert!(parse_sections("[tank]\nnonsense line without equals\n").is_err());
    }
}
