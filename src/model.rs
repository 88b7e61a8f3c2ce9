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

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDateTime, TimeZone, Timelike};
use std::path::PathBuf;

/// A source or destination root, local or reached over ssh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Local { path: String },
    Remote {
        user: String,
        host: String,
        port: u16,
        key: Option<PathBuf>,
        path: String,
    },
}

impl Location {
    pub fn path(&self) -> &str {
        match self {
            Location::Local { path } => path,
            Location::Remote { path, .. } => path,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote { .. })
    }
}

/// Parses `ssh:PORT:USER@HOST:DATASET` or a bare `DATASET` for local.
/// An empty PORT field defaults to 22.
pub fn parse_location(spec: &str) -> Result<Location, String> {
    let Some(rest) = spec.strip_prefix("ssh:") else {
        return Ok(Location::Local {
            path: spec.to_string(),
        });
    };
    let mut parts = rest.splitn(3, ':');
    let port_str = parts.next().ok_or_else(|| format!("{spec:?}: missing port field"))?;
    let user_host = parts
        .next()
        .ok_or_else(|| format!("{spec:?}: missing user@host field"))?;
    let path = parts
        .next()
        .ok_or_else(|| format!("{spec:?}: missing dataset field"))?;
    let port = if port_str.is_empty() {
        22
    } else {
        port_str
            .parse()
            .map_err(|_| format!("{spec:?}: invalid port {port_str:?}"))?
    };
    let (user, host) = user_host
        .split_once('@')
        .ok_or_else(|| format!("{spec:?}: expected user@host"))?;
    Ok(Location::Remote {
        user: user.to_string(),
        host: host.to_string(),
        port,
        key: None,
        path: path.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Filesystem,
    Volume,
    Snapshot,
    Bookmark,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub path: String,
    pub kind: DatasetKind,
    pub receive_resume_token: Option<String>,
    pub has_holds: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub dataset: String,
    pub snap_name: String,
    pub creation: DateTime<Local>,
    pub guid: Option<String>,
}

impl Snapshot {
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.dataset, self.snap_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Frequent,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    pub const ALL: [Granularity; 6] = [
        Granularity::Frequent,
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Yearly,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Granularity::Frequent => "frequent",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Granularity> {
        match s {
            "frequent" => Some(Granularity::Frequent),
            "hourly" => Some(Granularity::Hourly),
            "daily" => Some(Granularity::Daily),
            "weekly" => Some(Granularity::Weekly),
            "monthly" => Some(Granularity::Monthly),
            "yearly" => Some(Granularity::Yearly),
            _ => None,
        }
    }

    /// Whether `a` and `b` fall in the same civil-calendar window for this granularity.
    /// Weekly uses the ISO week (Monday-start), matching `chrono`'s `iso_week`.
    pub fn same_window(&self, a: DateTime<Local>, b: DateTime<Local>) -> bool {
        match self {
            Granularity::Frequent => {
                a.date_naive() == b.date_naive() && a.hour() == b.hour() && a.minute() == b.minute()
            }
            Granularity::Hourly => a.date_naive() == b.date_naive() && a.hour() == b.hour(),
            Granularity::Daily => a.date_naive() == b.date_naive(),
            Granularity::Weekly => a.iso_week() == b.iso_week(),
            Granularity::Monthly => a.year() == b.year() && a.month() == b.month(),
            Granularity::Yearly => a.year() == b.year(),
        }
    }
}

const TIMESTAMP_FMT: &str = "%Y-%m-%d_%H:%M:%S";

pub fn format_snap_name(prefix: &str, ts: DateTime<Local>, g: Granularity) -> String {
    format!("{}_{}_{}", prefix, ts.format(TIMESTAMP_FMT), g.suffix())
}

pub struct PyznapName {
    pub timestamp: NaiveDateTime,
    pub granularity: Granularity,
}

impl PyznapName {
    pub fn to_local(&self) -> DateTime<Local> {
        match Local.from_local_datetime(&self.timestamp) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earlier, _) => earlier,
            LocalResult::None => Local.from_utc_datetime(&self.timestamp),
        }
    }
}

/// Strict parse of `<prefix>_YYYY-MM-DD_HH:MM:SS_<granularity>`. Anything that
/// doesn't round-trip through the exact format (stray whitespace, a foreign
/// naming scheme, a hand snapshot) is rejected, not coerced.
pub fn parse_snap_name(name: &str, expected_prefix: &str) -> Option<PyznapName> {
    let rest = name.strip_prefix(expected_prefix)?.strip_prefix('_')?;
    let (ts_part, gran_part) = rest.rsplit_once('_')?;
    let granularity = Granularity::parse(gran_part)?;
    let timestamp = NaiveDateTime::parse_from_str(ts_part, TIMESTAMP_FMT).ok()?;
    if ts_part != timestamp.format(TIMESTAMP_FMT).to_string() {
        return None;
    }
    Some(PyznapName { timestamp, granularity })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        let ts = Local.with_ymd_and_hms(2026, 3, 14, 9, 5, 0).unwrap();
        let name = format_snap_name("pyznap", ts, Granularity::Hourly);
        assert_eq!(name, "pyznap_2026-03-14_09:05:00_hourly");
        let parsed = parse_snap_name(&name, "pyznap").expect("parses");
        assert_eq!(parsed.granularity, Granularity::Hourly);
        assert_eq!(parsed.to_local(), ts);
    }

    #[test]
    fn rejects_foreign_names() {
        assert!(parse_snap_name("manual-backup-2026", "pyznap").is_none());
        assert!(parse_snap_name("pyznap_2026-03-14_09:05:00_weird", "pyznap").is_none());
        assert!(parse_snap_name("other_2026-03-14_09:05:00_hourly", "pyznap").is_none());
    }

    #[test]
    fn weekly_window_is_iso_week() {
        // 2026-03-16 is a Monday, 2026-03-15 is the preceding Sunday (different ISO week).
        let monday = Local.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap();
        let sunday = Local.with_ymd_and_hms(2026, 3, 15, 23, 59, 0).unwrap();
        assert!(!Granularity::Weekly.same_window(monday, sunday));
        let tuesday = Local.with_ymd_and_hms(2026, 3, 17, 5, 0, 0).unwrap();
        assert!(Granularity::Weekly.same_window(monday, tuesday));
    }

    #[test]
    fn parses_local_and_remote_location() {
        assert_eq!(
            parse_location("tank/data").unwrap(),
            Location::Local { path: "tank/data".to_string() }
        );
        let remote = parse_location("ssh::backup@example.com:tank/data").unwrap();
        assert_eq!(
            remote,
            Location::Remote {
                user: "backup".to_string(),
                host: "example.com".to_string(),
                port: 22,
                key: None,
                path: "tank/data".to_string(),
            }
        );
        let remote_port = parse_location("ssh:2222:backup@example.com:tank/data").unwrap();
        assert!(matches!(remote_port, Location::Remote { port: 2222, .. }));
    }
}
