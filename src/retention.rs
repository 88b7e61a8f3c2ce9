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

use crate::model::{format_snap_name, parse_snap_name, Granularity, Snapshot};
use chrono::{DateTime, Local};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionCounts {
    pub frequent: u32,
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub yearly: u32,
}

impl RetentionCounts {
    pub fn get(&self, g: Granularity) -> u32 {
        match g {
            Granularity::Frequent => self.frequent,
            Granularity::Hourly => self.hourly,
            Granularity::Daily => self.daily,
            Granularity::Weekly => self.weekly,
            Granularity::Monthly => self.monthly,
            Granularity::Yearly => self.yearly,
        }
    }
}

struct Parsed<'a> {
    snap: &'a Snapshot,
    ts: DateTime<Local>,
    granularity: Granularity,
}

fn classify<'a>(snapshots: &'a [Snapshot], prefix: &str) -> (Vec<Parsed<'a>>, Vec<&'a Snapshot>) {
    let mut pyznap = Vec::new();
    let mut foreign = Vec::new();
    for s in snapshots {
        match parse_snap_name(&s.snap_name, prefix) {
            Some(parsed) => pyznap.push(Parsed { snap: s, ts: parsed.to_local(), granularity: parsed.granularity }),
            None => foreign.push(s),
        }
    }
    (pyznap, foreign)
}

pub struct RetentionPlan<'a> {
    pub keep: HashSet<&'a str>,
    pub destroy: Vec<&'a Snapshot>,
    pub warnings: Vec<String>,
}

/// Decides which pyznap-named snapshots to keep and which to destroy.
///
/// For each granularity with a nonzero count, the pyznap snapshots (of *any*
/// suffix -- a `frequent` snapshot can double as the `daily` representative
/// of its day) are walked newest-first; the first one seen in each distinct
/// civil-calendar window for that granularity is a representative, kept
/// until the count is exhausted. Foreign-named snapshots are never touched.
/// `busy` reports holds or an in-progress receive on a snapshot that would
/// otherwise be destroyed; such snapshots are kept with a warning instead.
///
/// The newest snapshot of each configured granularity's *own* suffix is
/// always kept in addition to the window representatives above, even if a
/// same-instant sibling of another suffix already claimed that window's
/// representative slot. Without this, `take`'s "does this granularity's own
/// newest snapshot already cover the current window" check can go from
/// finding one to finding none after a `clean`, recreating a snapshot that
/// was only just destroyed and breaking idempotency of a full sweep.
pub fn retain<'a>(
    snapshots: &'a [Snapshot],
    prefix: &str,
    counts: RetentionCounts,
    _now: DateTime<Local>,
    busy: impl Fn(&Snapshot) -> bool,
) -> RetentionPlan<'a> {
    let (pyznap, _foreign) = classify(snapshots, prefix);
    let mut keep: HashSet<&str> = HashSet::new();

    for g in Granularity::ALL {
        let n = counts.get(g);
        if n == 0 {
            continue;
        }
        let mut newest_first: Vec<&Parsed> = pyznap.iter().collect();
        newest_first.sort_by(|a, b| b.ts.cmp(&a.ts));
        let mut kept_for_g = 0u32;
        let mut last_window: Option<DateTime<Local>> = None;
        for parsed in newest_first {
            let is_new_window = match last_window {
                None => true,
                Some(w) => !g.same_window(w, parsed.ts),
            };
            if is_new_window {
                last_window = Some(parsed.ts);
                keep.insert(parsed.snap.snap_name.as_str());
                kept_for_g += 1;
                if kept_for_g >= n {
                    break;
                }
            }
        }
        if let Some(newest_own) = pyznap.iter().filter(|p| p.granularity == g).max_by_key(|p| p.ts) {
            keep.insert(newest_own.snap.snap_name.as_str());
        }
    }

    let mut destroy = Vec::new();
    let mut warnings = Vec::new();
    for parsed in &pyznap {
        if keep.contains(parsed.snap.snap_name.as_str()) {
            continue;
        }
        if busy(parsed.snap) {
            warnings.push(format!(
                "{} has holds or an in-progress receive; skipping destroy",
                parsed.snap.full_name()
            ));
            keep.insert(parsed.snap.snap_name.as_str());
            continue;
        }
        destroy.push(parsed.snap);
    }

    RetentionPlan { keep, destroy, warnings }
}

/// Decides which new snapshots to take right now: one per granularity whose
/// newest existing snapshot *of that granularity's own suffix* isn't already
/// in the current civil-calendar window.
pub fn take(snapshots: &[Snapshot], prefix: &str, counts: RetentionCounts, now: DateTime<Local>) -> Vec<(Granularity, String)> {
    let (pyznap, _foreign) = classify(snapshots, prefix);
    let mut result = Vec::new();
    for g in Granularity::ALL {
        let n = counts.get(g);
        if n == 0 {
            continue;
        }
        let newest = pyznap.iter().filter(|p| p.granularity == g).max_by_key(|p| p.ts);
        let needs_new = match newest {
            None => true,
            Some(p) => !g.same_window(p.ts, now),
        };
        if needs_new {
            result.push((g, format_snap_name(prefix, now, g)));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snap(dataset: &str, name: &str, ts: DateTime<Local>) -> Snapshot {
        Snapshot {
            dataset: dataset.to_string(),
            snap_name: name.to_string(),
            creation: ts,
            guid: None,
        }
    }

    #[test]
    fn empty_dataset_takes_all_configured_granularities() {
        let counts = RetentionCounts {
            frequent: 4,
            hourly: 24,
            daily: 7,
            weekly: 4,
            monthly: 6,
            yearly: 1,
        };
        let now = Local.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let created = take(&[], "pyznap", counts, now);
        assert_eq!(created.len(), 6);
    }

    #[test]
    fn foreign_snapshots_are_never_destroyed() {
        let now = Local.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let snaps = vec![snap("tank/data", "manual-backup", now)];
        let plan = retain(&snaps, "pyznap", RetentionCounts::default(), now, |_| false);
        assert!(plan.destroy.is_empty());
    }

    #[test]
    fn busy_snapshots_are_kept_with_a_warning() {
        let now = Local.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let old = now - chrono::Duration::days(400);
        let name = format_snap_name("pyznap", old, Granularity::Daily);
        let snaps = vec![snap("tank/data", &name, old)];
        let plan = retain(&snaps, "pyznap", RetentionCounts { daily: 1, ..Default::default() }, now, |_| true);
        assert!(plan.destroy.is_empty());
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn hourly_representative_can_be_a_frequent_named_snapshot() {
        let now = Local.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let ts = Local.with_ymd_and_hms(2026, 6, 1, 11, 30, 0).unwrap();
        let name = format_snap_name("pyznap", ts, Granularity::Frequent);
        let snaps = vec![snap("tank/data", &name, ts)];
        let plan = retain(&snaps, "pyznap", RetentionCounts { hourly: 1, ..Default::default() }, now, |_| false);
        assert!(plan.keep.contains(name.as_str()));
        assert!(plan.destroy.is_empty());
    }

    #[test]
    fn keeps_at_most_n_representatives_per_granularity() {
        let now = Local.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap();
        let mut snaps = Vec::new();
        for day_offset in 0..10 {
            let ts = now - chrono::Duration::days(day_offset);
            snaps.push(snap("tank/data", &format_snap_name("pyznap", ts, Granularity::Daily), ts));
        }
        let plan = retain(&snaps, "pyznap", RetentionCounts { daily: 3, ..Default::default() }, now, |_| false);
        assert_eq!(plan.keep.len(), 3);
        assert_eq!(plan.destroy.len(), 7);
    }

    #[test]
    fn full_sweep_is_idempotent_when_every_granularity_collapses_to_one_window() {
        let now = Local.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let counts = RetentionCounts { frequent: 1, hourly: 1, daily: 1, weekly: 1, monthly: 1, yearly: 1 };
        let snaps: Vec<Snapshot> = Granularity::ALL
            .into_iter()
            .map(|g| snap("tank/data", &format_snap_name("pyznap", now, g), now))
            .collect();

        let plan = retain(&snaps, "pyznap", counts, now, |_| false);
        for g in Granularity::ALL {
            let name = format_snap_name("pyznap", now, g);
            assert!(plan.keep.contains(name.as_str()), "{name} should survive as its own granularity's representative");
        }

        let remaining: Vec<Snapshot> = snaps.into_iter().filter(|s| plan.keep.contains(s.snap_name.as_str())).collect();
        let created = take(&remaining, "pyznap", counts, now);
        assert!(created.is_empty(), "immediately re-running take after clean must not recreate anything");
    }
}
