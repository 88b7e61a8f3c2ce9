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
use crate::model::Snapshot;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub enum Action {
    CreateAncestors { dataset: String },
    Resume { dataset: String, token: String },
    FullSend { dataset: String, snapshot: String },
    Incremental { dataset: String, from: String, to: String },
}

#[derive(Debug, Clone)]
pub struct DatasetPlan {
    pub source_dataset: String,
    pub dest_dataset: String,
    pub actions: Vec<Action>,
}

/// Is `source_dataset` covered by any exclude glob? Globs are matched against
/// the full dataset path (fnmatch semantics, via `fast-glob`), not just the
/// trailing component.
pub fn is_excluded(source_dataset: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|pat| fast_glob::glob_match(pat, source_dataset))
}

pub fn dest_path_for(source_root: &str, dest_root: &str, source_dataset: &str) -> String {
    if source_dataset == source_root {
        return dest_root.to_string();
    }
    let relative = source_dataset
        .strip_prefix(source_root)
        .unwrap_or(source_dataset)
        .trim_start_matches('/');
    format!("{dest_root}/{relative}")
}

fn full_send_plan(source_dataset: &str, source_snaps: &[Snapshot]) -> Vec<Action> {
    let mut actions = Vec::new();
    let Some(oldest) = source_snaps.first() else {
        return actions;
    };
    actions.push(Action::FullSend {
        dataset: source_dataset.to_string(),
        snapshot: oldest.snap_name.clone(),
    });
    if let Some(newest) = source_snaps.last() {
        if newest.snap_name != oldest.snap_name {
            actions.push(Action::Incremental {
                dataset: source_dataset.to_string(),
                from: oldest.snap_name.clone(),
                to: newest.snap_name.clone(),
            });
        }
    }
    actions
}

/// Plans the actions needed to bring `dest_dataset` up to date with
/// `source_dataset`. `dest_snaps` is `None` when the destination dataset
/// doesn't exist yet. `is_root` restricts auto-creation to the subtree's
/// root dataset (children are created implicitly by `zfs receive -p`-style
/// recursion as their own root full-send lands).
pub fn plan_dataset(
    source_dataset: &str,
    dest_dataset: &str,
    source_snaps: &[Snapshot],
    dest_snaps: Option<&[Snapshot]>,
    dest_resume_token: Option<&str>,
    dest_auto_create: bool,
    is_root: bool,
    resume: bool,
) -> Result<DatasetPlan, ZfsError> {
    let mut actions = Vec::new();

    match dest_snaps {
        None => {
            if !dest_auto_create || !is_root {
                return Err(ZfsError::DatasetNotFound(dest_dataset.to_string()));
            }
            actions.push(Action::CreateAncestors {
                dataset: dest_dataset.to_string(),
            });
            actions.extend(full_send_plan(source_dataset, source_snaps));
        }
        Some(dest_snaps) if dest_snaps.is_empty() => {
            actions.extend(full_send_plan(source_dataset, source_snaps));
        }
        Some(dest_snaps) => {
            if resume {
                if let Some(token) = dest_resume_token {
                    actions.push(Action::Resume {
                        dataset: dest_dataset.to_string(),
                        token: token.to_string(),
                    });
                }
            }
            let dest_names: HashSet<&str> = dest_snaps.iter().map(|s| s.snap_name.as_str()).collect();
            let base = source_snaps.iter().rev().find(|s| dest_names.contains(s.snap_name.as_str()));
            let Some(base) = base else {
                return Err(ZfsError::NoCommonBase);
            };
            if let Some(newest) = source_snaps.last() {
                if newest.snap_name != base.snap_name {
                    actions.push(Action::Incremental {
                        dataset: source_dataset.to_string(),
                        from: base.snap_name.clone(),
                        to: newest.snap_name.clone(),
                    });
                }
            }
        }
    }

    Ok(DatasetPlan {
        source_dataset: source_dataset.to_string(),
        dest_dataset: dest_dataset.to_string(),
        actions,
    })
}

/// Plans every non-excluded dataset in a source subtree against its mirrored
/// destination path. `lookup_snaps`/`lookup_dest` are injected so the planner
/// itself stays pure and testable; callers wire them to `ZfsHost`.
pub fn plan_subtree(
    source_root: &str,
    dest_root: &str,
    source_datasets: &[String],
    exclude: &[String],
    mut lookup_snaps: impl FnMut(&str) -> Result<Vec<Snapshot>, ZfsError>,
    mut lookup_dest: impl FnMut(&str) -> Result<Option<(Vec<Snapshot>, Option<String>)>, ZfsError>,
    dest_auto_create: bool,
    resume: bool,
) -> Result<Vec<DatasetPlan>, ZfsError> {
    let mut plans = Vec::new();
    for source_dataset in source_datasets {
        if is_excluded(source_dataset, exclude) {
            continue;
        }
        let dest_dataset = dest_path_for(source_root, dest_root, source_dataset);
        let source_snaps = lookup_snaps(source_dataset)?;
        let (dest_snaps, dest_token) = match lookup_dest(&dest_dataset)? {
            Some((snaps, token)) => (Some(snaps), token),
            None => (None, None),
        };
        let is_root = source_dataset == source_root;
        let plan = plan_dataset(
            source_dataset,
            &dest_dataset,
            &source_snaps,
            dest_snaps.as_deref(),
            dest_token.as_deref(),
            dest_auto_create,
            is_root,
            resume,
        )?;
        plans.push(plan);
    }
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn snap(name: &str) -> Snapshot {
        Snapshot {
            dataset: "tank/data".to_string(),
            snap_name: name.to_string(),
            creation: Local.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            guid: None,
        }
    }

    #[test]
    fn fresh_destination_does_oldest_first_full_send() {
        let source = vec![snap("s1"), snap("s2"), snap("s3")];
        let plan = plan_dataset("tank/data", "backup/data", &source, None, None, true, true, false).unwrap();
        assert!(matches!(&plan.actions[0], Action::CreateAncestors { .. }));
        assert!(matches!(&plan.actions[1], Action::FullSend { snapshot, .. } if snapshot == "s1"));
        assert!(matches!(&plan.actions[2], Action::Incremental { from, to, .. } if from == "s1" && to == "s3"));
    }

    #[test]
    fn up_to_date_destination_produces_no_actions() {
        let source = vec![snap("s1"), snap("s2")];
        let dest = vec![snap("s1"), snap("s2")];
        let plan = plan_dataset("tank/data", "backup/data", &source, Some(&dest), None, false, true, false).unwrap();
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn common_base_produces_one_incremental_action() {
        let source = vec![snap("s1"), snap("s2"), snap("s3")];
        let dest = vec![snap("s1")];
        let plan = plan_dataset("tank/data", "backup/data", &source, Some(&dest), None, false, true, false).unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert!(matches!(&plan.actions[0], Action::Incremental { from, to, .. } if from == "s1" && to == "s3"));
    }

    #[test]
    fn diverged_history_is_a_hard_error() {
        let source = vec![snap("s2"), snap("s3")];
        let dest = vec![snap("s1")];
        let err = plan_dataset("tank/data", "backup/data", &source, Some(&dest), None, false, true, false).unwrap_err();
        assert!(matches!(err, ZfsError::NoCommonBase));
    }

    #[test]
    fn resume_token_is_tried_before_any_fresh_send() {
        let source = vec![snap("s1"), snap("s2")];
        let dest = vec![snap("s1")];
        let plan = plan_dataset("tank/data", "backup/data", &source, Some(&dest), Some("1-deadbeef"), false, true, true).unwrap();
        assert!(matches!(&plan.actions[0], Action::Resume { token, .. } if token == "1-deadbeef"));
    }

    #[test]
    fn excluded_subtree_members_are_skipped() {
        assert!(is_excluded("tank/data/tmp", &["tank/data/tmp*".to_string()]));
        assert!(!is_excluded("tank/data/keep", &["tank/data/tmp*".to_string()]));
    }

    #[test]
    fn dest_path_mirrors_relative_suffix() {
        assert_eq!(dest_path_for("tank/data", "backup/pool", "tank/data"), "backup/pool");
        assert_eq!(dest_path_for("tank/data", "backup/pool", "tank/data/child"), "backup/pool/child");
    }
}
