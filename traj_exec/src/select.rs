//! # Controller Selector
//!
//! Given the set of joints a trajectory actuates, chooses a minimum-cardinality set of
//! controllers that covers them. Among covers of the same size, preference goes to the cover
//! with the most already-active controllers, then to the one with the fewest total joints
//! (the tightest fit).
//!
//! Selection is deterministic: candidates are enumerated lexicographically over the registry's
//! controller ordering (joint set size ascending, then name), and ties keep the first
//! candidate encountered. The same request therefore always yields the same execution shape.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;

use log::debug;

use crate::registry::ControllerInfo;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Select a minimal set of controllers covering all `actuated_joints`.
///
/// `available` must be ordered by the registry's deterministic ordering (see
/// [`crate::registry::ControllerRegistry::ordered_infos`]). Returns the selected controller
/// names in enumeration order, or `None` if no subset of the available controllers covers the
/// actuated joints.
pub fn select_controllers(
    available: &[ControllerInfo],
    actuated_joints: &HashSet<String>,
) -> Option<Vec<String>> {
    // Iterative deepening over the cover size: the first size that yields any cover is
    // minimal by construction.
    for count in 1..=available.len() {
        let mut best: Option<(Score, Vec<usize>)> = None;

        enumerate_combinations(available, count, 0, &mut Vec::new(), &mut |subset| {
            if !covers(available, subset, actuated_joints) {
                return;
            }

            let score = score_subset(available, subset);
            // Strictly-greater keeps the first candidate on ties, preserving determinism
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, subset.to_vec()));
            }
        });

        if let Some((score, subset)) = best {
            let selected: Vec<String> = subset
                .iter()
                .map(|&i| available[i].name.clone())
                .collect();
            debug!(
                "Selected {} controller(s) {:?} ({} active, {} joints total)",
                count, selected, score.0, -score.1
            );
            return Some(selected);
        }
    }

    None
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Subset score: more active controllers first, then fewer total joints.
type Score = (usize, i64);

fn score_subset(available: &[ControllerInfo], subset: &[usize]) -> Score {
    let active = subset
        .iter()
        .filter(|&&i| available[i].state.active)
        .count();
    let total_joints: i64 = subset.iter().map(|&i| available[i].joints.len() as i64).sum();

    (active, -total_joints)
}

/// Do the controllers at `subset` indices jointly cover all actuated joints?
fn covers(
    available: &[ControllerInfo],
    subset: &[usize],
    actuated_joints: &HashSet<String>,
) -> bool {
    actuated_joints
        .iter()
        .all(|joint| subset.iter().any(|&i| available[i].joints.contains(joint)))
}

/// Enumerate all `count`-element index subsets of `available` in lexicographic order, calling
/// `visit` for each.
fn enumerate_combinations(
    available: &[ControllerInfo],
    count: usize,
    start: usize,
    current: &mut Vec<usize>,
    visit: &mut dyn FnMut(&[usize]),
) {
    if current.len() == count {
        visit(current);
        return;
    }

    // Not enough elements left to complete the subset
    let remaining = count - current.len();
    for i in start..=available.len().saturating_sub(remaining) {
        current.push(i);
        enumerate_combinations(available, count, i + 1, current, visit);
        current.pop();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use traj_if::ctrl::ControllerState;

    use std::time::Instant;

    fn info(name: &str, joints: &[&str], active: bool) -> ControllerInfo {
        ControllerInfo {
            name: name.into(),
            joints: joints.iter().map(|j| j.to_string()).collect(),
            overlapping_controllers: HashSet::new(),
            state: ControllerState {
                active,
                default: false,
            },
            last_update: Instant::now(),
        }
    }

    /// Order infos the way the registry would: joint set size ascending, then name.
    fn ordered(mut infos: Vec<ControllerInfo>) -> Vec<ControllerInfo> {
        infos.sort_by(|a, b| {
            a.joints
                .len()
                .cmp(&b.joints.len())
                .then_with(|| a.name.cmp(&b.name))
        });
        infos
    }

    fn joints(names: &[&str]) -> HashSet<String> {
        names.iter().map(|j| j.to_string()).collect()
    }

    #[test]
    fn test_simple_cover() {
        let available = ordered(vec![
            info("a_ctrl", &["j1", "j2"], false),
            info("b_ctrl", &["j3"], false),
        ]);

        let selected =
            select_controllers(&available, &joints(&["j1", "j2", "j3"])).unwrap();
        let mut sorted = selected.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a_ctrl", "b_ctrl"]);
    }

    #[test]
    fn test_prefers_single_controller_cover() {
        // One controller covering everything beats two smaller ones
        let available = ordered(vec![
            info("a_ctrl", &["j1", "j2"], true),
            info("b_ctrl", &["j3"], true),
            info("whole_ctrl", &["j1", "j2", "j3"], false),
        ]);

        let selected =
            select_controllers(&available, &joints(&["j1", "j2", "j3"])).unwrap();
        assert_eq!(selected, vec!["whole_ctrl"]);
    }

    #[test]
    fn test_prefers_active_controllers() {
        // Two single-controller covers: the active one wins
        let available = ordered(vec![
            info("cold_ctrl", &["j1", "j2"], false),
            info("warm_ctrl", &["j1", "j2"], true),
        ]);

        let selected = select_controllers(&available, &joints(&["j1", "j2"])).unwrap();
        assert_eq!(selected, vec!["warm_ctrl"]);
    }

    #[test]
    fn test_prefers_tighter_fit() {
        // Equal activity: the cover actuating fewer joints overall wins
        let available = ordered(vec![
            info("exact_ctrl", &["j1", "j2"], false),
            info("wide_ctrl", &["j1", "j2", "j3", "j4"], false),
        ]);

        let selected = select_controllers(&available, &joints(&["j1", "j2"])).unwrap();
        assert_eq!(selected, vec!["exact_ctrl"]);
    }

    #[test]
    fn test_no_cover_fails() {
        let available = ordered(vec![info("a_ctrl", &["j1"], true)]);
        assert!(select_controllers(&available, &joints(&["j1", "j2"])).is_none());
    }

    #[test]
    fn test_cover_is_minimal() {
        // Exhaustively confirm minimality: no strict subset of the selection covers
        let available = ordered(vec![
            info("a_ctrl", &["j1", "j2"], false),
            info("b_ctrl", &["j2", "j3"], false),
            info("c_ctrl", &["j4"], false),
        ]);
        let actuated = joints(&["j1", "j2", "j3", "j4"]);

        let selected = select_controllers(&available, &actuated).unwrap();
        assert_eq!(selected.len(), 3);

        for skip in 0..selected.len() {
            let subset: Vec<&ControllerInfo> = selected
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, name)| available.iter().find(|c| &c.name == name).unwrap())
                .collect();

            let covered = actuated
                .iter()
                .all(|j| subset.iter().any(|c| c.joints.contains(j)));
            assert!(!covered, "dropping {} still covers", selected[skip]);
        }
    }

    #[test]
    fn test_deterministic_tie_break() {
        // Two identical-score covers: the lexicographically first enumeration wins, which
        // with equal joint counts is the name-ascending one
        let available = ordered(vec![
            info("left_ctrl", &["j1"], false),
            info("right_ctrl", &["j1"], false),
        ]);

        for _ in 0..10 {
            let selected = select_controllers(&available, &joints(&["j1"])).unwrap();
            assert_eq!(selected, vec!["left_ctrl"]);
        }
    }
}
