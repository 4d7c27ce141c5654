//! # Trajectory Distributor
//!
//! Splits a [`RobotTrajectory`] into per-controller parts: one trajectory per selected
//! controller, each containing only the joints that controller will drive. Waypoint timing is
//! preserved; the value rows of every waypoint are reindexed to the part's joint ordering.
//!
//! When two selected controllers both actuate a joint, the joint is assigned to the controller
//! with the smaller joint set (ties broken by name), so that no joint is ever driven twice.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;

use log::warn;
use traj_if::traj::{
    JointTrajectory, JointTrajectoryPoint, MultiDofJointTrajectory, MultiDofJointTrajectoryPoint,
    RobotTrajectory,
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised while configuring a trajectory for execution.
#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("The trajectory to execute actuates no joints")]
    EmptyTrajectory,

    #[error("No combination of the available controllers covers joints {0:?}")]
    NoCoverage(Vec<String>),

    #[error("Joints {0:?} are not covered by any selected controller")]
    UnassignedJoints(Vec<String>),

    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Split `trajectory` into one part per controller.
///
/// `controllers` and `joint_sets` are parallel: `joint_sets[i]` is the set of joints actuated
/// by `controllers[i]`. The returned parts are parallel to `controllers`. Fails if any joint
/// of the trajectory is covered by no controller.
pub fn distribute_trajectory(
    trajectory: &RobotTrajectory,
    controllers: &[String],
    joint_sets: &[HashSet<String>],
) -> Result<Vec<RobotTrajectory>, ConfigureError> {
    // Per-controller column indices into the single-DOF and multi-DOF joint name lists
    let single_cols = assign_joints(
        &trajectory.joint_trajectory.joint_names,
        controllers,
        joint_sets,
    )?;
    let multi_cols = assign_joints(
        &trajectory.multi_dof_joint_trajectory.joint_names,
        controllers,
        joint_sets,
    )?;

    let parts = controllers
        .iter()
        .enumerate()
        .map(|(i, _)| RobotTrajectory {
            joint_trajectory: extract_single_dof(&trajectory.joint_trajectory, &single_cols[i]),
            multi_dof_joint_trajectory: extract_multi_dof(
                &trajectory.multi_dof_joint_trajectory,
                &multi_cols[i],
            ),
        })
        .collect();

    Ok(parts)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Assign each joint (by column index) to exactly one controller.
///
/// Returns one column index list per controller, preserving the input joint ordering within
/// each part.
fn assign_joints(
    joint_names: &[String],
    controllers: &[String],
    joint_sets: &[HashSet<String>],
) -> Result<Vec<Vec<usize>>, ConfigureError> {
    let mut columns: Vec<Vec<usize>> = vec![Vec::new(); controllers.len()];
    let mut unassigned: Vec<String> = Vec::new();

    for (col, joint) in joint_names.iter().enumerate() {
        // Among the controllers actuating this joint, the one with the smallest joint set
        // (ties by name) takes it
        let owner = controllers
            .iter()
            .enumerate()
            .filter(|(i, _)| joint_sets[*i].contains(joint))
            .min_by(|(i, a), (j, b)| {
                joint_sets[*i]
                    .len()
                    .cmp(&joint_sets[*j].len())
                    .then_with(|| a.cmp(b))
            });

        match owner {
            Some((i, _)) => columns[i].push(col),
            None => unassigned.push(joint.clone()),
        }
    }

    if !unassigned.is_empty() {
        warn!(
            "Cannot distribute trajectory: joints {:?} are not covered by the selected \
             controllers",
            unassigned
        );
        return Err(ConfigureError::UnassignedJoints(unassigned));
    }

    Ok(columns)
}

/// Build the single-DOF sub-trajectory containing only the given columns.
fn extract_single_dof(trajectory: &JointTrajectory, columns: &[usize]) -> JointTrajectory {
    if columns.is_empty() {
        return JointTrajectory::default();
    }

    JointTrajectory {
        joint_names: columns
            .iter()
            .map(|&c| trajectory.joint_names[c].clone())
            .collect(),
        points: trajectory
            .points
            .iter()
            .map(|point| JointTrajectoryPoint {
                positions: select_columns(&point.positions, columns),
                velocities: select_columns(&point.velocities, columns),
                accelerations: select_columns(&point.accelerations, columns),
                effort: select_columns(&point.effort, columns),
                time_from_start: point.time_from_start,
            })
            .collect(),
    }
}

/// Build the multi-DOF sub-trajectory containing only the given columns.
fn extract_multi_dof(
    trajectory: &MultiDofJointTrajectory,
    columns: &[usize],
) -> MultiDofJointTrajectory {
    if columns.is_empty() {
        return MultiDofJointTrajectory::default();
    }

    MultiDofJointTrajectory {
        joint_names: columns
            .iter()
            .map(|&c| trajectory.joint_names[c].clone())
            .collect(),
        points: trajectory
            .points
            .iter()
            .map(|point| MultiDofJointTrajectoryPoint {
                transforms: columns
                    .iter()
                    .filter_map(|&c| point.transforms.get(c).cloned())
                    .collect(),
                time_from_start: point.time_from_start,
            })
            .collect(),
    }
}

/// Pick the given columns out of a waypoint value row. Empty rows stay empty, so optional
/// velocity/acceleration/effort arrays are preserved as absent.
fn select_columns(values: &[f64], columns: &[usize]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    columns
        .iter()
        .filter_map(|&c| values.get(c).copied())
        .collect()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn joints(names: &[&str]) -> HashSet<String> {
        names.iter().map(|j| j.to_string()).collect()
    }

    fn three_joint_traj() -> RobotTrajectory {
        RobotTrajectory {
            joint_trajectory: JointTrajectory {
                joint_names: vec!["j1".into(), "j2".into(), "j3".into()],
                points: vec![
                    JointTrajectoryPoint {
                        positions: vec![0.1, 0.2, 0.3],
                        velocities: vec![1.1, 1.2, 1.3],
                        accelerations: vec![],
                        effort: vec![],
                        time_from_start: Duration::from_millis(0),
                    },
                    JointTrajectoryPoint {
                        positions: vec![0.4, 0.5, 0.6],
                        velocities: vec![1.4, 1.5, 1.6],
                        accelerations: vec![],
                        effort: vec![],
                        time_from_start: Duration::from_millis(500),
                    },
                ],
            },
            multi_dof_joint_trajectory: MultiDofJointTrajectory::default(),
        }
    }

    #[test]
    fn test_partition_property() {
        // Every joint of the input ends up in exactly one part
        let traj = three_joint_traj();
        let controllers = vec!["a_ctrl".to_string(), "b_ctrl".to_string()];
        let joint_sets = vec![joints(&["j1", "j2"]), joints(&["j3"])];

        let parts = distribute_trajectory(&traj, &controllers, &joint_sets).unwrap();
        assert_eq!(parts.len(), 2);

        let mut seen: Vec<String> = Vec::new();
        for part in &parts {
            for joint in &part.joint_trajectory.joint_names {
                assert!(!seen.contains(joint), "joint {} driven twice", joint);
                seen.push(joint.clone());
            }
        }
        seen.sort();
        assert_eq!(seen, vec!["j1", "j2", "j3"]);
    }

    #[test]
    fn test_rows_reindexed_and_timing_preserved() {
        let traj = three_joint_traj();
        let controllers = vec!["a_ctrl".to_string(), "b_ctrl".to_string()];
        let joint_sets = vec![joints(&["j1", "j2"]), joints(&["j3"])];

        let parts = distribute_trajectory(&traj, &controllers, &joint_sets).unwrap();

        assert_eq!(parts[0].joint_trajectory.points[1].positions, vec![0.4, 0.5]);
        assert_eq!(parts[1].joint_trajectory.points[1].positions, vec![0.6]);
        assert_eq!(parts[1].joint_trajectory.points[1].velocities, vec![1.6]);
        assert_eq!(
            parts[1].joint_trajectory.points[1].time_from_start,
            Duration::from_millis(500)
        );
        // Absent value rows stay absent
        assert!(parts[0].joint_trajectory.points[0].accelerations.is_empty());
    }

    #[test]
    fn test_overlap_goes_to_smaller_controller() {
        // a_ctrl = {j1, j2}, b_ctrl = {j2, j3}: equal sizes, j2 goes to a_ctrl by name
        let traj = three_joint_traj();
        let controllers = vec!["a_ctrl".to_string(), "b_ctrl".to_string()];
        let joint_sets = vec![joints(&["j1", "j2"]), joints(&["j2", "j3"])];

        let parts = distribute_trajectory(&traj, &controllers, &joint_sets).unwrap();

        assert_eq!(parts[0].joint_trajectory.joint_names, vec!["j1", "j2"]);
        assert_eq!(parts[1].joint_trajectory.joint_names, vec!["j3"]);

        // Smaller joint set wins regardless of name ordering
        let joint_sets = vec![joints(&["j1", "j2", "j3"]), joints(&["j2"])];
        let parts = distribute_trajectory(&traj, &controllers, &joint_sets).unwrap();
        assert_eq!(parts[0].joint_trajectory.joint_names, vec!["j1", "j3"]);
        assert_eq!(parts[1].joint_trajectory.joint_names, vec!["j2"]);
    }

    #[test]
    fn test_uncovered_joint_fails() {
        let traj = three_joint_traj();
        let controllers = vec!["a_ctrl".to_string()];
        let joint_sets = vec![joints(&["j1", "j2"])];

        let err = distribute_trajectory(&traj, &controllers, &joint_sets).unwrap_err();
        match err {
            ConfigureError::UnassignedJoints(joints) => assert_eq!(joints, vec!["j3"]),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
