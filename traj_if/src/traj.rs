//! # Trajectory Message Types
//!
//! Joint-space trajectory definitions passed into the execution manager and split across
//! controllers by it. A [`RobotTrajectory`] carries two parallel sub-trajectories: one for
//! single degree-of-freedom joints (revolute/prismatic), and one for multi degree-of-freedom
//! joints (floating/planar), whose waypoints are full transforms.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::time::Duration;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single waypoint of a [`JointTrajectory`].
///
/// The value arrays are parallel to the trajectory's `joint_names`. Velocity, acceleration and
/// effort arrays may be empty if the planner didn't provide them, but when present their length
/// must equal the number of joint names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JointTrajectoryPoint {
    /// Demanded position of each joint, in radians or metres.
    pub positions: Vec<f64>,

    /// Demanded velocity of each joint, in radians/s or metres/s.
    pub velocities: Vec<f64>,

    /// Demanded acceleration of each joint.
    pub accelerations: Vec<f64>,

    /// Demanded effort of each joint.
    pub effort: Vec<f64>,

    /// Time at which this waypoint should be reached, relative to the start of execution.
    pub time_from_start: Duration,
}

/// A trajectory over a set of single degree-of-freedom joints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JointTrajectory {
    /// Names of the joints actuated by this trajectory.
    pub joint_names: Vec<String>,

    /// The waypoints of the trajectory, in ascending `time_from_start` order.
    pub points: Vec<JointTrajectoryPoint>,
}

/// A single waypoint of a [`MultiDofJointTrajectory`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MultiDofJointTrajectoryPoint {
    /// Demanded transform of each joint, parallel to the trajectory's `joint_names`.
    pub transforms: Vec<Isometry3<f64>>,

    /// Time at which this waypoint should be reached, relative to the start of execution.
    pub time_from_start: Duration,
}

/// A trajectory over a set of multi degree-of-freedom joints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MultiDofJointTrajectory {
    /// Names of the joints actuated by this trajectory.
    pub joint_names: Vec<String>,

    /// The waypoints of the trajectory, in ascending `time_from_start` order.
    pub points: Vec<MultiDofJointTrajectoryPoint>,
}

/// A complete robot trajectory, combining the single-DOF and multi-DOF sub-trajectories.
///
/// Either sub-trajectory may be empty. The two are executed over the same time base.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RobotTrajectory {
    /// Trajectory over the single degree-of-freedom joints.
    pub joint_trajectory: JointTrajectory,

    /// Trajectory over the multi degree-of-freedom joints.
    pub multi_dof_joint_trajectory: MultiDofJointTrajectory,
}

/// A snapshot of the robot's joint state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JointState {
    /// Names of the joints in this snapshot.
    pub names: Vec<String>,

    /// Position of each joint, parallel to `names`.
    pub positions: Vec<f64>,

    /// Velocity of each joint, parallel to `names`. May be empty if velocities are unknown.
    pub velocities: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotTrajectory {
    /// Returns the set of all joints actuated by this trajectory, over both sub-trajectories.
    pub fn actuated_joints(&self) -> HashSet<String> {
        self.joint_trajectory
            .joint_names
            .iter()
            .chain(self.multi_dof_joint_trajectory.joint_names.iter())
            .cloned()
            .collect()
    }

    /// Returns true if the trajectory actuates no joints at all.
    pub fn is_empty(&self) -> bool {
        self.joint_trajectory.joint_names.is_empty()
            && self.multi_dof_joint_trajectory.joint_names.is_empty()
    }

    /// Get the expected duration of the trajectory.
    ///
    /// This is the `time_from_start` of the last waypoint over both sub-trajectories, or zero if
    /// there are no waypoints.
    pub fn expected_duration(&self) -> Duration {
        let single = self
            .joint_trajectory
            .points
            .last()
            .map(|p| p.time_from_start)
            .unwrap_or_default();
        let multi = self
            .multi_dof_joint_trajectory
            .points
            .last()
            .map(|p| p.time_from_start)
            .unwrap_or_default();

        single.max(multi)
    }
}

impl From<JointTrajectory> for RobotTrajectory {
    fn from(joint_trajectory: JointTrajectory) -> Self {
        Self {
            joint_trajectory,
            multi_dof_joint_trajectory: MultiDofJointTrajectory::default(),
        }
    }
}

impl From<JointState> for RobotTrajectory {
    /// Convert a joint state into a single-waypoint trajectory at time zero.
    fn from(state: JointState) -> Self {
        Self {
            joint_trajectory: JointTrajectory {
                joint_names: state.names,
                points: vec![JointTrajectoryPoint {
                    positions: state.positions,
                    velocities: state.velocities,
                    accelerations: vec![],
                    effort: vec![],
                    time_from_start: Duration::from_secs(0),
                }],
            },
            multi_dof_joint_trajectory: MultiDofJointTrajectory::default(),
        }
    }
}

impl JointState {
    /// Get the position of the named joint, if it is present in the snapshot.
    pub fn position_of(&self, joint: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == joint)
            .and_then(|i| self.positions.get(i).copied())
    }

    /// Get the velocity of the named joint, if velocities are present in the snapshot.
    pub fn velocity_of(&self, joint: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == joint)
            .and_then(|i| self.velocities.get(i).copied())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
