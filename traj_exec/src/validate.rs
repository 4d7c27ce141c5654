//! # Start State Validator
//!
//! Checks that the first waypoint of each part of a context matches the robot's current state
//! to within a configurable tolerance, so a trajectory planned from a stale state is rejected
//! before any controller moves.
//!
//! Revolute and continuous joints are compared by shortest angular distance, prismatic joints
//! by absolute difference, and fixed joints are skipped. Only the single-DOF sub-trajectories
//! are checked. A tolerance of zero disables validation entirely.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Write as _;

use log::{debug, warn};
use traj_if::monitor::StateMonitor;
use traj_if::robot::{JointType, RobotModel};
use traj_if::traj::RobotTrajectory;
use util::maths::shortest_ang_dist;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One joint whose start position deviates from the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct JointDeviation {
    /// Name of the offending joint.
    pub joint: String,

    /// Absolute deviation between the trajectory start and the current state.
    pub deviation: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by start state validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("No current robot state is available to validate against")]
    NoCurrentState,

    #[error("Trajectory start deviates from the current state: {}", format_deviations(.0))]
    StartStateDeviates(Vec<JointDeviation>),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Validate the first waypoint of each part against the current robot state.
///
/// `tolerance` is in radians (metres for prismatic joints); zero disables the check.
pub fn validate_start_state(
    parts: &[RobotTrajectory],
    robot: &dyn RobotModel,
    monitor: &dyn StateMonitor,
    tolerance: f64,
) -> Result<(), ValidateError> {
    if tolerance <= 0.0 {
        return Ok(());
    }

    let state = monitor.current_state().ok_or(ValidateError::NoCurrentState)?;

    let mut deviations: Vec<JointDeviation> = Vec::new();

    for part in parts {
        let trajectory = &part.joint_trajectory;
        let first = match trajectory.points.first() {
            Some(p) => p,
            None => continue,
        };

        for (i, joint) in trajectory.joint_names.iter().enumerate() {
            let demanded = match first.positions.get(i) {
                Some(p) => *p,
                None => continue,
            };

            let current = match state.position_of(joint) {
                Some(p) => p,
                None => {
                    warn!("Joint {} not present in the current robot state", joint);
                    continue;
                }
            };

            let deviation = match robot.joint_type(joint) {
                Some(JointType::Revolute) | Some(JointType::Continuous) => {
                    shortest_ang_dist(current, demanded).abs()
                }
                Some(JointType::Prismatic) => (demanded - current).abs(),
                Some(JointType::Fixed) | Some(JointType::Floating) => continue,
                None => {
                    warn!("Joint {} is not known to the robot model", joint);
                    continue;
                }
            };

            if deviation > tolerance {
                deviations.push(JointDeviation {
                    joint: joint.clone(),
                    deviation,
                });
            }
        }
    }

    if deviations.is_empty() {
        debug!("Start state validated within tolerance {}", tolerance);
        Ok(())
    } else {
        Err(ValidateError::StartStateDeviates(deviations))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn format_deviations(deviations: &[JointDeviation]) -> String {
    let mut out = String::new();
    for (i, d) in deviations.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{} off by {:.4}", d.joint, d.deviation);
    }
    out
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
