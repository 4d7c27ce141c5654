//! # Robot Model Interface
//!
//! Read-only description of the robot's kinematic structure: joint names, joint types, named
//! joint groups, and per-joint bounds.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The type of a robot joint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointType {
    /// Rotational joint with position limits.
    Revolute,

    /// Rotational joint without position limits, wrapping at 2 pi.
    Continuous,

    /// Linear joint.
    Prismatic,

    /// Joint with no degrees of freedom.
    Fixed,

    /// Free-floating multi degree-of-freedom joint.
    Floating,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position and velocity bounds of a joint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct JointBounds {
    /// Minimum position, in radians or metres.
    pub min_position: f64,

    /// Maximum position, in radians or metres.
    pub max_position: f64,

    /// Maximum absolute velocity.
    pub max_velocity: f64,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The robot model collaborator.
pub trait RobotModel: Send + Sync {
    /// Names of all joints in the model.
    fn joint_names(&self) -> Vec<String>;

    /// Type of the named joint, or `None` if the joint is unknown.
    fn joint_type(&self, name: &str) -> Option<JointType>;

    /// Names of the joints in the named group, or `None` if the group is unknown.
    fn group_joints(&self, group: &str) -> Option<Vec<String>>;

    /// Bounds of the named joint, or `None` if the joint is unknown or unbounded.
    fn joint_bounds(&self, name: &str) -> Option<JointBounds>;
}
