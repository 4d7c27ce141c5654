//! # Trajectory interface crate.
//!
//! Provides the message types and collaborator interfaces shared between the trajectory
//! execution manager and the systems around it: the robot model, the live state monitor,
//! and the controller manager with its per-controller handles.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Controller manager and controller handle interfaces
pub mod ctrl;

/// Live joint state monitoring interface
pub mod monitor;

/// Robot model interface
pub mod robot;

/// Trajectory and joint state message types
pub mod traj;
