//! # Controller Manager Interface
//!
//! Defines the interface to the controller manager collaborator: the component that knows which
//! hardware controllers exist, which joints each one actuates, and that can activate controllers
//! and hand out execution handles for them.
//!
//! Implementations are injected into the execution manager as `Arc<dyn ControllerManager>`, so
//! tests and demos can supply simulated managers.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::traj::RobotTrajectory;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Activity flags of a controller as reported by the controller manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    /// True if the controller is currently active and will execute sent trajectories.
    pub active: bool,

    /// True if this controller is the default one for the joints it actuates.
    pub default: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Terminal and in-flight status of a trajectory execution.
///
/// `Running` is only ever returned by handle status probes; the aggregate status reported by the
/// execution manager is always one of the other variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// No execution has been attempted, or the status cannot be determined.
    Unknown,

    /// The execution is still in progress.
    Running,

    /// The execution completed successfully.
    Succeeded,

    /// The execution was cancelled by request.
    Preempted,

    /// The execution overran its allowed duration and was cancelled.
    TimedOut,

    /// The execution was aborted before or during dispatch.
    Aborted,

    /// The controller reported a failure during execution.
    Failed,
}

/// Errors raised by controller manager implementations.
#[derive(Debug, thiserror::Error)]
pub enum CtrlError {
    #[error("Unknown controller: {0}")]
    UnknownController(String),

    #[error("Could not switch controllers: {0}")]
    SwitchFailed(String),

    #[error("Could not send trajectory to controller: {0}")]
    SendFailed(String),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A handle on one in-flight trajectory part on one controller.
///
/// Handles are obtained from the [`ControllerManager`] just before dispatch and live for a single
/// part execution. All methods take `&self` and must be callable from any thread; in particular
/// [`ControllerHandle::cancel`] may race with a concurrent wait.
pub trait ControllerHandle: Send + Sync {
    /// Name of the controller this handle commands.
    fn controller_name(&self) -> &str;

    /// Send a trajectory part for execution. Returns an error if the controller rejects it.
    fn send_trajectory(&self, part: &RobotTrajectory) -> Result<(), CtrlError>;

    /// Request cancellation of the in-flight execution. Best effort and non-blocking.
    fn cancel(&self);

    /// Block until the execution reaches a terminal status, or until the timeout expires.
    ///
    /// A timeout of `None` waits indefinitely. If the timeout expires first the current
    /// (possibly still `Running`) status is returned.
    fn wait_for_execution(&self, timeout: Option<Duration>) -> ExecutionStatus;

    /// Get the status of the last (or current) execution without blocking.
    fn last_execution_status(&self) -> ExecutionStatus;
}

/// The controller manager collaborator.
pub trait ControllerManager: Send + Sync {
    /// List the names of all known controllers.
    fn controllers_list(&self) -> Vec<String>;

    /// Get the set of joints actuated by the named controller.
    fn controller_joints(&self, name: &str) -> HashSet<String>;

    /// Get the activity state of the named controller.
    fn controller_state(&self, name: &str) -> ControllerState;

    /// Atomically activate and deactivate the given sets of controllers.
    fn switch_controllers(&self, activate: &[String], deactivate: &[String])
        -> Result<(), CtrlError>;

    /// Obtain a fresh execution handle for the named controller.
    fn handle(&self, name: &str) -> Result<Arc<dyn ControllerHandle>, CtrlError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ExecutionStatus {
    /// Returns true if this status is terminal, i.e. not `Running` or `Unknown`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running | ExecutionStatus::Unknown)
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        ExecutionStatus::Unknown
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Unknown => write!(f, "UNKNOWN"),
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Succeeded => write!(f, "SUCCEEDED"),
            ExecutionStatus::Preempted => write!(f, "PREEMPTED"),
            ExecutionStatus::TimedOut => write!(f, "TIMED_OUT"),
            ExecutionStatus::Aborted => write!(f, "ABORTED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
        }
    }
}
