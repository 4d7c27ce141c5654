//! # Trajectory Execution Manager
//!
//! This module implements the [`TrajExecMgr`] facade and the two executors behind it.
//!
//! Trajectories are `push`ed into a queue, each configured into a context of (selected
//! controllers, distributed parts). `execute` starts the sequential worker, which runs the
//! queued contexts in order, dispatching each context's parts in parallel to their
//! controllers and monitoring them against a per-context deadline. `push_and_execute`
//! bypasses the queue entirely and feeds the continuous worker, which services contexts in
//! FIFO order and may overlap a new context with the tail of the previous one on disjoint
//! controllers.
//!
//! A note on the documented asymmetry: calling [`TrajExecMgr::wait_for_execution`] while the
//! continuous executor is active *stops* the continuous executor. This is a contract, not an
//! accident; callers mixing both modes must expect it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod continuous;
mod events;
mod worker;

pub use events::EXECUTION_EVENT_TOPIC;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{info, warn};
use traj_if::ctrl::{ControllerHandle, ControllerManager, ExecutionStatus};
use traj_if::monitor::StateMonitor;
use traj_if::robot::RobotModel;
use traj_if::traj::RobotTrajectory;

use crate::distribute::{distribute_trajectory, ConfigureError};
use crate::params::TrajExecParams;
use crate::registry::{ControllerRegistry, RegistryError, CONTROLLER_INFO_MAX_AGE};
use crate::select::select_controllers;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Called once when the execution of all pushed trajectories completes, with the aggregate
/// status.
pub type ExecutionCompleteCallback = Box<dyn FnOnce(ExecutionStatus) + Send + 'static>;

/// Called with the index of each context that completes successfully.
pub type PartCompleteCallback = Box<dyn FnMut(usize) + Send + 'static>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One trajectory bound to the controllers that will execute it.
///
/// `controllers` and `parts` are parallel: `parts[i]` is the sub-trajectory restricted to the
/// joints driven by `controllers[i]`. Every actuated joint of the original request appears in
/// exactly one part.
#[derive(Debug, Clone)]
pub struct TrajectoryContext {
    /// The controllers that will execute the parts.
    pub controllers: Vec<String>,

    /// The trajectory split into one part per controller.
    pub parts: Vec<RobotTrajectory>,
}

/// The trajectory execution manager.
pub struct TrajExecMgr {
    shared: Arc<Shared>,

    continuous_thread: Option<JoinHandle<()>>,
}

/// State shared between the facade and the worker threads.
pub(crate) struct Shared {
    pub(crate) robot: Arc<dyn RobotModel>,
    pub(crate) monitor: Arc<dyn StateMonitor>,
    pub(crate) ctrl_mgr: Arc<dyn ControllerManager>,
    pub(crate) registry: ControllerRegistry,

    pub(crate) params: Mutex<TrajExecParams>,

    /// Sequential executor state. Never held across a handle wait.
    pub(crate) exec: Mutex<ExecState>,

    /// Signals completion of (or a stop request for) the sequential executor.
    pub(crate) exec_complete_cv: Condvar,

    /// Continuous executor state.
    pub(crate) continuous: Mutex<ContinuousState>,

    /// Wakes the continuous executor thread.
    pub(crate) continuous_cv: Condvar,

    /// Per-context start timestamps and the last recorded status.
    pub(crate) time_index: Mutex<TimeIndex>,

    /// Join handle of the sequential worker, present while one is running or unjoined.
    pub(crate) exec_thread: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct ExecState {
    /// Contexts queued by `push`, executed in push order.
    pub contexts: Vec<TrajectoryContext>,

    /// Index of the context currently executing, `None` when idle.
    pub current_context: Option<usize>,

    /// Handles of the parts currently in flight.
    pub active_handles: Vec<Arc<dyn ControllerHandle>>,

    /// True when the sequential executor is idle. Setting this while a worker runs requests
    /// cancellation.
    pub execution_complete: bool,
}

pub(crate) struct ContinuousState {
    /// Contexts awaiting continuous execution, serviced in FIFO order.
    pub queue: VecDeque<TrajectoryContext>,

    /// Request to cancel the in-flight continuous work and drain the queue.
    pub stop_requested: bool,

    /// Lowered once, at shutdown.
    pub run_thread: bool,
}

pub(crate) struct TimeIndex {
    /// Start timestamp of each context executed in the current batch.
    pub times: Vec<Instant>,

    /// Status of the last attempted execution.
    pub last_status: ExecutionStatus,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by facade operations.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Cannot modify the trajectory queue while an execution is in progress")]
    NotIdle,

    #[error("An execution is already in progress")]
    AlreadyExecuting,

    #[error("Joint group {0} is not known to the robot model")]
    UnknownGroup(String),

    #[error(transparent)]
    Configure(#[from] ConfigureError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajExecMgr {
    /// Create a new execution manager and start its continuous executor thread.
    pub fn new(
        robot: Arc<dyn RobotModel>,
        monitor: Arc<dyn StateMonitor>,
        ctrl_mgr: Arc<dyn ControllerManager>,
        params: TrajExecParams,
    ) -> Self {
        let shared = Arc::new(Shared {
            robot,
            monitor,
            registry: ControllerRegistry::new(ctrl_mgr.clone()),
            ctrl_mgr,
            params: Mutex::new(params),
            exec: Mutex::new(ExecState {
                contexts: Vec::new(),
                current_context: None,
                active_handles: Vec::new(),
                execution_complete: true,
            }),
            exec_complete_cv: Condvar::new(),
            continuous: Mutex::new(ContinuousState {
                queue: VecDeque::new(),
                stop_requested: false,
                run_thread: true,
            }),
            continuous_cv: Condvar::new(),
            time_index: Mutex::new(TimeIndex {
                times: Vec::new(),
                last_status: ExecutionStatus::Unknown,
            }),
            exec_thread: Mutex::new(None),
        });

        let shared_continuous = shared.clone();
        let continuous_thread = thread::Builder::new()
            .name("exec_mgr::continuous".into())
            .spawn(move || continuous::continuous_execution_thread(shared_continuous))
            .unwrap();

        Self {
            shared,
            continuous_thread: Some(continuous_thread),
        }
    }

    /// Start a thread mapping events from the given channel to executor operations.
    ///
    /// The thread exits when the sender half of the channel is dropped; it is not joined on
    /// drop of the manager. See [`EXECUTION_EVENT_TOPIC`] for the well-known channel name.
    pub fn listen_for_events(&self, events: Receiver<String>) {
        let shared = Arc::downgrade(&self.shared);
        thread::Builder::new()
            .name("exec_mgr::events".into())
            .spawn(move || events::event_thread(shared, events))
            .unwrap();
    }

    /// Execute a named event (e.g. "stop") as if it had arrived on the event channel.
    pub fn process_event(&self, event: &str) {
        events::process_event(&self.shared, event);
    }

    /// Returns true if this manager is allowed to activate and deactivate controllers.
    pub fn is_managing_controllers(&self) -> bool {
        self.shared.params.lock().unwrap().manage_controllers
    }

    /// Add a trajectory for future execution with [`TrajExecMgr::execute`].
    ///
    /// `controllers` restricts the controllers considered; an empty slice means all known
    /// controllers. Fails if the trajectory actuates no joints, if no controller combination
    /// covers it, or if an execution is currently in progress.
    pub fn push(
        &self,
        trajectory: impl Into<RobotTrajectory>,
        controllers: &[String],
    ) -> Result<(), ExecError> {
        let context = self.configure(trajectory.into(), controllers)?;

        let mut exec = self.shared.exec.lock().unwrap();
        if !exec.execution_complete {
            warn!("Cannot push a new trajectory while an execution is in progress");
            return Err(ExecError::NotIdle);
        }
        exec.contexts.push(context);
        Ok(())
    }

    /// Start executing the pushed trajectories. Non-blocking.
    ///
    /// `callback` receives the aggregate status once the whole batch finishes;
    /// `part_callback` receives the index of each context that completes successfully. If
    /// `auto_clear` is set the queue is cleared once execution finishes, however it ends.
    pub fn execute(
        &self,
        callback: Option<ExecutionCompleteCallback>,
        part_callback: Option<PartCompleteCallback>,
        auto_clear: bool,
    ) -> Result<(), ExecError> {
        let mut exec = self.shared.exec.lock().unwrap();
        if !exec.execution_complete {
            warn!("Cannot execute: an execution is already in progress");
            return Err(ExecError::AlreadyExecuting);
        }

        exec.execution_complete = false;
        exec.current_context = None;
        self.shared.time_index.lock().unwrap().times.clear();

        info!("Starting execution of {} trajectory context(s)", exec.contexts.len());

        let shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name("exec_mgr::worker".into())
            .spawn(move || worker::execute_thread(shared, callback, part_callback, auto_clear))
            .unwrap();

        // Replacing a previous, already-joined-or-finished worker handle is fine
        *self.shared.exec_thread.lock().unwrap() = Some(worker);

        Ok(())
    }

    /// Execute the pushed trajectories and block until they finish.
    pub fn execute_and_wait(&self, auto_clear: bool) -> Result<ExecutionStatus, ExecError> {
        self.execute(None, None, auto_clear)?;
        Ok(self.wait_for_execution())
    }

    /// Block until the sequential executor is idle and return the last execution status.
    ///
    /// If the continuous executor is active this *stops* it: continuous contexts in flight
    /// are cancelled and its queue is dropped.
    pub fn wait_for_execution(&self) -> ExecutionStatus {
        {
            let mut continuous = self.shared.continuous.lock().unwrap();
            if !continuous.queue.is_empty() {
                warn!("wait_for_execution stops the continuous executor");
            }
            continuous.stop_requested = true;
            self.shared.continuous_cv.notify_all();
        }

        {
            let mut exec = self.shared.exec.lock().unwrap();
            while !exec.execution_complete {
                exec = self.shared.exec_complete_cv.wait(exec).unwrap();
            }
        }

        // Join the worker so the executor really is idle, not just signalling completion
        let worker = self.shared.exec_thread.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }

        self.get_last_execution_status()
    }

    /// Add a trajectory for immediate execution by the continuous executor. Non-blocking.
    ///
    /// No completion callback is available in this mode; dispatch failures are recorded in
    /// the last execution status. Fails if a sequential execution is in progress.
    pub fn push_and_execute(
        &self,
        trajectory: impl Into<RobotTrajectory>,
        controllers: &[String],
    ) -> Result<(), ExecError> {
        {
            let exec = self.shared.exec.lock().unwrap();
            if !exec.execution_complete {
                warn!("Cannot push and execute while a queued execution is in progress");
                return Err(ExecError::NotIdle);
            }
        }

        let context = self.configure(trajectory.into(), controllers)?;

        let mut continuous = self.shared.continuous.lock().unwrap();
        continuous.queue.push_back(context);
        self.shared.continuous_cv.notify_all();
        Ok(())
    }

    /// Stop whatever executions are active, if any. Never fails; returns once the executors
    /// have acknowledged the stop.
    pub fn stop_execution(&self, auto_clear: bool) {
        self.shared.stop_execution(auto_clear);
    }

    /// Clear the queued trajectories. Only legal while the executor is idle.
    pub fn clear(&self) -> Result<(), ExecError> {
        let mut exec = self.shared.exec.lock().unwrap();
        if !exec.execution_complete {
            return Err(ExecError::NotIdle);
        }
        exec.contexts.clear();
        exec.current_context = None;
        Ok(())
    }

    /// Get a copy of the currently queued trajectory contexts.
    pub fn trajectories(&self) -> Vec<TrajectoryContext> {
        self.shared.exec.lock().unwrap().contexts.clone()
    }

    /// Return the status of the last attempted execution.
    pub fn get_last_execution_status(&self) -> ExecutionStatus {
        self.shared.time_index.lock().unwrap().last_status
    }

    /// Get the (context index, waypoint index) the robot is expected to be at, given the
    /// current time.
    ///
    /// Returns `None` when nothing is executing, or when execution was started through
    /// [`TrajExecMgr::push_and_execute`].
    pub fn get_current_expected_trajectory_index(&self) -> Option<(usize, usize)> {
        let exec = self.shared.exec.lock().unwrap();
        exec.current_context?;

        let time_index = self.shared.time_index.lock().unwrap();
        if time_index.times.is_empty() {
            return None;
        }

        // The context containing now is the last one already started
        let now = Instant::now();
        let context_index = match time_index.times.partition_point(|t| *t <= now) {
            0 => return None,
            n => n - 1,
        };

        let context = exec.contexts.get(context_index)?;
        let elapsed = now.saturating_duration_since(time_index.times[context_index]);

        // Binary search the waypoint timestamps of the part with the most waypoints
        let points = context
            .parts
            .iter()
            .map(|p| &p.joint_trajectory.points)
            .max_by_key(|points| points.len())?;

        let waypoint_index = points
            .partition_point(|p| p.time_from_start <= elapsed)
            .min(points.len().saturating_sub(1));

        Some((context_index, waypoint_index))
    }

    /// Make sure the named controller is active, activating it if management is enabled.
    pub fn ensure_active_controller(&self, controller: &str) -> Result<(), ExecError> {
        self.ensure_active_controllers(&[controller.to_string()])
    }

    /// Make sure the named controllers are active, activating them if management is enabled.
    pub fn ensure_active_controllers(&self, controllers: &[String]) -> Result<(), ExecError> {
        let manage = self.shared.params.lock().unwrap().manage_controllers;
        self.shared
            .registry
            .ensure_active(controllers, manage)
            .map_err(ExecError::from)
    }

    /// Make sure controllers covering the given joints are active.
    pub fn ensure_active_controllers_for_joints(
        &self,
        joints: &[String],
    ) -> Result<(), ExecError> {
        let actuated = joints.iter().cloned().collect();
        let infos = self.shared.registry.ordered_infos(&[]).map_err(ConfigureError::from)?;
        let selected = select_controllers(&infos, &actuated).ok_or_else(|| {
            let mut joints: Vec<String> = actuated.into_iter().collect();
            joints.sort();
            ConfigureError::NoCoverage(joints)
        })?;
        self.ensure_active_controllers(&selected)
    }

    /// Make sure controllers covering the named joint group are active.
    pub fn ensure_active_controllers_for_group(&self, group: &str) -> Result<(), ExecError> {
        let joints = self
            .shared
            .robot
            .group_joints(group)
            .ok_or_else(|| ExecError::UnknownGroup(group.to_string()))?;
        self.ensure_active_controllers_for_joints(&joints)
    }

    /// Check if the named controller is active.
    pub fn is_controller_active(&self, controller: &str) -> bool {
        self.shared.registry.is_active(controller)
    }

    /// Check if all the named controllers are active.
    pub fn are_controllers_active(&self, controllers: &[String]) -> bool {
        self.shared.registry.are_active(controllers)
    }

    /// Enable or disable cancellation of executions that overrun their allowed duration.
    pub fn enable_execution_duration_monitoring(&self, flag: bool) {
        self.shared.params.lock().unwrap().execution_duration_monitoring = flag;
    }

    /// Set the global scaling applied to expected durations.
    pub fn set_allowed_execution_duration_scaling(&self, scaling: f64) {
        self.shared.params.lock().unwrap().allowed_execution_duration_scaling = scaling;
    }

    /// Set the global margin added to scaled expected durations, in seconds.
    pub fn set_allowed_goal_duration_margin(&self, margin_s: f64) {
        self.shared.params.lock().unwrap().allowed_goal_duration_margin_s = margin_s;
    }

    /// Set the start state tolerance, in radians. Zero disables start state validation.
    pub fn set_allowed_start_tolerance(&self, tolerance_rad: f64) {
        self.shared.params.lock().unwrap().allowed_start_tolerance_rad = tolerance_rad;
    }

    /// Enable or disable waiting for the robot to come to rest after a successful execution.
    pub fn set_wait_for_trajectory_completion(&self, flag: bool) {
        self.shared.params.lock().unwrap().wait_for_trajectory_completion = flag;
    }

    /// Configure a context from a requested trajectory: select the controllers and split the
    /// trajectory across them.
    fn configure(
        &self,
        trajectory: RobotTrajectory,
        controllers: &[String],
    ) -> Result<TrajectoryContext, ExecError> {
        let actuated = trajectory.actuated_joints();
        if actuated.is_empty() {
            warn!("The trajectory to execute specifies no joints");
            return Err(ConfigureError::EmptyTrajectory.into());
        }

        self.shared.registry.refresh_if_older_than(CONTROLLER_INFO_MAX_AGE);

        let infos = self
            .shared
            .registry
            .ordered_infos(controllers)
            .map_err(ConfigureError::from)?;

        let selected = select_controllers(&infos, &actuated).ok_or_else(|| {
            let mut joints: Vec<String> = actuated.iter().cloned().collect();
            joints.sort();
            warn!("No combination of controllers covers joints {:?}", joints);
            ConfigureError::NoCoverage(joints)
        })?;

        let joint_sets = selected
            .iter()
            .map(|name| {
                infos
                    .iter()
                    .find(|info| &info.name == name)
                    .map(|info| info.joints.clone())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();

        let parts = distribute_trajectory(&trajectory, &selected, &joint_sets)?;

        Ok(TrajectoryContext {
            controllers: selected,
            parts,
        })
    }
}

impl Shared {
    /// Stop whichever executor is active.
    ///
    /// Cancels the active handles of the sequential executor, wakes its wait loop, and joins
    /// the worker so the caller returns only once the executor is idle. Also requests a stop
    /// of the continuous executor. Idempotent and safe from any thread except the worker
    /// itself.
    pub(crate) fn stop_execution(&self, auto_clear: bool) {
        {
            let mut continuous = self.continuous.lock().unwrap();
            continuous.stop_requested = true;
            self.continuous_cv.notify_all();
        }

        let was_running = {
            let mut exec = self.exec.lock().unwrap();
            if !exec.execution_complete {
                info!("Stopping execution");
                // Raising the flag transitions the worker to cancelling; it reports
                // PREEMPTED once the handles acknowledge
                exec.execution_complete = true;
                for handle in &exec.active_handles {
                    handle.cancel();
                }
                self.exec_complete_cv.notify_all();
                true
            } else {
                false
            }
        };

        let worker = self.exec_thread.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }

        if was_running && auto_clear {
            let mut exec = self.exec.lock().unwrap();
            exec.contexts.clear();
            exec.current_context = None;
        }
    }
}

impl Drop for TrajExecMgr {
    /// Stops any active execution and joins the worker threads.
    fn drop(&mut self) {
        self.shared.stop_execution(true);

        {
            let mut continuous = self.shared.continuous.lock().unwrap();
            continuous.run_thread = false;
            self.shared.continuous_cv.notify_all();
        }

        if let Some(continuous) = self.continuous_thread.take() {
            let _ = continuous.join();
        }
    }
}
