//! # Simulated Collaborators
//!
//! In-process doubles for the execution manager's collaborators: a controller manager with
//! configurable controllers and handles, a static robot model, and a settable state monitor.
//! These are used for testing and development of the execution system without requiring real
//! controller hardware, and are wired together by the `exec_demo` binary.
//!
//! Simulated handles "execute" a part by running a wall-clock timer for the part's expected
//! duration. Tests can override the run duration per controller to simulate overruns, force
//! send or switch failures, and override the terminal status to simulate controller faults.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;
use traj_if::ctrl::{
    ControllerHandle, ControllerManager, ControllerState, CtrlError, ExecutionStatus,
};
use traj_if::monitor::StateMonitor;
use traj_if::robot::{JointBounds, JointType, RobotModel};
use traj_if::traj::{JointState, RobotTrajectory};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A simulated controller manager.
pub struct SimCtrlMgr {
    controllers: Mutex<HashMap<String, SimController>>,
    switch_fails: AtomicBool,
    handles_created: AtomicUsize,
}

/// Configuration of one simulated controller.
struct SimController {
    joints: HashSet<String>,
    state: ControllerState,

    /// If set, handles run for this duration instead of the part's expected duration.
    run_duration_override: Option<Duration>,

    /// Terminal status reported on natural completion.
    completion_status: ExecutionStatus,

    /// If true, sending a trajectory to this controller fails.
    send_fails: bool,
}

/// A simulated in-flight execution on one controller.
pub struct SimHandle {
    name: String,
    run_duration_override: Option<Duration>,
    completion_status: ExecutionStatus,
    send_fails: bool,

    state: Mutex<SimHandleState>,
    condvar: Condvar,
}

struct SimHandleState {
    status: ExecutionStatus,
    finish_at: Option<Instant>,
}

/// A static robot model.
pub struct SimRobotModel {
    joints: Vec<(String, JointType)>,
    groups: HashMap<String, Vec<String>>,
}

/// A state monitor whose state is set directly by the test or demo.
pub struct SimStateMonitor {
    state: Mutex<Option<(JointState, Instant)>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimCtrlMgr {
    pub fn new() -> Self {
        Self {
            controllers: Mutex::new(HashMap::new()),
            switch_fails: AtomicBool::new(false),
            handles_created: AtomicUsize::new(0),
        }
    }

    /// Add a controller actuating the given joints.
    pub fn add_controller(&self, name: &str, joints: &[&str], active: bool) {
        self.controllers.lock().unwrap().insert(
            name.to_string(),
            SimController {
                joints: joints.iter().map(|j| j.to_string()).collect(),
                state: ControllerState {
                    active,
                    default: false,
                },
                run_duration_override: None,
                completion_status: ExecutionStatus::Succeeded,
                send_fails: false,
            },
        );
    }

    /// Make handles of the named controller run for `duration` regardless of the part sent.
    pub fn set_run_duration(&self, name: &str, duration: Duration) {
        if let Some(c) = self.controllers.lock().unwrap().get_mut(name) {
            c.run_duration_override = Some(duration);
        }
    }

    /// Make handles of the named controller finish with the given status instead of
    /// `Succeeded`.
    pub fn set_completion_status(&self, name: &str, status: ExecutionStatus) {
        if let Some(c) = self.controllers.lock().unwrap().get_mut(name) {
            c.completion_status = status;
        }
    }

    /// Make sends to the named controller fail.
    pub fn set_send_fails(&self, name: &str, fails: bool) {
        if let Some(c) = self.controllers.lock().unwrap().get_mut(name) {
            c.send_fails = fails;
        }
    }

    /// Make all switch requests fail.
    pub fn set_switch_fails(&self, fails: bool) {
        self.switch_fails.store(fails, Ordering::SeqCst);
    }

    /// Total number of handles handed out so far. Useful for asserting whether and when
    /// parts were dispatched.
    pub fn handles_created(&self) -> usize {
        self.handles_created.load(Ordering::SeqCst)
    }

    /// Names of the currently active controllers.
    pub fn active_controllers(&self) -> Vec<String> {
        self.controllers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.state.active)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for SimCtrlMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerManager for SimCtrlMgr {
    fn controllers_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn controller_joints(&self, name: &str) -> HashSet<String> {
        self.controllers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.joints.clone())
            .unwrap_or_default()
    }

    fn controller_state(&self, name: &str) -> ControllerState {
        self.controllers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.state)
            .unwrap_or_default()
    }

    fn switch_controllers(
        &self,
        activate: &[String],
        deactivate: &[String],
    ) -> Result<(), CtrlError> {
        if self.switch_fails.load(Ordering::SeqCst) {
            return Err(CtrlError::SwitchFailed(
                "simulated switch failure".to_string(),
            ));
        }

        let mut controllers = self.controllers.lock().unwrap();

        for name in activate.iter().chain(deactivate.iter()) {
            if !controllers.contains_key(name) {
                return Err(CtrlError::UnknownController(name.clone()));
            }
        }

        for name in deactivate {
            controllers.get_mut(name).unwrap().state.active = false;
        }
        for name in activate {
            controllers.get_mut(name).unwrap().state.active = true;
        }

        debug!(
            "Sim switch: activated {:?}, deactivated {:?}",
            activate, deactivate
        );

        Ok(())
    }

    fn handle(&self, name: &str) -> Result<Arc<dyn ControllerHandle>, CtrlError> {
        let controllers = self.controllers.lock().unwrap();
        let controller = controllers
            .get(name)
            .ok_or_else(|| CtrlError::UnknownController(name.to_string()))?;

        self.handles_created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(SimHandle {
            name: name.to_string(),
            run_duration_override: controller.run_duration_override,
            completion_status: controller.completion_status,
            send_fails: controller.send_fails,
            state: Mutex::new(SimHandleState {
                status: ExecutionStatus::Unknown,
                finish_at: None,
            }),
            condvar: Condvar::new(),
        }))
    }
}

impl SimHandle {
    /// Advance the simulated execution: a running handle whose timer has expired moves to its
    /// terminal status.
    fn poll(&self) -> ExecutionStatus {
        let mut state = self.state.lock().unwrap();
        if state.status == ExecutionStatus::Running {
            if let Some(finish_at) = state.finish_at {
                if Instant::now() >= finish_at {
                    state.status = self.completion_status;
                    self.condvar.notify_all();
                }
            }
        }
        state.status
    }
}

impl ControllerHandle for SimHandle {
    fn controller_name(&self) -> &str {
        &self.name
    }

    fn send_trajectory(&self, part: &RobotTrajectory) -> Result<(), CtrlError> {
        if self.send_fails {
            return Err(CtrlError::SendFailed(format!(
                "simulated send failure on {}",
                self.name
            )));
        }

        let duration = self
            .run_duration_override
            .unwrap_or_else(|| part.expected_duration());

        let mut state = self.state.lock().unwrap();
        state.status = ExecutionStatus::Running;
        state.finish_at = Some(Instant::now() + duration);

        debug!("Sim handle {} running for {:?}", self.name, duration);

        Ok(())
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status == ExecutionStatus::Running {
            state.status = ExecutionStatus::Preempted;
            state.finish_at = None;
            self.condvar.notify_all();
        }
    }

    fn wait_for_execution(&self, timeout: Option<Duration>) -> ExecutionStatus {
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut state = self.state.lock().unwrap();
        loop {
            // Advance the simulated timer under the same lock the condvar waits with
            if state.status == ExecutionStatus::Running {
                if let Some(finish_at) = state.finish_at {
                    if Instant::now() >= finish_at {
                        state.status = self.completion_status;
                        self.condvar.notify_all();
                    }
                }
            }

            if state.status.is_terminal() {
                return state.status;
            }

            let now = Instant::now();
            let mut wait = state
                .finish_at
                .map(|f| f.saturating_duration_since(now))
                .unwrap_or(Duration::from_millis(10));

            if let Some(deadline) = deadline {
                if now >= deadline {
                    return state.status;
                }
                wait = wait.min(deadline - now);
            }

            wait = wait.max(Duration::from_millis(1));

            let (guard, _) = self.condvar.wait_timeout(state, wait).unwrap();
            state = guard;
        }
    }

    fn last_execution_status(&self) -> ExecutionStatus {
        self.poll()
    }
}

impl SimRobotModel {
    pub fn new() -> Self {
        Self {
            joints: Vec::new(),
            groups: HashMap::new(),
        }
    }

    pub fn add_joint(&mut self, name: &str, joint_type: JointType) {
        self.joints.push((name.to_string(), joint_type));
    }

    pub fn add_group(&mut self, name: &str, joints: &[&str]) {
        self.groups.insert(
            name.to_string(),
            joints.iter().map(|j| j.to_string()).collect(),
        );
    }
}

impl Default for SimRobotModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotModel for SimRobotModel {
    fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|(name, _)| name.clone()).collect()
    }

    fn joint_type(&self, name: &str) -> Option<JointType> {
        self.joints
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    fn group_joints(&self, group: &str) -> Option<Vec<String>> {
        self.groups.get(group).cloned()
    }

    fn joint_bounds(&self, _name: &str) -> Option<JointBounds> {
        None
    }
}

impl SimStateMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Set the state the monitor reports from now on.
    pub fn set_state(&self, state: JointState) {
        *self.state.lock().unwrap() = Some((state, Instant::now()));
    }
}

impl Default for SimStateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMonitor for SimStateMonitor {
    fn current_state(&self) -> Option<JointState> {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|(state, _)| state.clone())
    }

    fn have_recent_state(&self, age: Duration) -> bool {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, at)| at.elapsed() <= age)
            .unwrap_or(false)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
