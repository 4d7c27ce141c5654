//! Sequential executor worker thread.
//!
//! Runs the queued contexts in order. Each context goes through the same sequence: make the
//! controllers active, validate the start state, dispatch all parts, then wait for the
//! handles under the context's deadline. The wait loop is the duration monitor: it wakes on
//! the completion condition variable (stop requests), on a small poll interval (handle
//! progress), or at the deadline, whichever comes first.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use traj_if::ctrl::{ControllerHandle, ExecutionStatus};

use crate::validate::validate_start_state;

use super::{ExecutionCompleteCallback, PartCompleteCallback, Shared};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval at which the wait loop polls handle statuses between condition variable wakes.
const EXECUTION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for cancelled handles to acknowledge before reporting regardless.
const CANCEL_ACK_TIMEOUT: Duration = Duration::from_millis(200);

/// How long to wait for the robot to come to rest after a successful execution.
const ROBOT_STOP_WAIT: Duration = Duration::from_secs(1);

/// Joint velocity magnitude below which a joint counts as at rest, in rad/s.
const ROBOT_STOP_VEL_THRESHOLD: f64 = 1e-2;

/// Number of consecutive at-rest samples required before the robot counts as stopped.
const ROBOT_STOP_STABLE_SAMPLES: usize = 3;

/// Sampling interval of the robot-stop waiter.
const ROBOT_STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Body of the sequential executor thread, one invocation per `execute` batch.
pub(super) fn execute_thread(
    shared: Arc<Shared>,
    callback: Option<ExecutionCompleteCallback>,
    mut part_callback: Option<PartCompleteCallback>,
    auto_clear: bool,
) {
    let num_contexts = shared.exec.lock().unwrap().contexts.len();
    let mut overall = ExecutionStatus::Succeeded;

    for index in 0..num_contexts {
        // A stop between contexts preempts the rest of the batch
        {
            let mut exec = shared.exec.lock().unwrap();
            if exec.execution_complete {
                overall = ExecutionStatus::Preempted;
                break;
            }
            exec.current_context = Some(index);
        }

        shared.time_index.lock().unwrap().times.push(Instant::now());

        let status = execute_part(&shared, index);
        shared.time_index.lock().unwrap().last_status = status;

        if status == ExecutionStatus::Succeeded {
            debug!("Part {} completed successfully", index);
            if let Some(cb) = part_callback.as_mut() {
                cb(index);
            }
        } else {
            overall = status;
            break;
        }
    }

    if overall == ExecutionStatus::Succeeded && num_contexts > 0 {
        let wait_completion = shared.params.lock().unwrap().wait_for_trajectory_completion;
        if wait_completion {
            // Best effort: a robot still settling does not fail the execution
            wait_for_robot_to_stop(&shared, ROBOT_STOP_WAIT);
        }
    }

    info!("Trajectory execution finished: {}", overall);

    {
        let mut exec = shared.exec.lock().unwrap();
        exec.execution_complete = true;
        exec.current_context = None;
        exec.active_handles.clear();
        if auto_clear {
            exec.contexts.clear();
        }
    }
    shared.time_index.lock().unwrap().last_status = overall;
    shared.exec_complete_cv.notify_all();

    if let Some(cb) = callback {
        cb(overall);
    }
}

/// Execute the context at `index`: activate controllers, validate, dispatch, and monitor.
fn execute_part(shared: &Arc<Shared>, index: usize) -> ExecutionStatus {
    let (controllers, parts) = {
        let exec = shared.exec.lock().unwrap();
        let context = &exec.contexts[index];
        (context.controllers.clone(), context.parts.clone())
    };
    let params = shared.params.lock().unwrap().clone();

    if let Err(e) = shared
        .registry
        .ensure_active(&controllers, params.manage_controllers)
    {
        error!("Cannot execute part {}: {}", index, e);
        return ExecutionStatus::Aborted;
    }

    if let Err(e) = validate_start_state(
        &parts,
        shared.robot.as_ref(),
        shared.monitor.as_ref(),
        params.allowed_start_tolerance_rad,
    ) {
        error!("Cannot execute part {}: {}", index, e);
        return ExecutionStatus::Aborted;
    }

    // Acquire and dispatch the handles under the execution lock, so a concurrent stop
    // request either sees no handles yet or all of them
    let handles: Vec<Arc<dyn ControllerHandle>> = {
        let mut exec = shared.exec.lock().unwrap();
        if exec.execution_complete {
            return ExecutionStatus::Preempted;
        }

        let mut handles: Vec<Arc<dyn ControllerHandle>> = Vec::with_capacity(controllers.len());
        for name in &controllers {
            match shared.ctrl_mgr.handle(name) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to obtain a handle for controller {}: {}", name, e);
                    return ExecutionStatus::Aborted;
                }
            }
        }
        exec.active_handles = handles.clone();

        for (i, (handle, part)) in handles.iter().zip(parts.iter()).enumerate() {
            if let Err(e) = handle.send_trajectory(part) {
                error!(
                    "Failed to send trajectory part to controller {}: {}",
                    handle.controller_name(),
                    e
                );
                for started in &handles[..i] {
                    started.cancel();
                }
                exec.active_handles.clear();
                return ExecutionStatus::Aborted;
            }
        }

        handles
    };

    // Deadline: the slowest part's scaled expected duration plus its controller's margin
    let start = Instant::now();
    let deadline = if params.execution_duration_monitoring {
        let mut longest = Duration::from_secs(0);
        for (name, part) in controllers.iter().zip(parts.iter()) {
            let allowed = part
                .expected_duration()
                .mul_f64(params.scaling_for(name).max(0.0))
                + params.margin_for(name);
            longest = longest.max(allowed);
        }
        debug!("Part {} allowed execution duration: {:?}", index, longest);
        Some(start + longest)
    } else {
        None
    };

    // Monitoring loop
    let mut exec = shared.exec.lock().unwrap();
    loop {
        if exec.execution_complete {
            // Stop requested: the handles were already cancelled by the stopper, wait
            // briefly for them to acknowledge
            drop(exec);
            for handle in &handles {
                handle.wait_for_execution(Some(CANCEL_ACK_TIMEOUT));
            }
            shared.exec.lock().unwrap().active_handles.clear();
            return ExecutionStatus::Preempted;
        }

        let statuses: Vec<ExecutionStatus> =
            handles.iter().map(|h| h.last_execution_status()).collect();

        if statuses.iter().all(|s| s.is_terminal()) {
            exec.active_handles.clear();
            return aggregate_status(&statuses);
        }

        let now = Instant::now();
        if let Some(deadline) = deadline {
            if now >= deadline {
                warn!(
                    "Part {} overran its allowed execution duration, cancelling",
                    index
                );
                for (handle, status) in handles.iter().zip(statuses.iter()) {
                    if !status.is_terminal() {
                        handle.cancel();
                    }
                }
                drop(exec);
                for handle in &handles {
                    handle.wait_for_execution(Some(CANCEL_ACK_TIMEOUT));
                }
                shared.exec.lock().unwrap().active_handles.clear();
                return ExecutionStatus::TimedOut;
            }
        }

        // Sleep until the next poll, the deadline, or a stop signal
        let mut wait = EXECUTION_POLL_INTERVAL;
        if let Some(deadline) = deadline {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        wait = wait.max(Duration::from_millis(1));

        let (guard, _) = shared.exec_complete_cv.wait_timeout(exec, wait).unwrap();
        exec = guard;
    }
}

/// Aggregate per-handle terminal statuses: success only if every handle succeeded, otherwise
/// the first non-success status in handle order.
fn aggregate_status(statuses: &[ExecutionStatus]) -> ExecutionStatus {
    statuses
        .iter()
        .find(|s| **s != ExecutionStatus::Succeeded)
        .copied()
        .unwrap_or(ExecutionStatus::Succeeded)
}

/// Poll the live state until all joint velocities stay below threshold for a few consecutive
/// samples, or the wait time runs out. Returns true if the robot came to rest.
fn wait_for_robot_to_stop(shared: &Arc<Shared>, wait_time: Duration) -> bool {
    let deadline = Instant::now() + wait_time;
    let mut stable_samples = 0;

    while Instant::now() < deadline {
        match shared.monitor.current_state() {
            Some(state) if !state.velocities.is_empty() => {
                let at_rest = state
                    .velocities
                    .iter()
                    .all(|v| v.abs() < ROBOT_STOP_VEL_THRESHOLD);

                if at_rest {
                    stable_samples += 1;
                    if stable_samples >= ROBOT_STOP_STABLE_SAMPLES {
                        debug!("Robot came to rest");
                        return true;
                    }
                } else {
                    stable_samples = 0;
                }
            }
            _ => {
                debug!("No velocity data available, not waiting for the robot to rest");
                return true;
            }
        }

        thread::sleep(ROBOT_STOP_POLL_INTERVAL);
    }

    warn!("Timed out waiting for the robot to come to rest");
    false
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
