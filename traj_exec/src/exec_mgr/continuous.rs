//! Continuous executor worker thread.
//!
//! Services the FIFO queue fed by `push_and_execute`. Contexts are dispatched fire-and-forget
//! in arrival order, but a new context does not wait for the whole of the previous one: only
//! controllers still busy with a previous part are waited on individually, so contexts on
//! disjoint controllers overlap freely.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use traj_if::ctrl::{ControllerHandle, ExecutionStatus};

use super::Shared;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval at which a wait on a busy controller re-checks the stop and shutdown flags.
const BUSY_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Body of the continuous executor thread. Runs for the lifetime of the manager.
pub(super) fn continuous_execution_thread(shared: Arc<Shared>) {
    // Handles dispatched by previous contexts, by controller name. Entries are pruned once
    // terminal, freeing their controller for the next context.
    let mut used_handles: HashMap<String, Arc<dyn ControllerHandle>> = HashMap::new();

    loop {
        // Wait until there is a context to run, a stop request, or shutdown
        let context = {
            let mut continuous = shared.continuous.lock().unwrap();
            loop {
                if !continuous.run_thread {
                    continuous.queue.clear();
                    for handle in used_handles.values() {
                        handle.cancel();
                    }
                    debug!("Continuous executor shutting down");
                    return;
                }

                if continuous.stop_requested {
                    continuous.stop_requested = false;
                    if !continuous.queue.is_empty() || !used_handles.is_empty() {
                        info!("Continuous execution stopped, dropping queued contexts");
                    }
                    continuous.queue.clear();
                    for handle in used_handles.values() {
                        handle.cancel();
                    }
                    used_handles.clear();
                    continue;
                }

                if let Some(context) = continuous.queue.pop_front() {
                    break context;
                }

                continuous = shared.continuous_cv.wait(continuous).unwrap();
            }
        };

        let params = shared.params.lock().unwrap().clone();

        if let Err(e) = shared
            .registry
            .ensure_active(&context.controllers, params.manage_controllers)
        {
            error!("Cannot execute continuous context: {}", e);
            shared.time_index.lock().unwrap().last_status = ExecutionStatus::Aborted;
            continue;
        }

        // Prune handles that have reached a terminal status: their controllers are free
        used_handles.retain(|_, handle| !handle.last_execution_status().is_terminal());

        let mut dispatched: Vec<(String, Arc<dyn ControllerHandle>)> = Vec::new();
        let mut failed = false;
        let mut interrupted = false;

        for (name, part) in context.controllers.iter().zip(context.parts.iter()) {
            // Only a controller still executing a previous part blocks the new context
            if let Some(busy) = used_handles.get(name) {
                debug!("Controller {} still busy, waiting before redispatch", name);
                if !wait_for_handle_interruptible(&shared, busy) {
                    interrupted = true;
                    break;
                }
            }

            let handle = match shared.ctrl_mgr.handle(name) {
                Ok(handle) => handle,
                Err(e) => {
                    error!("Failed to obtain a handle for controller {}: {}", name, e);
                    failed = true;
                    break;
                }
            };

            if let Err(e) = handle.send_trajectory(part) {
                error!("Failed to send part to controller {}: {}", name, e);
                failed = true;
                break;
            }

            dispatched.push((name.clone(), handle));
        }

        if failed || interrupted {
            for (_, handle) in &dispatched {
                handle.cancel();
            }
            if failed {
                shared.time_index.lock().unwrap().last_status = ExecutionStatus::Aborted;
            }
            // An interrupt leaves the stop flag for the outer loop to service
        } else {
            for (name, handle) in dispatched {
                used_handles.insert(name, handle);
            }
        }
    }
}

/// Wait for a busy handle to reach a terminal status, staying responsive to stop and
/// shutdown requests. Returns false if interrupted before the handle finished.
fn wait_for_handle_interruptible(
    shared: &Arc<Shared>,
    handle: &Arc<dyn ControllerHandle>,
) -> bool {
    loop {
        {
            let continuous = shared.continuous.lock().unwrap();
            if !continuous.run_thread || continuous.stop_requested {
                return false;
            }
        }

        if handle
            .wait_for_execution(Some(BUSY_WAIT_POLL_INTERVAL))
            .is_terminal()
        {
            return true;
        }
    }
}
