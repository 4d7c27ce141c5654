//! Event channel adapter.
//!
//! Maps textual events received from the outside onto executor operations. Currently only
//! "stop" is understood; anything else is logged and ignored so new events can be added
//! without breaking older senders.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};

use super::Shared;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Well-known name of the execution event channel.
pub const EXECUTION_EVENT_TOPIC: &str = "trajectory_execution_event";

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Body of the event adapter thread.
///
/// Holds only a weak reference to the manager state, so a dropped manager never waits on an
/// external event source: the thread exits on the first event after the drop, or when the
/// sender half of the channel is dropped.
pub(super) fn event_thread(shared: Weak<Shared>, events: Receiver<String>) {
    while let Ok(event) = events.recv() {
        match shared.upgrade() {
            Some(shared) => process_event(&shared, &event),
            None => break,
        }
    }
    debug!("Event channel closed, event thread exiting");
}

/// Execute a named event.
pub(super) fn process_event(shared: &Arc<Shared>, event: &str) {
    match event.trim() {
        "stop" => {
            info!("Stop requested through the execution event channel");
            shared.stop_execution(true);
        }
        other => warn!("Unknown execution event: {}", other),
    }
}
