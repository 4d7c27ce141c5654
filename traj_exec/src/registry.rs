//! # Controller Registry
//!
//! Tracks the controllers known to the controller manager: which joints each one actuates,
//! which other controllers it overlaps with, and whether it is currently active. The registry
//! is the only component that talks to the controller manager about controller *state*; the
//! executors only ever ask it to make a set of controllers active.
//!
//! Controller information ages out: any operation that depends on activity state first
//! refreshes entries older than [`CONTROLLER_INFO_MAX_AGE`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use traj_if::ctrl::{ControllerManager, ControllerState, CtrlError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum age of a controller's cached state before it is re-queried from the controller
/// manager.
pub const CONTROLLER_INFO_MAX_AGE: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Information about one known controller.
#[derive(Debug, Clone)]
pub struct ControllerInfo {
    /// Name of the controller.
    pub name: String,

    /// The joints this controller actuates.
    pub joints: HashSet<String>,

    /// Names of other controllers whose joint sets intersect this one's. Always symmetric:
    /// if A overlaps B then B overlaps A.
    pub overlapping_controllers: HashSet<String>,

    /// Activity flags as last reported by the controller manager.
    pub state: ControllerState,

    /// When `state` was last refreshed.
    pub last_update: Instant,
}

/// The registry of known controllers.
pub struct ControllerRegistry {
    ctrl_mgr: Arc<dyn ControllerManager>,

    known: Mutex<HashMap<String, ControllerInfo>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Controller {0} is not known to the controller manager")]
    UnknownController(String),

    #[error("Controllers {0:?} are not active and controller management is disabled")]
    ControllersNotActive(Vec<String>),

    #[error("Controller switch failed: {0}")]
    SwitchFailed(#[from] CtrlError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControllerRegistry {
    /// Create a new registry. No controller information is loaded until the first operation
    /// that needs it.
    pub fn new(ctrl_mgr: Arc<dyn ControllerManager>) -> Self {
        Self {
            ctrl_mgr,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Reload all controller information from the controller manager.
    ///
    /// Rebuilds the overlap sets by pairwise joint set intersection.
    pub fn reload(&self) {
        let names = self.ctrl_mgr.controllers_list();
        let now = Instant::now();

        let mut known: HashMap<String, ControllerInfo> = names
            .into_iter()
            .map(|name| {
                let joints = self.ctrl_mgr.controller_joints(&name);
                let state = self.ctrl_mgr.controller_state(&name);
                (
                    name.clone(),
                    ControllerInfo {
                        name,
                        joints,
                        overlapping_controllers: HashSet::new(),
                        state,
                        last_update: now,
                    },
                )
            })
            .collect();

        // Rebuild the overlap sets. O(n^2) over controllers, which is small in practice.
        let names: Vec<String> = known.keys().cloned().collect();
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let overlap = !known[&names[i]]
                    .joints
                    .is_disjoint(&known[&names[j]].joints);
                if overlap {
                    known
                        .get_mut(&names[i])
                        .unwrap()
                        .overlapping_controllers
                        .insert(names[j].clone());
                    known
                        .get_mut(&names[j])
                        .unwrap()
                        .overlapping_controllers
                        .insert(names[i].clone());
                }
            }
        }

        debug!("Controller registry reloaded, {} controllers known", known.len());

        *self.known.lock().unwrap() = known;
    }

    /// Refresh the state of all controllers whose information is older than `age`.
    ///
    /// If no controllers are known at all this reloads the full registry.
    pub fn refresh_if_older_than(&self, age: Duration) {
        let no_controllers_known = self.known.lock().unwrap().is_empty();
        if no_controllers_known {
            self.reload();
            return;
        }

        let stale: Vec<String> = {
            let known = self.known.lock().unwrap();
            known
                .values()
                .filter(|info| info.last_update.elapsed() > age)
                .map(|info| info.name.clone())
                .collect()
        };

        for name in stale {
            self.refresh_one(&name, age);
        }
    }

    /// Refresh the state of one controller if its information is older than `age`.
    pub fn refresh_one(&self, name: &str, age: Duration) {
        let needs_refresh = {
            let known = self.known.lock().unwrap();
            match known.get(name) {
                Some(info) => info.last_update.elapsed() > age,
                None => false,
            }
        };

        if needs_refresh {
            // Query outside the lock, the controller manager may be slow
            let state = self.ctrl_mgr.controller_state(name);
            let mut known = self.known.lock().unwrap();
            if let Some(info) = known.get_mut(name) {
                info.state = state;
                info.last_update = Instant::now();
            }
        }
    }

    /// Returns true if the named controller is known and currently active.
    pub fn is_active(&self, name: &str) -> bool {
        self.refresh_one(name, CONTROLLER_INFO_MAX_AGE);
        self.known
            .lock()
            .unwrap()
            .get(name)
            .map(|info| info.state.active)
            .unwrap_or(false)
    }

    /// Returns true if all the named controllers are known and currently active.
    pub fn are_active(&self, names: &[String]) -> bool {
        self.refresh_if_older_than(CONTROLLER_INFO_MAX_AGE);
        let known = self.known.lock().unwrap();
        names
            .iter()
            .all(|name| known.get(name).map(|i| i.state.active).unwrap_or(false))
    }

    /// Make sure the given controllers are active.
    ///
    /// If controller management is disabled (`manage` is false) this only verifies that all
    /// requested controllers are already active, and fails otherwise.
    ///
    /// With management enabled, any currently active controller which overlaps a requested one
    /// but is not itself requested must be deactivated, and any requested controller that is
    /// not active must be activated. Both sets are passed to the controller manager in a
    /// single atomic switch request. On failure no retry is attempted; the registry is
    /// reconciled on the next reload.
    pub fn ensure_active(&self, names: &[String], manage: bool) -> Result<(), RegistryError> {
        self.refresh_if_older_than(CONTROLLER_INFO_MAX_AGE);

        let (to_activate, to_deactivate) = {
            let known = self.known.lock().unwrap();

            for name in names {
                if !known.contains_key(name) {
                    return Err(RegistryError::UnknownController(name.clone()));
                }
            }

            let inactive: Vec<String> = names
                .iter()
                .filter(|name| !known[*name].state.active)
                .cloned()
                .collect();

            if inactive.is_empty() {
                return Ok(());
            }

            if !manage {
                return Err(RegistryError::ControllersNotActive(inactive));
            }

            // Active controllers overlapping a requested one, but not themselves requested,
            // conflict with the request and must go down in the same switch.
            let mut conflicting: HashSet<String> = HashSet::new();
            for name in names {
                for other in &known[name].overlapping_controllers {
                    if known[other].state.active && !names.contains(other) {
                        conflicting.insert(other.clone());
                    }
                }
            }

            let mut to_deactivate: Vec<String> = conflicting.into_iter().collect();
            to_deactivate.sort();

            (inactive, to_deactivate)
        };

        info!(
            "Switching controllers: activating {:?}, deactivating {:?}",
            to_activate, to_deactivate
        );

        match self
            .ctrl_mgr
            .switch_controllers(&to_activate, &to_deactivate)
        {
            Ok(()) => {
                let mut known = self.known.lock().unwrap();
                for name in &to_activate {
                    if let Some(info) = known.get_mut(name) {
                        info.state.active = true;
                        info.last_update = Instant::now();
                    }
                }
                for name in &to_deactivate {
                    if let Some(info) = known.get_mut(name) {
                        info.state.active = false;
                        info.last_update = Instant::now();
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!("Controller switch failed: {}", e);
                Err(RegistryError::SwitchFailed(e))
            }
        }
    }

    /// Get a snapshot of the named controllers (or all known controllers if `names` is empty),
    /// ordered by joint set size ascending then name ascending.
    ///
    /// This ordering makes controller selection deterministic across runs.
    pub fn ordered_infos(&self, names: &[String]) -> Result<Vec<ControllerInfo>, RegistryError> {
        self.refresh_if_older_than(CONTROLLER_INFO_MAX_AGE);

        let known = self.known.lock().unwrap();

        let mut infos: Vec<ControllerInfo> = if names.is_empty() {
            known.values().cloned().collect()
        } else {
            let mut infos = Vec::with_capacity(names.len());
            for name in names {
                match known.get(name) {
                    Some(info) => infos.push(info.clone()),
                    None => return Err(RegistryError::UnknownController(name.clone())),
                }
            }
            infos
        };

        infos.sort_by(|a, b| {
            a.joints
                .len()
                .cmp(&b.joints.len())
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(infos)
    }

    /// Get the joint sets for the named controllers, in the same order.
    pub fn joint_sets(&self, names: &[String]) -> Result<Vec<HashSet<String>>, RegistryError> {
        let known = self.known.lock().unwrap();
        names
            .iter()
            .map(|name| {
                known
                    .get(name)
                    .map(|info| info.joints.clone())
                    .ok_or_else(|| RegistryError::UnknownController(name.clone()))
            })
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimCtrlMgr;

    fn registry_with_arm_and_gripper() -> (Arc<SimCtrlMgr>, ControllerRegistry) {
        let mgr = Arc::new(SimCtrlMgr::new());
        mgr.add_controller("arm_ctrl", &["shoulder", "elbow"], false);
        mgr.add_controller("gripper_ctrl", &["grip"], true);
        mgr.add_controller("whole_body_ctrl", &["shoulder", "elbow", "grip"], false);

        let registry = ControllerRegistry::new(mgr.clone() as Arc<dyn ControllerManager>);
        registry.reload();
        (mgr, registry)
    }

    #[test]
    fn test_overlap_symmetry() {
        let (_mgr, registry) = registry_with_arm_and_gripper();
        let infos = registry.ordered_infos(&[]).unwrap();

        for info in &infos {
            for other in &info.overlapping_controllers {
                let other_info = infos.iter().find(|i| &i.name == other).unwrap();
                assert!(
                    other_info.overlapping_controllers.contains(&info.name),
                    "overlap between {} and {} is not symmetric",
                    info.name,
                    other
                );
            }
        }

        // whole_body overlaps both others, arm and gripper don't overlap each other
        let arm = infos.iter().find(|i| i.name == "arm_ctrl").unwrap();
        assert_eq!(
            arm.overlapping_controllers,
            ["whole_body_ctrl".to_string()].iter().cloned().collect()
        );
    }

    #[test]
    fn test_ordered_infos_deterministic() {
        let (_mgr, registry) = registry_with_arm_and_gripper();
        let infos = registry.ordered_infos(&[]).unwrap();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();

        // Size ascending, then name ascending
        assert_eq!(names, vec!["gripper_ctrl", "arm_ctrl", "whole_body_ctrl"]);
    }

    #[test]
    fn test_ensure_active_unmanaged_fails() {
        let (_mgr, registry) = registry_with_arm_and_gripper();

        let err = registry
            .ensure_active(&["arm_ctrl".into()], false)
            .unwrap_err();
        assert!(matches!(err, RegistryError::ControllersNotActive(_)));

        // Already active controllers pass without a switch
        registry
            .ensure_active(&["gripper_ctrl".into()], false)
            .unwrap();
    }

    #[test]
    fn test_ensure_active_deactivates_conflicting() {
        let (mgr, registry) = registry_with_arm_and_gripper();

        // Activate the whole body controller, then request the two smaller ones. The whole
        // body controller overlaps both and must be deactivated in the same switch.
        mgr.switch_controllers(&["whole_body_ctrl".into()], &["gripper_ctrl".into()])
            .unwrap();
        registry.reload();

        registry
            .ensure_active(&["arm_ctrl".into(), "gripper_ctrl".into()], true)
            .unwrap();

        let mut active = mgr.active_controllers();
        active.sort();
        assert_eq!(active, vec!["arm_ctrl", "gripper_ctrl"]);
    }

    #[test]
    fn test_ensure_active_unknown_controller() {
        let (_mgr, registry) = registry_with_arm_and_gripper();
        let err = registry
            .ensure_active(&["no_such_ctrl".into()], true)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownController(_)));
    }

    #[test]
    fn test_switch_failure_reported() {
        let (mgr, registry) = registry_with_arm_and_gripper();
        mgr.set_switch_fails(true);

        let err = registry
            .ensure_active(&["arm_ctrl".into()], true)
            .unwrap_err();
        assert!(matches!(err, RegistryError::SwitchFailed(_)));
    }
}
