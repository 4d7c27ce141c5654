//! # Execution Manager Parameters
//!
//! This module provides the parameters for the trajectory execution manager. Parameters are
//! loaded from a TOML file via [`util::params::load`], or built with [`Default`] and adjusted
//! through the facade's setters before execution starts.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters controlling trajectory execution.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TrajExecParams {
    /// If true the manager may activate and deactivate controllers as needed. If false,
    /// execution fails unless all required controllers are already active.
    pub manage_controllers: bool,

    /// If true executions that overrun their allowed duration are cancelled.
    pub execution_duration_monitoring: bool,

    /// Multiplicative factor applied to a part's expected duration to get its allowed
    /// execution duration.
    pub allowed_execution_duration_scaling: f64,

    /// Margin added on top of the scaled expected duration before a part is considered
    /// overrunning, in seconds.
    pub allowed_goal_duration_margin_s: f64,

    /// Per-controller overrides of `allowed_execution_duration_scaling`.
    pub controller_allowed_execution_duration_scaling: HashMap<String, f64>,

    /// Per-controller overrides of `allowed_goal_duration_margin_s`.
    pub controller_allowed_goal_duration_margin_s: HashMap<String, f64>,

    /// Maximum allowed deviation between a trajectory's first waypoint and the current robot
    /// state, in radians (or metres for prismatic joints). Zero disables start state
    /// validation.
    pub allowed_start_tolerance_rad: f64,

    /// If true, after a successful execution the manager waits for the robot to come to rest
    /// before reporting completion.
    pub wait_for_trajectory_completion: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TrajExecParams {
    fn default() -> Self {
        Self {
            manage_controllers: true,
            execution_duration_monitoring: true,
            allowed_execution_duration_scaling: 1.1,
            allowed_goal_duration_margin_s: 0.5,
            controller_allowed_execution_duration_scaling: HashMap::new(),
            controller_allowed_goal_duration_margin_s: HashMap::new(),
            allowed_start_tolerance_rad: 0.01,
            wait_for_trajectory_completion: true,
        }
    }
}

impl TrajExecParams {
    /// Get the duration scaling for the named controller, falling back to the global value.
    pub fn scaling_for(&self, controller: &str) -> f64 {
        self.controller_allowed_execution_duration_scaling
            .get(controller)
            .copied()
            .unwrap_or(self.allowed_execution_duration_scaling)
    }

    /// Get the goal duration margin for the named controller, falling back to the global value.
    pub fn margin_for(&self, controller: &str) -> Duration {
        Duration::from_secs_f64(
            self.controller_allowed_goal_duration_margin_s
                .get(controller)
                .copied()
                .unwrap_or(self.allowed_goal_duration_margin_s)
                .max(0.0),
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_override_fallback() {
        let mut params = TrajExecParams::default();
        params
            .controller_allowed_execution_duration_scaling
            .insert("arm_ctrl".into(), 2.0);
        params
            .controller_allowed_goal_duration_margin_s
            .insert("arm_ctrl".into(), 1.5);

        assert_eq!(params.scaling_for("arm_ctrl"), 2.0);
        assert_eq!(
            params.scaling_for("gripper_ctrl"),
            params.allowed_execution_duration_scaling
        );
        assert_eq!(params.margin_for("arm_ctrl"), Duration::from_secs_f64(1.5));
        assert_eq!(
            params.margin_for("gripper_ctrl"),
            Duration::from_secs_f64(params.allowed_goal_duration_margin_s)
        );
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            manage_controllers = false
            allowed_execution_duration_scaling = 1.2

            [controller_allowed_goal_duration_margin_s]
            arm_ctrl = 0.25
        "#;

        let params: TrajExecParams = toml::from_str(toml_str).unwrap();
        assert!(!params.manage_controllers);
        assert_eq!(params.allowed_execution_duration_scaling, 1.2);
        assert_eq!(params.margin_for("arm_ctrl"), Duration::from_secs_f64(0.25));
        // Unset fields fall back to defaults
        assert_eq!(params.allowed_start_tolerance_rad, 0.01);
    }
}
