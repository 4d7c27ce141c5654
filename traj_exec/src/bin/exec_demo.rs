//! # Execution Demo
//!
//! This binary runs the trajectory execution manager against the simulated collaborators,
//! without requiring real controller hardware. It is designed to allow quick development of
//! the execution system itself: it wires up a small arm, pushes a trajectory over all of its
//! joints, and executes it, logging the selected controllers and the final status.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::WrapErr, Result};
use log::info;
use structopt::StructOpt;

use traj_exec::exec_mgr::TrajExecMgr;
use traj_exec::params::TrajExecParams;
use traj_exec::sim::{SimCtrlMgr, SimRobotModel, SimStateMonitor};
use traj_if::robot::JointType;
use traj_if::traj::{JointState, JointTrajectory, JointTrajectoryPoint, RobotTrajectory};
use util::logger::{logger_init, LevelFilter};

// ------------------------------------------------------------------------------------------------
// CLI
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "exec_demo", about = "Trajectory execution manager demo")]
struct Opts {
    /// Path to the execution manager parameter file. Defaults are used if the file doesn't
    /// exist.
    #[structopt(long, default_value = "traj_exec.toml")]
    params: PathBuf,

    /// Duration of the demo trajectory in seconds.
    #[structopt(long, default_value = "1.0")]
    duration_s: f64,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    logger_init(LevelFilter::Debug, None).wrap_err("Failed to initialise logging")?;

    info!("Trajectory Execution Demo\n");

    // ---- LOAD PARAMETERS ----

    let params: TrajExecParams = util::params::load_or_default(&opts.params)
        .wrap_err("Could not load execution parameters")?;

    info!("Execution parameters loaded");

    // ---- BUILD THE SIMULATED ROBOT ----

    let arm_joints = ["shoulder_pan", "shoulder_lift", "elbow", "wrist"];

    let mut robot = SimRobotModel::new();
    for joint in &arm_joints {
        robot.add_joint(joint, JointType::Revolute);
    }
    robot.add_joint("gripper", JointType::Prismatic);
    robot.add_group("arm", &arm_joints);

    let monitor = Arc::new(SimStateMonitor::new());
    monitor.set_state(JointState {
        names: arm_joints
            .iter()
            .map(|j| j.to_string())
            .chain(std::iter::once("gripper".to_string()))
            .collect(),
        positions: vec![0.0; 5],
        velocities: vec![0.0; 5],
    });

    let ctrl_mgr = Arc::new(SimCtrlMgr::new());
    ctrl_mgr.add_controller("arm_ctrl", &arm_joints, false);
    ctrl_mgr.add_controller("gripper_ctrl", &["gripper"], false);

    // ---- MANAGER INIT ----

    let mgr = TrajExecMgr::new(
        Arc::new(robot),
        monitor.clone(),
        ctrl_mgr.clone(),
        params,
    );

    info!("Execution manager init complete");

    // ---- PUSH AND EXECUTE ----

    let trajectory = demo_trajectory(&arm_joints, opts.duration_s);
    mgr.push(trajectory, &[])
        .wrap_err("Failed to push the demo trajectory")?;

    for context in mgr.trajectories() {
        info!("Context uses controllers: {:?}", context.controllers);
    }

    let status = mgr
        .execute_and_wait(true)
        .wrap_err("Failed to start execution")?;

    info!("Execution finished with status {}", status);

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a small trajectory sweeping the arm and closing the gripper.
fn demo_trajectory(arm_joints: &[&str], duration_s: f64) -> RobotTrajectory {
    let names: Vec<String> = arm_joints
        .iter()
        .map(|j| j.to_string())
        .chain(std::iter::once("gripper".to_string()))
        .collect();
    let num_joints = names.len();

    let waypoint = |fraction: f64| JointTrajectoryPoint {
        positions: (0..num_joints).map(|i| 0.2 * fraction * (i as f64 + 1.0)).collect(),
        velocities: vec![0.0; num_joints],
        accelerations: vec![],
        effort: vec![],
        time_from_start: Duration::from_secs_f64(duration_s * fraction),
    };

    RobotTrajectory::from(JointTrajectory {
        joint_names: names,
        points: vec![waypoint(0.0), waypoint(0.5), waypoint(1.0)],
    })
}
