//! End-to-end tests of the trajectory execution manager against the simulated collaborators.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use traj_exec::exec_mgr::{ExecError, TrajExecMgr};
use traj_exec::params::TrajExecParams;
use traj_exec::sim::{SimCtrlMgr, SimRobotModel, SimStateMonitor};
use traj_if::ctrl::ExecutionStatus;
use traj_if::robot::JointType;
use traj_if::traj::{JointState, JointTrajectory, JointTrajectoryPoint, RobotTrajectory};

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

const JOINTS: [&str; 3] = ["j1", "j2", "j3"];

struct Rig {
    ctrl_mgr: Arc<SimCtrlMgr>,
    monitor: Arc<SimStateMonitor>,
    mgr: TrajExecMgr,
}

/// Build a manager over three revolute joints with the given controllers and parameters.
fn rig(controllers: &[(&str, &[&str], bool)], params: TrajExecParams) -> Rig {
    let mut robot = SimRobotModel::new();
    for joint in &JOINTS {
        robot.add_joint(joint, JointType::Revolute);
    }

    let monitor = Arc::new(SimStateMonitor::new());
    monitor.set_state(JointState {
        names: JOINTS.iter().map(|j| j.to_string()).collect(),
        positions: vec![0.0; JOINTS.len()],
        velocities: vec![0.0; JOINTS.len()],
    });

    let ctrl_mgr = Arc::new(SimCtrlMgr::new());
    for (name, joints, active) in controllers {
        ctrl_mgr.add_controller(name, joints, *active);
    }

    let mgr = TrajExecMgr::new(
        Arc::new(robot),
        monitor.clone(),
        ctrl_mgr.clone(),
        params,
    );

    Rig {
        ctrl_mgr,
        monitor,
        mgr,
    }
}

fn fast_params() -> TrajExecParams {
    TrajExecParams {
        wait_for_trajectory_completion: false,
        ..Default::default()
    }
}

/// A trajectory over the given joints starting at zero and reaching `duration`.
fn traj(joints: &[&str], duration: Duration) -> RobotTrajectory {
    let n = joints.len();
    RobotTrajectory::from(JointTrajectory {
        joint_names: joints.iter().map(|j| j.to_string()).collect(),
        points: vec![
            JointTrajectoryPoint {
                positions: vec![0.0; n],
                time_from_start: Duration::from_secs(0),
                ..Default::default()
            },
            JointTrajectoryPoint {
                positions: vec![0.5; n],
                time_from_start: duration,
                ..Default::default()
            },
        ],
    })
}

/// Start an execution whose completion statuses arrive on the returned channel.
fn execute_with_callback(mgr: &TrajExecMgr) -> mpsc::Receiver<ExecutionStatus> {
    let (tx, rx) = mpsc::channel();
    mgr.execute(
        Some(Box::new(move |status| {
            tx.send(status).unwrap();
        })),
        None,
        true,
    )
    .unwrap();
    rx
}

// ------------------------------------------------------------------------------------------------
// SCENARIOS
// ------------------------------------------------------------------------------------------------

/// S1: controllers A={j1,j2} and B={j3} jointly execute a three-joint trajectory.
#[test]
fn test_simple_cover_executes_successfully() {
    let rig = rig(
        &[("a_ctrl", &["j1", "j2"], false), ("b_ctrl", &["j3"], false)],
        fast_params(),
    );

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();

    let contexts = rig.mgr.trajectories();
    assert_eq!(contexts.len(), 1);
    let mut selected = contexts[0].controllers.clone();
    selected.sort();
    assert_eq!(selected, vec!["a_ctrl", "b_ctrl"]);

    let (status_tx, status_rx) = mpsc::channel();
    let (part_tx, part_rx) = mpsc::channel();
    rig.mgr
        .execute(
            Some(Box::new(move |status| status_tx.send(status).unwrap())),
            Some(Box::new(move |index| part_tx.send(index).unwrap())),
            true,
        )
        .unwrap();

    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, ExecutionStatus::Succeeded);

    // Completion callback fires exactly once, part callback reports context 0
    assert!(status_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(part_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 0);

    // Both controllers were activated and dispatched
    assert_eq!(rig.ctrl_mgr.handles_created(), 2);
    let mut active = rig.ctrl_mgr.active_controllers();
    active.sort();
    assert_eq!(active, vec!["a_ctrl", "b_ctrl"]);

    // auto_clear emptied the queue
    assert!(rig.mgr.trajectories().is_empty());
    assert_eq!(
        rig.mgr.get_last_execution_status(),
        ExecutionStatus::Succeeded
    );
}

/// S2: overlapping controllers A={j1,j2}, B={j2,j3}; j2 must be driven exactly once.
#[test]
fn test_overlap_resolution() {
    let rig = rig(
        &[
            ("a_ctrl", &["j1", "j2"], false),
            ("b_ctrl", &["j2", "j3"], false),
        ],
        fast_params(),
    );

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();

    let contexts = rig.mgr.trajectories();
    let context = &contexts[0];

    let a_index = context
        .controllers
        .iter()
        .position(|c| c == "a_ctrl")
        .unwrap();
    let b_index = context
        .controllers
        .iter()
        .position(|c| c == "b_ctrl")
        .unwrap();

    // Equal joint set sizes: j2 goes to a_ctrl by name
    assert_eq!(
        context.parts[a_index].joint_trajectory.joint_names,
        vec!["j1", "j2"]
    );
    assert_eq!(
        context.parts[b_index].joint_trajectory.joint_names,
        vec!["j3"]
    );
}

/// S3: a part overrunning its deadline is cancelled and reported as TIMED_OUT.
#[test]
fn test_deadline_overrun_times_out() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());

    // Expected 200 ms, scaling 1.0, margin 100 ms -> deadline 300 ms; the controller is
    // simulated to run for 10 s
    rig.mgr.set_allowed_execution_duration_scaling(1.0);
    rig.mgr.set_allowed_goal_duration_margin(0.1);
    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_secs(10));

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(200)), &[])
        .unwrap();

    let start = Instant::now();
    let status_rx = execute_with_callback(&rig.mgr);
    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(status, ExecutionStatus::TimedOut);
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "cancellation did not interrupt the overrunning handle"
    );
    assert_eq!(
        rig.mgr.get_last_execution_status(),
        ExecutionStatus::TimedOut
    );
}

/// S4: with controller management disabled and the controller inactive, execution aborts
/// without dispatching anything.
#[test]
fn test_unmanaged_inactive_controller_aborts() {
    let params = TrajExecParams {
        manage_controllers: false,
        ..fast_params()
    };
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], false)], params);

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();

    let status_rx = execute_with_callback(&rig.mgr);
    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(status, ExecutionStatus::Aborted);
    assert_eq!(rig.ctrl_mgr.handles_created(), 0);
}

/// S5: continuous contexts overlap on disjoint controllers, but a context reusing a busy
/// controller waits for the in-flight part.
#[test]
fn test_continuous_execution_overlap() {
    let rig = rig(
        &[("a_ctrl", &["j1"], true), ("b_ctrl", &["j2"], true)],
        fast_params(),
    );

    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_millis(600));
    rig.ctrl_mgr
        .set_run_duration("b_ctrl", Duration::from_millis(600));

    // First context occupies a_ctrl
    rig.mgr
        .push_and_execute(traj(&["j1"], Duration::from_millis(100)), &[])
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(rig.ctrl_mgr.handles_created(), 1);

    // Second context uses the disjoint b_ctrl: dispatches while a_ctrl still runs
    rig.mgr
        .push_and_execute(traj(&["j2"], Duration::from_millis(100)), &[])
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(
        rig.ctrl_mgr.handles_created(),
        2,
        "disjoint context did not overlap with the running one"
    );

    // Third context needs a_ctrl again: it must wait for the first part to finish
    rig.mgr
        .push_and_execute(traj(&["j1"], Duration::from_millis(100)), &[])
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        rig.ctrl_mgr.handles_created(),
        2,
        "context reusing a busy controller dispatched too early"
    );

    // After the first part finishes the third context goes out
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(rig.ctrl_mgr.handles_created(), 3);
}

/// S6: a "stop" event on the event channel preempts the running execution.
#[test]
fn test_event_channel_stop() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());
    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_secs(10));

    let (event_tx, event_rx) = mpsc::channel();
    rig.mgr.listen_for_events(event_rx);

    rig.mgr
        .push(traj(&JOINTS, Duration::from_secs(10)), &[])
        .unwrap();
    let status_rx = execute_with_callback(&rig.mgr);

    std::thread::sleep(Duration::from_millis(100));
    event_tx.send("stop".to_string()).unwrap();

    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, ExecutionStatus::Preempted);
    assert_eq!(rig.mgr.get_current_expected_trajectory_index(), None);
}

// ------------------------------------------------------------------------------------------------
// FACADE INVARIANTS
// ------------------------------------------------------------------------------------------------

#[test]
fn test_push_then_clear_empties_queue() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();
    assert_eq!(rig.mgr.trajectories().len(), 1);

    rig.mgr.clear().unwrap();
    assert!(rig.mgr.trajectories().is_empty());
    assert_eq!(rig.mgr.get_current_expected_trajectory_index(), None);
}

#[test]
fn test_stop_preempts_and_fires_callback_once() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());
    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_secs(10));

    rig.mgr
        .push(traj(&JOINTS, Duration::from_secs(10)), &[])
        .unwrap();

    let status_rx = execute_with_callback(&rig.mgr);
    std::thread::sleep(Duration::from_millis(100));
    rig.mgr.stop_execution(true);

    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, ExecutionStatus::Preempted);
    assert!(status_rx.recv_timeout(Duration::from_millis(100)).is_err());

    assert!(rig.mgr.trajectories().is_empty());
    assert_eq!(
        rig.mgr.get_last_execution_status(),
        ExecutionStatus::Preempted
    );
}

#[test]
fn test_push_fails_while_executing() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());
    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_secs(5));

    rig.mgr
        .push(traj(&JOINTS, Duration::from_secs(5)), &[])
        .unwrap();
    let _status_rx = execute_with_callback(&rig.mgr);
    std::thread::sleep(Duration::from_millis(100));

    let err = rig
        .mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap_err();
    assert!(matches!(err, ExecError::NotIdle));

    let err = rig.mgr.execute(None, None, true).unwrap_err();
    assert!(matches!(err, ExecError::AlreadyExecuting));

    rig.mgr.stop_execution(true);
}

#[test]
fn test_drop_during_execution_joins_cleanly() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());
    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_secs(30));

    rig.mgr
        .push(traj(&JOINTS, Duration::from_secs(30)), &[])
        .unwrap();
    rig.mgr.execute(None, None, true).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    drop(rig.mgr);
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "drop did not preempt the running execution"
    );
}

#[test]
fn test_controller_failure_aggregates() {
    let rig = rig(
        &[("a_ctrl", &["j1", "j2"], true), ("b_ctrl", &["j3"], true)],
        fast_params(),
    );
    rig.ctrl_mgr
        .set_completion_status("b_ctrl", ExecutionStatus::Failed);

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();

    let status_rx = execute_with_callback(&rig.mgr);
    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, ExecutionStatus::Failed);
}

#[test]
fn test_start_state_deviation_aborts() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());

    // The robot sits far from the trajectory start
    rig.monitor.set_state(JointState {
        names: JOINTS.iter().map(|j| j.to_string()).collect(),
        positions: vec![1.0; JOINTS.len()],
        velocities: vec![0.0; JOINTS.len()],
    });

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();

    let status_rx = execute_with_callback(&rig.mgr);
    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, ExecutionStatus::Aborted);
    assert_eq!(rig.ctrl_mgr.handles_created(), 0);
}

#[test]
fn test_dispatch_failure_aborts() {
    let rig = rig(
        &[("a_ctrl", &["j1", "j2"], true), ("b_ctrl", &["j3"], true)],
        fast_params(),
    );
    rig.ctrl_mgr.set_send_fails("b_ctrl", true);

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap();

    let status_rx = execute_with_callback(&rig.mgr);
    let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, ExecutionStatus::Aborted);
}

#[test]
fn test_wait_for_execution_stops_continuous() {
    let rig = rig(&[("a_ctrl", &["j1"], true)], fast_params());
    rig.ctrl_mgr
        .set_run_duration("a_ctrl", Duration::from_secs(10));

    // Two contexts on the same controller: the second would wait behind the first
    rig.mgr
        .push_and_execute(traj(&["j1"], Duration::from_millis(100)), &[])
        .unwrap();
    rig.mgr
        .push_and_execute(traj(&["j1"], Duration::from_millis(100)), &[])
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(rig.ctrl_mgr.handles_created(), 1);

    // Waiting stops the continuous executor: the queued context is dropped
    rig.mgr.wait_for_execution();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(rig.ctrl_mgr.handles_created(), 1);
}

#[test]
fn test_joint_state_push_and_execute() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());

    // A bare joint state becomes a one-waypoint trajectory at time zero
    rig.mgr
        .push_and_execute(
            JointState {
                names: JOINTS.iter().map(|j| j.to_string()).collect(),
                positions: vec![0.0; JOINTS.len()],
                velocities: vec![],
            },
            &[],
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(rig.ctrl_mgr.handles_created(), 1);
}

#[test]
fn test_empty_trajectory_push_fails() {
    let rig = rig(&[("a_ctrl", &["j1"], true)], fast_params());

    let err = rig
        .mgr
        .push(RobotTrajectory::default(), &[])
        .unwrap_err();
    assert!(matches!(err, ExecError::Configure(_)));
}

#[test]
fn test_uncoverable_push_fails() {
    let rig = rig(&[("a_ctrl", &["j1"], true)], fast_params());

    let err = rig
        .mgr
        .push(traj(&JOINTS, Duration::from_millis(100)), &[])
        .unwrap_err();
    assert!(matches!(err, ExecError::Configure(_)));
}

#[test]
fn test_expected_trajectory_index_advances() {
    let rig = rig(&[("a_ctrl", &["j1", "j2", "j3"], true)], fast_params());

    rig.mgr
        .push(traj(&JOINTS, Duration::from_millis(600)), &[])
        .unwrap();
    let status_rx = execute_with_callback(&rig.mgr);

    std::thread::sleep(Duration::from_millis(150));
    let (context_index, waypoint_index) = rig
        .mgr
        .get_current_expected_trajectory_index()
        .expect("nothing executing");
    assert_eq!(context_index, 0);
    assert!(waypoint_index >= 1, "expected to be past the first waypoint");

    status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(rig.mgr.get_current_expected_trajectory_index(), None);
}
