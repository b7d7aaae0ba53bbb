//! Integration tests for the scan controller against simulated devices.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{AxisTarget, Position, ScanError, ScanState, Waveform};
use scan_driver_mock::{GeneratorCall, GeneratorOp, MockGenerator, MockStage, StageCall, StageOp};
use stage_scan::{
    ControllerOptions, MotionWait, ScanController, ScanEvent, ScanInput, WaitOutcome,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Completes every wait immediately and records the requested durations.
#[derive(Default)]
struct InstantWait {
    requested: Mutex<Vec<Duration>>,
}

#[async_trait]
impl MotionWait for InstantWait {
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
        self.requested.lock().push(duration);
        if cancel.is_cancelled() {
            WaitOutcome::Cancelled
        } else {
            WaitOutcome::Completed
        }
    }
}

struct Rig {
    controller: ScanController,
    stage: Arc<MockStage>,
    generator: Arc<MockGenerator>,
}

fn options() -> ControllerOptions {
    ControllerOptions {
        poll_interval: Duration::from_millis(100),
        ..ControllerOptions::default()
    }
}

/// Controller with the real timed wait (default 40 s sweeps).
fn timed_rig(origin: Position) -> Rig {
    let stage = Arc::new(MockStage::at(origin));
    let generator = Arc::new(MockGenerator::new());
    let controller = ScanController::new(stage.clone(), generator.clone(), options());
    Rig {
        controller,
        stage,
        generator,
    }
}

/// Controller whose sweeps finish instantly.
fn instant_rig(origin: Position) -> (Rig, Arc<InstantWait>) {
    let stage = Arc::new(MockStage::at(origin));
    let generator = Arc::new(MockGenerator::new());
    let wait = Arc::new(InstantWait::default());
    let controller =
        ScanController::with_motion(stage.clone(), generator.clone(), wait.clone(), options());
    (
        Rig {
            controller,
            stage,
            generator,
        },
        wait,
    )
}

fn input_with_tiles(tiles: u32) -> ScanInput {
    ScanInput {
        tile_count: tiles.to_string(),
        ..ScanInput::default()
    }
}

async fn wait_until(controller: &ScanController, wanted: impl Fn(ScanState) -> bool) {
    let mut rx = controller.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|state| wanted(*state)))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

/// Run a whole scan, answering every between-tile pause with next().
///
/// Each tile issues one Y and one X move, so the move count tells which pause
/// the worker has reached even when a whole tile runs between two polls.
async fn drive_to_completion(rig: &Rig, tiles: u32) {
    for tile in 1..tiles {
        let finished_moves = 2 * tile as usize;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(rig.controller.state() == ScanState::AwaitingNext
                && rig.stage.moves().len() == finished_moves)
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("pause after tile {tile} not reached"));
        rig.controller.next().unwrap();
    }
    wait_until(&rig.controller, |s| s == ScanState::Idle).await;
}

async fn wait_for_output_on(generator: &MockGenerator) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !generator.is_output_enabled() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("output never enabled");
}

fn drain(events: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn log_lines(events: &[ScanEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ScanEvent::Log { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn y_targets_alternate_and_x_steps_increase() {
    let origin = Position::new(1_000.0, 100.0, 0.0);
    let (rig, wait) = instant_rig(origin);

    rig.controller.start(&input_with_tiles(10)).unwrap();
    drive_to_completion(&rig, 10).await;

    let moves = rig.stage.moves();
    // Y, X per tile, then the return to origin
    assert_eq!(moves.len(), 21);

    for tile in 0..10u32 {
        let y_move = moves[(tile * 2) as usize];
        let x_move = moves[(tile * 2 + 1) as usize];
        let expected_y = if tile % 2 == 0 { 80_100.0 } else { 100.0 };

        assert_eq!(y_move, AxisTarget::y(expected_y), "tile {tile}");
        assert_eq!(
            x_move,
            AxisTarget::x(1_000.0 + f64::from(tile + 1) * 7_000.0),
            "tile {tile}"
        );
    }
    assert_eq!(moves[20], AxisTarget::xy(1_000.0, 100.0));

    // 8 mm at 0.2 mm/s
    let requested = wait.requested.lock().clone();
    assert_eq!(requested, vec![Duration::from_secs(40); 10]);
}

#[tokio::test]
async fn each_tile_arms_and_disarms_the_trigger_once() {
    let (rig, _wait) = instant_rig(Position::default());

    rig.controller.start(&input_with_tiles(3)).unwrap();
    drive_to_completion(&rig, 3).await;

    assert_eq!(rig.generator.enable_count(), 3);
    assert_eq!(rig.generator.disable_count(), 3);
    assert!(!rig.generator.is_output_enabled());

    let snapshot = rig.generator.snapshot();
    assert_eq!(snapshot.waveform, Some(Waveform::Pulse));
    assert_eq!(snapshot.frequency_hz, 10.0);
    assert_eq!(snapshot.amplitude_v, 5.0);
    assert_eq!(snapshot.offset_v, 2.5);

    // Configuration precedes enabling on every tile
    let calls = rig.generator.calls();
    assert_eq!(
        &calls[..5],
        &[
            GeneratorCall::Waveform(Waveform::Pulse),
            GeneratorCall::Frequency(10.0),
            GeneratorCall::Amplitude(5.0),
            GeneratorCall::Offset(2.5),
            GeneratorCall::Output(true),
        ]
    );
}

#[tokio::test]
async fn start_sets_speed_before_reading_origin() {
    let (rig, _wait) = instant_rig(Position::default());

    rig.controller.start(&input_with_tiles(1)).unwrap();
    rig.controller.wait_for_idle().await;

    assert_eq!(
        &rig.stage.calls()[..2],
        &[StageCall::SetSpeed { x: 0.1, y: 0.2 }, StageCall::QueryPosition]
    );
    assert_eq!(rig.stage.speed(), (0.1, 0.2));
}

#[tokio::test]
async fn last_tile_returns_to_origin_without_next() {
    let origin = Position::new(5.0, 6.0, 7.0);
    let (rig, _wait) = instant_rig(origin);
    let mut events = rig.controller.subscribe();

    rig.controller.start(&input_with_tiles(1)).unwrap();
    rig.controller.wait_for_idle().await;

    let returns: Vec<_> = rig
        .stage
        .moves()
        .into_iter()
        .filter(|target| *target == AxisTarget::xy(5.0, 6.0))
        .collect();
    assert_eq!(returns.len(), 1);

    let events = drain(&mut events);
    let progress: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ScanEvent::Progress { current, total } => Some((*current, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 1), (0, 1)]);

    assert!(events.contains(&ScanEvent::State(ScanState::Completed)));
    assert_eq!(events.last(), Some(&ScanEvent::State(ScanState::Idle)));

    let logs = log_lines(&events);
    assert!(logs.iter().any(|line| line == "Returned to initial position."));
    assert!(logs.iter().any(|line| line == "Scan completed."));
    assert_eq!(rig.controller.origin(), Some(origin));
}

#[tokio::test]
async fn stop_during_sweep_tears_down_within_one_poll() {
    let rig = timed_rig(Position::default());

    rig.controller.start(&ScanInput::default()).unwrap();
    wait_for_output_on(&rig.generator).await;

    let stopped_at = Instant::now();
    rig.controller.stop();
    assert_eq!(rig.controller.state(), ScanState::Stopping);

    rig.controller.wait_for_idle().await;
    let elapsed = stopped_at.elapsed();
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");

    assert_eq!(rig.generator.disable_count(), 1);
    assert_eq!(rig.stage.emergency_stop_count(), 1);
    assert!(!rig.generator.is_output_enabled());
    assert!(rig.stage.is_halted());

    // The interrupted tile never stepped X and there was no return move
    assert_eq!(rig.stage.moves(), vec![AxisTarget::y(80_000.0)]);
}

#[tokio::test(start_paused = true)]
async fn stop_during_y_move_never_arms_the_trigger() {
    let stage = Arc::new(
        MockStage::at(Position::default()).with_latency(Duration::from_millis(100)),
    );
    let generator = Arc::new(MockGenerator::new());
    let controller = ScanController::new(stage.clone(), generator.clone(), options());

    controller.start(&ScanInput::default()).unwrap();
    // Speed at 100 ms, origin at 200 ms, Y move lands at 300 ms
    tokio::time::sleep(Duration::from_millis(250)).await;
    controller.stop();
    controller.wait_for_idle().await;

    assert_eq!(generator.enable_count(), 0);
    assert_eq!(generator.disable_count(), 1);
    assert!(!generator
        .calls()
        .contains(&GeneratorCall::Waveform(Waveform::Pulse)));
    assert_eq!(
        stage.calls(),
        vec![
            StageCall::SetSpeed { x: 0.1, y: 0.2 },
            StageCall::QueryPosition,
            StageCall::MoveAbsolute(AxisTarget::y(80_000.0)),
            StageCall::EmergencyStop,
        ]
    );
}

#[tokio::test]
async fn stop_while_awaiting_next_tears_down() {
    let (rig, _wait) = instant_rig(Position::default());

    rig.controller.start(&input_with_tiles(4)).unwrap();
    wait_until(&rig.controller, |s| s == ScanState::AwaitingNext).await;

    rig.controller.stop();
    rig.controller.wait_for_idle().await;

    // One disable from the finished tile, one from the teardown
    assert_eq!(rig.generator.disable_count(), 2);
    assert_eq!(rig.stage.emergency_stop_count(), 1);
    assert_eq!(rig.stage.moves().len(), 2);
}

#[tokio::test]
async fn stop_while_idle_still_halts_devices() {
    let rig = timed_rig(Position::default());

    rig.controller.stop();

    tokio::time::timeout(Duration::from_secs(5), async {
        while rig.stage.emergency_stop_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(rig.generator.disable_count(), 1);
    assert_eq!(rig.stage.emergency_stop_count(), 1);
    assert_eq!(rig.controller.state(), ScanState::Idle);
}

#[tokio::test]
async fn teardown_continues_after_generator_failure() {
    let rig = timed_rig(Position::default());
    rig.generator.fail_always(GeneratorOp::OutputOff);
    let mut events = rig.controller.subscribe();

    rig.controller.start(&ScanInput::default()).unwrap();
    wait_for_output_on(&rig.generator).await;
    rig.controller.stop();
    rig.controller.wait_for_idle().await;

    assert_eq!(rig.stage.emergency_stop_count(), 1);
    let logs = log_lines(&drain(&mut events));
    assert!(logs
        .iter()
        .any(|line| line.starts_with("[TransportError] Failed to disable trigger output")));
}

#[tokio::test]
async fn invalid_frequency_touches_no_device() {
    let rig = timed_rig(Position::default());
    let mut events = rig.controller.subscribe();

    let input = ScanInput {
        trigger_frequency: "abc".into(),
        ..ScanInput::default()
    };
    let err = rig.controller.start(&input).unwrap_err();
    assert!(matches!(err, ScanError::Input { field: "trigger_frequency", .. }));

    assert!(rig.stage.calls().is_empty());
    assert!(rig.generator.calls().is_empty());
    assert_eq!(rig.controller.state(), ScanState::Idle);

    let events = drain(&mut events);
    let input_errors: Vec<_> = log_lines(&events)
        .into_iter()
        .filter(|line| line.contains("InputError"))
        .collect();
    assert_eq!(input_errors.len(), 1);
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn unparsable_origin_aborts_before_motion() {
    let rig = timed_rig(Position::default());
    rig.stage.garble_position_reply();
    let mut events = rig.controller.subscribe();

    rig.controller.start(&ScanInput::default()).unwrap();
    rig.controller.wait_for_idle().await;

    assert!(rig.stage.moves().is_empty());
    assert!(rig.generator.calls().is_empty());
    assert_eq!(rig.controller.origin(), None);

    let logs = log_lines(&drain(&mut events));
    assert!(logs
        .iter()
        .any(|line| line.starts_with("[ProtocolError] Failed to parse position")));
}

#[tokio::test]
async fn transport_failure_mid_scan_disables_output_and_idles() {
    let (rig, _wait) = instant_rig(Position::default());
    // First Y move succeeds, the X step after it fails
    rig.stage.fail_on(StageOp::MoveAbsolute, 2);
    let mut events = rig.controller.subscribe();

    rig.controller.start(&input_with_tiles(3)).unwrap();
    rig.controller.wait_for_idle().await;

    assert!(!rig.generator.is_output_enabled());
    assert_eq!(rig.stage.emergency_stop_count(), 0);

    let logs = log_lines(&drain(&mut events));
    assert!(logs
        .iter()
        .any(|line| line.starts_with("[TransportError] Scan aborted")));
}

#[tokio::test]
async fn controller_accepts_a_new_scan_after_completion() {
    let (rig, _wait) = instant_rig(Position::default());

    rig.controller.start(&input_with_tiles(1)).unwrap();
    rig.controller.wait_for_idle().await;

    rig.controller.start(&input_with_tiles(1)).unwrap();
    rig.controller.wait_for_idle().await;

    let queries = rig
        .stage
        .calls()
        .into_iter()
        .filter(|call| *call == StageCall::QueryPosition)
        .count();
    assert_eq!(queries, 2);
}

#[tokio::test]
async fn return_to_start_needs_origin_and_confirmation() {
    let origin = Position::new(300.0, 400.0, 0.0);
    let (rig, _wait) = instant_rig(origin);

    assert!(matches!(
        rig.controller.return_to_start(true).await,
        Err(ScanError::NoOrigin)
    ));

    rig.controller.start(&input_with_tiles(1)).unwrap();
    rig.controller.wait_for_idle().await;
    let moves_after_scan = rig.stage.moves().len();

    rig.controller.return_to_start(false).await.unwrap();
    assert_eq!(rig.stage.moves().len(), moves_after_scan);

    rig.controller.return_to_start(true).await.unwrap();
    assert_eq!(rig.stage.moves().last(), Some(&AxisTarget::xy(300.0, 400.0)));
}

#[tokio::test]
async fn return_to_start_rejected_while_scanning() {
    let rig = timed_rig(Position::default());

    rig.controller.start(&ScanInput::default()).unwrap();
    let err = rig.controller.return_to_start(true).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidState { .. }));

    rig.controller.shutdown().await;
}

#[tokio::test]
async fn manual_move_validates_before_moving() {
    let rig = timed_rig(Position::default());

    let err = rig.controller.manual_move("1", "y", "3").await.unwrap_err();
    assert!(matches!(err, ScanError::Input { field: "y", .. }));
    assert!(rig.stage.calls().is_empty());

    rig.controller.manual_move("10", "20", "-5").await.unwrap();
    assert_eq!(rig.stage.moves(), vec![AxisTarget::xyz(10.0, 20.0, -5.0)]);
    assert_eq!(rig.stage.current_position(), Position::new(10.0, 20.0, -5.0));
}

#[tokio::test(start_paused = true)]
async fn start_is_refused_while_a_manual_move_is_in_flight() {
    let stage = Arc::new(
        MockStage::at(Position::default()).with_latency(Duration::from_millis(100)),
    );
    let generator = Arc::new(MockGenerator::new());
    let controller = ScanController::new(stage.clone(), generator, options());

    let mover = controller.clone();
    let manual = tokio::spawn(async move { mover.manual_move("10", "20", "0").await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = controller.start(&ScanInput::default()).unwrap_err();
    assert!(matches!(err, ScanError::Busy { operation: "start" }));
    let err = controller.manual_move("1", "1", "1").await.unwrap_err();
    assert!(matches!(err, ScanError::Busy { .. }));
    assert_eq!(controller.state(), ScanState::Idle);

    manual.await.unwrap().unwrap();
    assert_eq!(
        stage.calls(),
        vec![StageCall::MoveAbsolute(AxisTarget::xyz(10.0, 20.0, 0.0))]
    );

    controller.start(&input_with_tiles(1)).unwrap();
    controller.shutdown().await;
}
