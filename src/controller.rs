//! Scan Controller: the tiled serpentine scan state machine.
//!
//! The controller owns the stage and trigger generator and runs one scan at a
//! time on a dedicated worker task.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  start()  ┌─────────┐  tile done   ┌──────────────┐
//! │ Idle │──────────▶│ Running │─────────────▶│ AwaitingNext │
//! └──────┘           └─────────┘◀─────────────└──────────────┘
//!    ▲                 │     │       next()          │
//!    │     last tile   │     │ stop()                │ stop()
//!    │  ┌───────────┐  │     ▼                       ▼
//!    ├──│ Completed │◀─┘   ┌──────────┐
//!    │  └───────────┘      │ Stopping │  teardown: output off, stage halt
//!    └─────────────────────└──────────┘
//! ```
//!
//! # Per-tile sequence
//!
//! 1. Y move to the far edge (even tiles) or back to the origin row (odd tiles)
//! 2. Configure the pulse output and enable it
//! 3. Wait out the sweep time, checking for cancellation
//! 4. Disable the output
//! 5. X step to the next column, report progress
//! 6. Pause until `next()` unless this was the last tile
//!
//! After the last tile the stage returns to the origin without a pause.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = ScanController::new(stage, generator, ControllerOptions::default());
//! let mut events = controller.subscribe();
//!
//! controller.start(&ScanInput::default())?;
//! // ... user inspects the first tile ...
//! controller.next()?;
//! controller.stop();
//! controller.wait_for_idle().await;
//! ```

use crate::events::{LogLevel, ScanEvent};
use crate::motion::{MotionWait, TimedMotionWait, WaitOutcome};
use crate::params::{ScanInput, ScanParameters};
use crate::signal::ProceedSignal;
use parking_lot::Mutex;
use scan_core::{
    AxisTarget, Position, PulseGenerator, PulseSettings, ScanError, ScanResult, ScanState,
    StageControl,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event channel depth. Slow subscribers lag instead of blocking the worker.
const EVENT_CAPACITY: usize = 256;

/// Controller tuning that does not change between runs.
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Cancellation polling interval during a sweep
    pub poll_interval: Duration,
    /// Pulse amplitude, volts
    pub amplitude_v: f64,
    /// Pulse offset, volts
    pub offset_v: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            amplitude_v: 5.0,
            offset_v: 2.5,
        }
    }
}

/// Cancellation and pause plumbing for one run.
#[derive(Debug, Default)]
struct ActiveRun {
    cancel: CancellationToken,
    signal: ProceedSignal,
}

/// How the tile loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Cancelled,
    Failed,
}

struct Inner {
    stage: Arc<dyn StageControl>,
    generator: Arc<dyn PulseGenerator>,
    motion: Arc<dyn MotionWait>,
    options: ControllerOptions,
    state: watch::Sender<ScanState>,
    events: broadcast::Sender<ScanEvent>,
    origin: Mutex<Option<Position>>,
    run: Mutex<Option<Arc<ActiveRun>>>,
    manual_busy: AtomicBool,
}

/// Marks a manual move in flight until dropped.
struct ManualMove<'a>(&'a AtomicBool);

impl Drop for ManualMove<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the scan controller. Cheap to clone.
#[derive(Clone)]
pub struct ScanController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("state", &self.state())
            .field("origin", &self.origin())
            .finish()
    }
}

impl ScanController {
    /// Controller using the time-budget motion wait.
    pub fn new(
        stage: Arc<dyn StageControl>,
        generator: Arc<dyn PulseGenerator>,
        options: ControllerOptions,
    ) -> Self {
        let motion = Arc::new(TimedMotionWait::new(options.poll_interval));
        Self::with_motion(stage, generator, motion, options)
    }

    /// Controller with a custom [`MotionWait`].
    pub fn with_motion(
        stage: Arc<dyn StageControl>,
        generator: Arc<dyn PulseGenerator>,
        motion: Arc<dyn MotionWait>,
        options: ControllerOptions,
    ) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                stage,
                generator,
                motion,
                options,
                state,
                events,
                origin: Mutex::new(None),
                run: Mutex::new(None),
                manual_busy: AtomicBool::new(false),
            }),
        }
    }

    /// Current controller state.
    pub fn state(&self) -> ScanState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ScanState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to log, progress and state events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Origin captured by the most recent scan, if any.
    pub fn origin(&self) -> Option<Position> {
        *self.inner.origin.lock()
    }

    /// Parse `input` and launch a scan on a new worker task.
    ///
    /// Returns as soon as the worker is spawned. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    /// - [`ScanError::Input`] if a field does not parse; nothing is sent to
    ///   the devices and the state is unchanged.
    /// - [`ScanError::InvalidState`] if a scan is already active.
    /// - [`ScanError::Busy`] while a manual move is in flight.
    pub fn start(&self, input: &ScanInput) -> ScanResult<()> {
        let params = match input.parse() {
            Ok(params) => params,
            Err(err) => {
                self.inner.report(&err, None);
                return Err(err);
            }
        };

        let run = Arc::new(ActiveRun::default());
        let mut current = ScanState::Idle;
        let accepted = self.inner.state.send_if_modified(|state| {
            current = *state;
            if *state != ScanState::Idle || self.inner.manual_busy.load(Ordering::Acquire) {
                return false;
            }
            *state = ScanState::Running;
            *self.inner.run.lock() = Some(run.clone());
            true
        });

        if !accepted {
            if current == ScanState::Idle {
                self.inner.log(LogLevel::Warn, "Manual move in progress.");
                return Err(ScanError::Busy { operation: "start" });
            }
            self.inner.log(LogLevel::Warn, "Scan already in progress.");
            return Err(ScanError::InvalidState {
                operation: "start",
                state: current,
            });
        }

        *self.inner.origin.lock() = None;
        self.inner.emit(ScanEvent::State(ScanState::Running));
        self.inner.log(
            LogLevel::Info,
            format!(
                "Starting scan: {} tiles, {:.1} s per sweep at {} Hz.",
                params.tile_count,
                params.total_time(),
                params.trigger_frequency
            ),
        );

        tokio::spawn(self.inner.clone().run_scan(params, run));
        Ok(())
    }

    /// Release the worker from its between-tile pause.
    ///
    /// # Errors
    /// [`ScanError::InvalidState`] if no scan is active.
    pub fn next(&self) -> ScanResult<()> {
        let state = self.state();
        let run = self.inner.run.lock().clone();
        match run {
            Some(run) if state.is_active() => {
                if state == ScanState::AwaitingNext {
                    self.inner.log(LogLevel::Info, "Proceeding to next tile...");
                } else {
                    debug!(%state, "next() outside the between-tile pause");
                }
                run.signal.set();
                Ok(())
            }
            _ => {
                self.inner.log(LogLevel::Warn, "No scan is running.");
                Err(ScanError::InvalidState {
                    operation: "proceed",
                    state,
                })
            }
        }
    }

    /// Stop the current scan.
    ///
    /// The worker disables the trigger output and halts the stage at its next
    /// check-point. With no scan active the same device commands are sent
    /// directly.
    pub fn stop(&self) {
        let mut previous = ScanState::Idle;
        let requested = self.inner.state.send_if_modified(|state| {
            previous = *state;
            if !matches!(state, ScanState::Running | ScanState::AwaitingNext) {
                return false;
            }
            *state = ScanState::Stopping;
            if let Some(run) = self.inner.run.lock().as_ref() {
                run.cancel.cancel();
                run.signal.set();
            }
            true
        });

        if requested {
            self.inner.emit(ScanEvent::State(ScanState::Stopping));
            self.inner.log(LogLevel::Warn, "Scan stop requested...");
            return;
        }

        match previous {
            ScanState::Stopping | ScanState::Completed => {
                debug!(state = %previous, "Stop ignored, run already ending");
            }
            _ => {
                self.inner
                    .log(LogLevel::Warn, "No scan running; halting devices anyway.");
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.teardown().await });
            }
        }
    }

    /// Move the stage back to the origin of the last scan.
    ///
    /// Does nothing unless `confirmed` (the lasers must be off first).
    ///
    /// # Errors
    /// [`ScanError::InvalidState`] while a scan is active,
    /// [`ScanError::Busy`] during another manual move,
    /// [`ScanError::NoOrigin`] before any scan, or the stage error.
    pub async fn return_to_start(&self, confirmed: bool) -> ScanResult<()> {
        let _manual = self.inner.begin_manual("return to start")?;

        if !confirmed {
            self.inner.log(LogLevel::Info, "Return to start cancelled.");
            return Ok(());
        }

        let Some(origin) = self.origin() else {
            let err = ScanError::NoOrigin;
            self.inner.report(&err, None);
            return Err(err);
        };

        match self
            .inner
            .stage
            .move_absolute(AxisTarget::xy(origin.x, origin.y))
            .await
        {
            Ok(()) => {
                self.inner.log(LogLevel::Info, "Returned to initial position.");
                Ok(())
            }
            Err(err) => {
                self.inner.report(&err, Some("Return to start failed"));
                Err(err)
            }
        }
    }

    /// Absolute three-axis move from raw text fields.
    ///
    /// # Errors
    /// [`ScanError::InvalidState`] while a scan is active,
    /// [`ScanError::Busy`] during another manual move,
    /// [`ScanError::Input`] if a field does not parse (no device call), or the
    /// stage error.
    pub async fn manual_move(&self, x: &str, y: &str, z: &str) -> ScanResult<()> {
        let _manual = self.inner.begin_manual("move manually")?;

        let target = match parse_xyz(x, y, z) {
            Ok(target) => target,
            Err(err) => {
                self.inner.report(&err, Some("Invalid XYZ input"));
                return Err(err);
            }
        };

        match self
            .inner
            .stage
            .move_absolute(AxisTarget::xyz(target.x, target.y, target.z))
            .await
        {
            Ok(()) => {
                self.inner
                    .log(LogLevel::Info, format!("Moved to {}.", target));
                Ok(())
            }
            Err(err) => {
                self.inner.report(&err, Some("Manual move failed"));
                Err(err)
            }
        }
    }

    /// Resolve once the controller is back to Idle.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail
        let _ = rx.wait_for(|state| *state == ScanState::Idle).await;
    }

    /// Stop any active scan and wait for its teardown.
    pub async fn shutdown(&self) {
        if self.state().is_active() {
            info!("Shutting down active scan");
            self.stop();
            self.wait_for_idle().await;
        }
    }
}

fn parse_xyz(x: &str, y: &str, z: &str) -> ScanResult<Position> {
    fn axis(field: &'static str, raw: &str) -> ScanResult<f64> {
        raw.trim().parse().map_err(|_| ScanError::Input {
            field,
            value: raw.to_string(),
        })
    }
    Ok(Position::new(axis("x", x)?, axis("y", y)?, axis("z", z)?))
}

impl Inner {
    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn log(&self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Info => info!(target: "stage_scan::scan", "{}", text),
            LogLevel::Warn => warn!(target: "stage_scan::scan", "{}", text),
            LogLevel::Error => error!(target: "stage_scan::scan", "{}", text),
        }
        self.emit(ScanEvent::Log { level, text });
    }

    /// One error log line: `[Category] context: message`.
    fn report(&self, err: &ScanError, context: Option<&str>) {
        let text = match context {
            Some(context) => format!("[{}] {}: {}", err.category(), context, err),
            None => format!("[{}] {}", err.category(), err),
        };
        self.log(LogLevel::Error, text);
    }

    /// Claim the stage for a manual move. `start()` is refused until the
    /// returned guard drops.
    fn begin_manual(&self, operation: &'static str) -> ScanResult<ManualMove<'_>> {
        let mut refused = None;
        // Checked under the state lock so a concurrent start() cannot slip in
        self.state.send_if_modified(|state| {
            if state.is_active() {
                refused = Some(ScanError::InvalidState {
                    operation,
                    state: *state,
                });
            } else if self.manual_busy.swap(true, Ordering::AcqRel) {
                refused = Some(ScanError::Busy { operation });
            }
            false
        });

        match refused {
            Some(err) => {
                self.report(&err, None);
                Err(err)
            }
            None => Ok(ManualMove(&self.manual_busy)),
        }
    }

    /// Move between worker states unless a stop got there first.
    fn advance(&self, from: ScanState, to: ScanState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if moved {
            self.emit(ScanEvent::State(to));
        }
        moved
    }

    async fn run_scan(self: Arc<Self>, params: ScanParameters, run: Arc<ActiveRun>) {
        let end = match self.prepare(&params).await {
            Some(origin) => self.run_tiles(&params, origin, &run).await,
            None => RunEnd::Failed,
        };
        debug!(?end, "Tile loop finished");

        self.finish(&run).await;
    }

    /// Set speeds and capture the origin. `None` aborts the run.
    async fn prepare(&self, params: &ScanParameters) -> Option<Position> {
        if let Err(err) = self.stage.set_speed(params.x_speed, params.y_speed).await {
            self.report(&err, Some("Failed to set stage speed"));
            return None;
        }

        match self.stage.position().await {
            Ok(origin) => {
                *self.origin.lock() = Some(origin);
                self.log(LogLevel::Info, format!("Initial position: {}", origin));
                Some(origin)
            }
            Err(err) => {
                self.report(&err, Some("Failed to parse position"));
                None
            }
        }
    }

    async fn run_tiles(
        &self,
        params: &ScanParameters,
        origin: Position,
        run: &ActiveRun,
    ) -> RunEnd {
        match self.tile_loop(params, origin, run).await {
            Ok(end) => end,
            Err(err) => {
                self.report(&err, Some("Scan aborted"));
                if !run.cancel.is_cancelled() {
                    if let Err(disable_err) = self.generator.disable_output().await {
                        self.report(&disable_err, Some("Failed to disable trigger output"));
                    }
                }
                RunEnd::Failed
            }
        }
    }

    async fn tile_loop(
        &self,
        params: &ScanParameters,
        origin: Position,
        run: &ActiveRun,
    ) -> ScanResult<RunEnd> {
        let pulse = PulseSettings {
            frequency_hz: params.trigger_frequency,
            amplitude_v: self.options.amplitude_v,
            offset_v: self.options.offset_v,
        };
        let sweep = params.sweep_duration();

        for tile in 0..params.tile_count {
            if run.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            let target_y = params.target_y(tile, &origin);
            self.log(
                LogLevel::Info,
                format!(
                    "Tile {}/{}: sweeping Y to {}",
                    tile + 1,
                    params.tile_count,
                    target_y
                ),
            );
            self.stage.move_absolute(AxisTarget::y(target_y)).await?;

            // A stop that landed during the Y move must not arm the trigger
            if run.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            self.generator.configure_pulse(pulse).await?;
            self.generator.enable_output().await?;

            if self.motion.wait(sweep, &run.cancel).await == WaitOutcome::Cancelled {
                // Output is switched off by the stop teardown
                return Ok(RunEnd::Cancelled);
            }

            self.generator.disable_output().await?;

            if run.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            self.stage
                .move_absolute(AxisTarget::x(params.tile_x(tile, &origin)))
                .await?;
            self.emit(ScanEvent::Progress {
                current: tile + 1,
                total: params.tile_count,
            });

            if params.is_last_tile(tile) {
                self.log(LogLevel::Info, "Final tile completed.");
                break;
            }

            self.log(
                LogLevel::Info,
                format!("Tile {} completed. Waiting for next.", tile + 1),
            );
            if !self.pause(run).await {
                return Ok(RunEnd::Cancelled);
            }
        }

        if run.cancel.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }

        self.stage
            .move_absolute(AxisTarget::xy(origin.x, origin.y))
            .await?;
        self.emit(ScanEvent::Progress {
            current: 0,
            total: params.tile_count,
        });
        self.log(LogLevel::Info, "Returned to initial position.");
        self.log(LogLevel::Info, "Scan completed.");
        self.advance(ScanState::Running, ScanState::Completed);
        Ok(RunEnd::Completed)
    }

    /// Block between tiles. Returns `false` if the run was cancelled.
    async fn pause(&self, run: &ActiveRun) -> bool {
        run.signal.clear();
        if run.cancel.is_cancelled() || !self.advance(ScanState::Running, ScanState::AwaitingNext)
        {
            return false;
        }

        tokio::select! {
            _ = run.signal.wait() => {}
            _ = run.cancel.cancelled() => {}
        }

        !run.cancel.is_cancelled() && self.advance(ScanState::AwaitingNext, ScanState::Running)
    }

    /// Tear down a pending stop, then return to Idle.
    ///
    /// The cancel check and the Idle transition run under the state lock, so a
    /// stop() racing with the end of the run is never lost.
    async fn finish(&self, run: &Arc<ActiveRun>) {
        let mut torn_down = false;
        loop {
            let mut stop_pending = false;
            let idle = self.state.send_if_modified(|state| {
                if run.cancel.is_cancelled() && !torn_down {
                    stop_pending = true;
                    return false;
                }
                *state = ScanState::Idle;
                let mut slot = self.run.lock();
                if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, run)) {
                    *slot = None;
                }
                true
            });

            if idle {
                self.emit(ScanEvent::State(ScanState::Idle));
                return;
            }
            if stop_pending {
                self.teardown().await;
                torn_down = true;
            }
        }
    }

    /// Output off, then stage halt. Each step is attempted once and failures
    /// do not skip the next step.
    async fn teardown(&self) {
        let mut clean = true;
        if let Err(err) = self.generator.disable_output().await {
            self.report(&err, Some("Failed to disable trigger output"));
            clean = false;
        }
        if let Err(err) = self.stage.emergency_stop().await {
            self.report(&err, Some("Failed to halt stage"));
            clean = false;
        }

        if clean {
            self.log(
                LogLevel::Warn,
                "Scan stopped. Trigger output disabled and stage halted.",
            );
        } else {
            self.log(LogLevel::Warn, "Scan stopped with errors during teardown.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_driver_mock::{MockGenerator, MockStage};
    use tracing_test::traced_test;

    fn fast_input(tiles: u32) -> ScanInput {
        ScanInput {
            // 0.001 mm at 1 mm/s: 1 ms sweeps
            y_speed: "1".into(),
            y_scan_distance: "0.001".into(),
            tile_count: tiles.to_string(),
            ..ScanInput::default()
        }
    }

    fn controller() -> (ScanController, Arc<MockStage>, Arc<MockGenerator>) {
        let stage = Arc::new(MockStage::at(Position::new(0.0, 100.0, 0.0)));
        let generator = Arc::new(MockGenerator::new());
        let options = ControllerOptions {
            poll_interval: Duration::from_millis(5),
            ..ControllerOptions::default()
        };
        let controller = ScanController::new(stage.clone(), generator.clone(), options);
        (controller, stage, generator)
    }

    #[test]
    fn parse_xyz_rejects_non_numeric_axis() {
        assert!(parse_xyz("1", "2", "3").is_ok());
        assert!(matches!(
            parse_xyz("1", "two", "3"),
            Err(ScanError::Input { field: "y", .. })
        ));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_active() {
        let (controller, _stage, _generator) = controller();

        controller.start(&fast_input(3)).unwrap();
        let err = controller.start(&fast_input(3)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidState { operation: "start", .. }));

        controller.shutdown().await;
        assert_eq!(controller.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn next_without_scan_is_rejected() {
        let (controller, _stage, _generator) = controller();
        assert!(controller.next().is_err());
    }

    #[tokio::test]
    async fn manual_move_rejected_while_scanning() {
        let (controller, stage, _generator) = controller();
        controller.start(&fast_input(2)).unwrap();

        let err = controller.manual_move("1", "2", "3").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidState { .. }));

        controller.shutdown().await;
        assert!(stage
            .moves()
            .iter()
            .all(|target| *target != AxisTarget::xyz(1.0, 2.0, 3.0)));
    }

    #[tokio::test]
    #[traced_test]
    async fn log_events_are_mirrored_to_tracing() {
        let (controller, _stage, _generator) = controller();
        let input = ScanInput {
            trigger_frequency: "abc".into(),
            ..ScanInput::default()
        };

        assert!(controller.start(&input).is_err());
        assert!(logs_contain(
            "[InputError] Invalid input for trigger_frequency: 'abc'"
        ));
    }

    #[tokio::test]
    async fn stop_is_ignored_while_already_stopping() {
        let (controller, stage, _generator) = controller();
        let slow = ScanInput {
            y_scan_distance: "8.0".into(),
            ..fast_input(2)
        };

        controller.start(&slow).unwrap();
        controller.stop();
        controller.stop();
        controller.wait_for_idle().await;

        assert_eq!(stage.emergency_stop_count(), 1);
    }
}
