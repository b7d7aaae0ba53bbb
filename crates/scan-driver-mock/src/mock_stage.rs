//! Mock motion stage implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{AxisTarget, Position, ScanError, ScanResult, StageControl};
use std::time::Duration;

use crate::common::FailurePlan;

const DEVICE: &str = "mock-stage";

/// One recorded stage operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageCall {
    /// `set_speed`
    SetSpeed {
        /// X speed, mm/s
        x: f64,
        /// Y speed, mm/s
        y: f64,
    },
    /// `move_absolute`
    MoveAbsolute(AxisTarget),
    /// `position`
    QueryPosition,
    /// `emergency_stop`
    EmergencyStop,
}

/// Operation selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageOp {
    /// `set_speed`
    SetSpeed,
    /// `move_absolute`
    MoveAbsolute,
    /// `position`
    QueryPosition,
    /// `emergency_stop`
    EmergencyStop,
}

#[derive(Debug)]
struct StageInner {
    position: Position,
    speed: (f64, f64),
    calls: Vec<StageCall>,
    halted: bool,
    garbled_position: bool,
    failures: FailurePlan<StageOp>,
}

/// Simulated stage.
///
/// Moves complete instantly, every call is recorded for later inspection, and
/// failures can be scripted per operation.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::at(Position::new(0.0, 100.0, 0.0));
/// stage.move_absolute(AxisTarget::y(80_100.0)).await?;
/// assert_eq!(stage.current_position().y, 80_100.0);
/// ```
#[derive(Debug)]
pub struct MockStage {
    inner: Mutex<StageInner>,
    latency: Duration,
}

impl Default for MockStage {
    fn default() -> Self {
        Self::at(Position::default())
    }
}

impl MockStage {
    /// Stage parked at `position`.
    pub fn at(position: Position) -> Self {
        Self {
            inner: Mutex::new(StageInner {
                position,
                speed: (0.0, 0.0),
                calls: Vec::new(),
                halted: false,
                garbled_position: false,
                failures: FailurePlan::default(),
            }),
            latency: Duration::ZERO,
        }
    }

    /// Add a fixed delay to every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make position queries fail as if the reply could not be parsed.
    pub fn garble_position_reply(&self) {
        self.inner.lock().garbled_position = true;
    }

    /// Fail the `nth` (1-based) future call of `op` with a transport error.
    pub fn fail_on(&self, op: StageOp, nth: usize) {
        self.inner.lock().failures.fail_on(op, nth);
    }

    /// Fail every future call of `op`.
    pub fn fail_always(&self, op: StageOp) {
        self.inner.lock().failures.fail_always(op);
    }

    /// Where the simulated stage is now.
    pub fn current_position(&self) -> Position {
        self.inner.lock().position
    }

    /// Last `(x, y)` speed set.
    pub fn speed(&self) -> (f64, f64) {
        self.inner.lock().speed
    }

    /// True once an emergency stop has been received.
    pub fn is_halted(&self) -> bool {
        self.inner.lock().halted
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<StageCall> {
        self.inner.lock().calls.clone()
    }

    /// Recorded absolute moves only.
    pub fn moves(&self) -> Vec<AxisTarget> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                StageCall::MoveAbsolute(target) => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Number of emergency stops received.
    pub fn emergency_stop_count(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, StageCall::EmergencyStop))
            .count()
    }

    async fn record(&self, op: StageOp, call: StageCall) -> ScanResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut inner = self.inner.lock();
        inner.calls.push(call);
        if inner.failures.should_fail(op) {
            return Err(ScanError::transport(
                DEVICE,
                format!("scripted failure on {:?}", op),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StageControl for MockStage {
    async fn set_speed(&self, x: f64, y: f64) -> ScanResult<()> {
        self.record(StageOp::SetSpeed, StageCall::SetSpeed { x, y })
            .await?;
        self.inner.lock().speed = (x, y);
        Ok(())
    }

    async fn move_absolute(&self, target: AxisTarget) -> ScanResult<()> {
        self.record(StageOp::MoveAbsolute, StageCall::MoveAbsolute(target))
            .await?;
        let mut inner = self.inner.lock();
        inner.halted = false;
        if let Some(x) = target.x {
            inner.position.x = x;
        }
        if let Some(y) = target.y {
            inner.position.y = y;
        }
        if let Some(z) = target.z {
            inner.position.z = z;
        }
        tracing::debug!(position = %inner.position, "Mock stage moved");
        Ok(())
    }

    async fn position(&self) -> ScanResult<Position> {
        self.record(StageOp::QueryPosition, StageCall::QueryPosition)
            .await?;
        let inner = self.inner.lock();
        if inner.garbled_position {
            return Err(ScanError::protocol(
                DEVICE,
                "position reply ':A ?? ??' is not three numbers",
            ));
        }
        Ok(inner.position)
    }

    async fn emergency_stop(&self) -> ScanResult<()> {
        self.record(StageOp::EmergencyStop, StageCall::EmergencyStop)
            .await?;
        self.inner.lock().halted = true;
        Ok(())
    }
}
