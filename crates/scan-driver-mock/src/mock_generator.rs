//! Mock pulse generator implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{PulseGenerator, ScanError, ScanResult, Waveform};

use crate::common::FailurePlan;

const DEVICE: &str = "mock-generator";

/// One recorded generator command.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorCall {
    /// `set_waveform`
    Waveform(Waveform),
    /// `set_frequency`
    Frequency(f64),
    /// `set_amplitude`
    Amplitude(f64),
    /// `set_offset`
    Offset(f64),
    /// `set_output`
    Output(bool),
}

/// Operation selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorOp {
    /// `set_waveform`
    Waveform,
    /// `set_frequency`
    Frequency,
    /// `set_amplitude`
    Amplitude,
    /// `set_offset`
    Offset,
    /// `set_output(true)`
    OutputOn,
    /// `set_output(false)`
    OutputOff,
}

/// Simulated output channel state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorSnapshot {
    /// Last selected waveform
    pub waveform: Option<Waveform>,
    /// Frequency, Hz
    pub frequency_hz: f64,
    /// Amplitude, volts
    pub amplitude_v: f64,
    /// Offset, volts
    pub offset_v: f64,
    /// Output switch
    pub output_enabled: bool,
}

#[derive(Debug)]
struct GeneratorInner {
    state: GeneratorSnapshot,
    calls: Vec<GeneratorCall>,
    failures: FailurePlan<GeneratorOp>,
}

/// Simulated single-channel trigger generator.
#[derive(Debug)]
pub struct MockGenerator {
    inner: Mutex<GeneratorInner>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    /// Generator with output off and nothing configured.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GeneratorInner {
                state: GeneratorSnapshot {
                    waveform: None,
                    frequency_hz: 0.0,
                    amplitude_v: 0.0,
                    offset_v: 0.0,
                    output_enabled: false,
                },
                calls: Vec::new(),
                failures: FailurePlan::default(),
            }),
        }
    }

    /// Fail the `nth` (1-based) future call of `op` with a transport error.
    pub fn fail_on(&self, op: GeneratorOp, nth: usize) {
        self.inner.lock().failures.fail_on(op, nth);
    }

    /// Fail every future call of `op`.
    pub fn fail_always(&self, op: GeneratorOp) {
        self.inner.lock().failures.fail_always(op);
    }

    /// Current simulated channel state.
    pub fn snapshot(&self) -> GeneratorSnapshot {
        self.inner.lock().state
    }

    /// True while the output is on.
    pub fn is_output_enabled(&self) -> bool {
        self.inner.lock().state.output_enabled
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<GeneratorCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of output-disable commands received.
    pub fn disable_count(&self) -> usize {
        self.count(&GeneratorCall::Output(false))
    }

    /// Number of output-enable commands received.
    pub fn enable_count(&self) -> usize {
        self.count(&GeneratorCall::Output(true))
    }

    fn count(&self, wanted: &GeneratorCall) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| *call == wanted)
            .count()
    }

    fn apply(&self, op: GeneratorOp, call: GeneratorCall) -> ScanResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(call.clone());
        if inner.failures.should_fail(op) {
            return Err(ScanError::transport(
                DEVICE,
                format!("scripted failure on {:?}", op),
            ));
        }
        match call {
            GeneratorCall::Waveform(w) => inner.state.waveform = Some(w),
            GeneratorCall::Frequency(hz) => inner.state.frequency_hz = hz,
            GeneratorCall::Amplitude(v) => inner.state.amplitude_v = v,
            GeneratorCall::Offset(v) => inner.state.offset_v = v,
            GeneratorCall::Output(on) => inner.state.output_enabled = on,
        }
        Ok(())
    }
}

#[async_trait]
impl PulseGenerator for MockGenerator {
    async fn set_waveform(&self, waveform: Waveform) -> ScanResult<()> {
        self.apply(GeneratorOp::Waveform, GeneratorCall::Waveform(waveform))
    }

    async fn set_frequency(&self, hz: f64) -> ScanResult<()> {
        self.apply(GeneratorOp::Frequency, GeneratorCall::Frequency(hz))
    }

    async fn set_amplitude(&self, volts: f64) -> ScanResult<()> {
        self.apply(GeneratorOp::Amplitude, GeneratorCall::Amplitude(volts))
    }

    async fn set_offset(&self, volts: f64) -> ScanResult<()> {
        self.apply(GeneratorOp::Offset, GeneratorCall::Offset(volts))
    }

    async fn set_output(&self, enabled: bool) -> ScanResult<()> {
        let op = if enabled {
            GeneratorOp::OutputOn
        } else {
            GeneratorOp::OutputOff
        };
        self.apply(op, GeneratorCall::Output(enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::PulseSettings;

    #[tokio::test]
    async fn configure_pulse_sets_all_fields() {
        let generator = MockGenerator::new();
        generator
            .configure_pulse(PulseSettings {
                frequency_hz: 10.0,
                amplitude_v: 5.0,
                offset_v: 2.5,
            })
            .await
            .unwrap();
        generator.enable_output().await.unwrap();

        let state = generator.snapshot();
        assert_eq!(state.waveform, Some(Waveform::Pulse));
        assert_eq!(state.frequency_hz, 10.0);
        assert_eq!(state.amplitude_v, 5.0);
        assert_eq!(state.offset_v, 2.5);
        assert!(state.output_enabled);
    }

    #[tokio::test]
    async fn disabling_twice_is_harmless() {
        let generator = MockGenerator::new();
        generator.enable_output().await.unwrap();

        generator.disable_output().await.unwrap();
        let after_first = generator.snapshot();
        generator.disable_output().await.unwrap();

        assert_eq!(generator.snapshot(), after_first);
        assert_eq!(generator.disable_count(), 2);
    }
}
