use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use log::{debug, warn};
use crate::config::RetryPolicy;
use crate::drivers::planner::AcquisitionPlan;
use crate::drivers::synth::{DeviceWaveformParams, SampleBuffer};
use crate::drivers::LcrError;
use crate::types::Channel;
/// Raw scope samples, one vector per physical input (counts, not volts).
#[derive(Clone, Debug, Default)]
pub struct AcquiredTrace {
    pub channels: Vec<Vec<f32>>, // channels x samples
}
impl AcquiredTrace {
    pub fn validate(&self, min_channels: usize) -> Result<(), LcrError> {
        if self.channels.len() < min_channels {
            return Err(LcrError::ChannelMismatch {
                expected: min_channels,
                actual: self.channels.len(),
            });
        }
        let len = self.samples_per_channel().unwrap_or(0);
        if self.channels.iter().any(|c| c.len() != len) {
            return Err(LcrError::RaggedTrace);
        }
        Ok(())
    }
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
    pub fn samples_per_channel(&self) -> Option<usize> {
        self.channels.first().map(|c| c.len())
    }
}
/// What the scope is told before each acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionSettings {
    pub decimation_index: usize,
    pub decimation_factor: u32,
    pub equalization: bool,
    pub shaping: bool,
}
impl AcquisitionSettings {
    pub fn for_plan(plan: &AcquisitionPlan, equalization: bool, shaping: bool) -> Self {
        Self {
            decimation_index: plan.decimation_bucket,
            decimation_factor: plan.decimation_factor,
            equalization,
            shaping,
        }
    }
}
/// Arbitrary waveform generator replaying a loaded buffer.
pub trait OutputDevice {
    fn init(&mut self) -> Result<(), LcrError>;
    fn configure(&mut self, channel: Channel, params: &DeviceWaveformParams) -> Result<(), LcrError>;
    fn load(&mut self, channel: Channel, buffer: &SampleBuffer) -> Result<(), LcrError>;
    /// Starts continuous replay on every channel whose bit is set.
    fn enable(&mut self, channel_mask: u8) -> Result<(), LcrError>;
}
/// Triggered oscilloscope.
pub trait AcquisitionDevice {
    fn init(&mut self) -> Result<(), LcrError>;
    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<(), LcrError>;
    /// `Ok(None)` while the trigger has not fired yet.
    fn poll(&mut self) -> Result<Option<AcquiredTrace>, LcrError>;
}
impl<T: OutputDevice + ?Sized> OutputDevice for &mut T {
    fn init(&mut self) -> Result<(), LcrError> {
        (**self).init()
    }
    fn configure(&mut self, channel: Channel, params: &DeviceWaveformParams) -> Result<(), LcrError> {
        (**self).configure(channel, params)
    }
    fn load(&mut self, channel: Channel, buffer: &SampleBuffer) -> Result<(), LcrError> {
        (**self).load(channel, buffer)
    }
    fn enable(&mut self, channel_mask: u8) -> Result<(), LcrError> {
        (**self).enable(channel_mask)
    }
}
impl<T: AcquisitionDevice + ?Sized> AcquisitionDevice for &mut T {
    fn init(&mut self) -> Result<(), LcrError> {
        (**self).init()
    }
    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<(), LcrError> {
        (**self).configure(settings)
    }
    fn poll(&mut self) -> Result<Option<AcquiredTrace>, LcrError> {
        (**self).poll()
    }
}
/// Shared flag that stops a sweep between poll attempts.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
/// Polls `device` until it returns a trace, the budget runs out or `cancel` fires.
pub fn acquire_with_retry<A: AcquisitionDevice + ?Sized>(
    device: &mut A,
    policy: &RetryPolicy,
    cancel: &CancelToken,
    frequency_hz: f64,
) -> Result<AcquiredTrace, LcrError> {
    let started = Instant::now();
    let deadline = policy.deadline();
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(LcrError::Cancelled);
        }
        attempts += 1;
        if let Some(trace) = device.poll()? {
            debug!("acquired after {attempts} attempt(s)");
            return Ok(trace);
        }
        let out_of_time = deadline.map_or(false, |d| started.elapsed() >= d);
        if attempts >= policy.max_attempts || out_of_time {
            warn!("acquisition at {frequency_hz} Hz was not triggered");
            return Err(LcrError::AcquisitionTimeout {
                frequency_hz,
                attempts,
            });
        }
        thread::sleep(policy.delay());
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    /// Scope that fires after a fixed number of empty polls.
    struct LateScope {
        empty_polls: u32,
        polls: u32,
    }
    impl AcquisitionDevice for LateScope {
        fn init(&mut self) -> Result<(), LcrError> {
            Ok(())
        }
        fn configure(&mut self, _settings: &AcquisitionSettings) -> Result<(), LcrError> {
            Ok(())
        }
        fn poll(&mut self) -> Result<Option<AcquiredTrace>, LcrError> {
            self.polls += 1;
            if self.polls > self.empty_polls {
                Ok(Some(AcquiredTrace {
                    channels: vec![vec![0.0; 4], vec![0.0; 4]],
                }))
            } else {
                Ok(None)
            }
        }
    }
    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_ms: 0,
            deadline_ms: None,
        }
    }
    #[test]
    fn retries_until_trigger() {
        let mut scope = LateScope { empty_polls: 3, polls: 0 };
        let trace = acquire_with_retry(&mut scope, &fast(10), &CancelToken::new(), 1000.0).unwrap();
        assert_eq!(scope.polls, 4);
        assert_eq!(trace.num_channels(), 2);
    }
    #[test]
    fn gives_up_after_budget() {
        let mut scope = LateScope { empty_polls: 100, polls: 0 };
        let err = acquire_with_retry(&mut scope, &fast(5), &CancelToken::new(), 1000.0).unwrap_err();
        assert!(matches!(err, LcrError::AcquisitionTimeout { attempts: 5, .. }));
        assert_eq!(scope.polls, 5);
    }
    #[test]
    fn deadline_cuts_the_budget_short() {
        let mut scope = LateScope { empty_polls: u32::MAX, polls: 0 };
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            delay_ms: 1,
            deadline_ms: Some(20),
        };
        let started = Instant::now();
        let err = acquire_with_retry(&mut scope, &policy, &CancelToken::new(), 50.0).unwrap_err();
        assert!(matches!(err, LcrError::AcquisitionTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
    #[test]
    fn cancelled_token_stops_before_polling() {
        let mut scope = LateScope { empty_polls: 0, polls: 0 };
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = acquire_with_retry(&mut scope, &fast(10), &cancel, 1000.0).unwrap_err();
        assert!(matches!(err, LcrError::Cancelled));
        assert_eq!(scope.polls, 0);
    }
    #[test]
    fn trace_validation_checks_shape() {
        let ragged = AcquiredTrace {
            channels: vec![vec![0.0; 4], vec![0.0; 3]],
        };
        assert!(matches!(ragged.validate(2), Err(LcrError::RaggedTrace)));
        let single = AcquiredTrace {
            channels: vec![vec![0.0; 4]],
        };
        assert!(matches!(
            single.validate(2),
            Err(LcrError::ChannelMismatch { expected: 2, actual: 1 })
        ));
    }
}
