// src/config.rs
use std::time::Duration;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use crate::drivers::LcrError;
use crate::types::Channel;

/// One row of the acquisition decimation table: frequencies at or above
/// `min_frequency_hz` are sampled with `factor`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecimationBand {
    pub min_frequency_hz: f64,
    pub factor: u32,
}

/// Decimation bands of the reference oscilloscope, fastest band first.
pub const REFERENCE_DECIMATION_BANDS: [DecimationBand; 6] = [
    DecimationBand { min_frequency_hz: 160_000.0, factor: 1 },
    DecimationBand { min_frequency_hz: 20_000.0, factor: 8 },
    DecimationBand { min_frequency_hz: 2_500.0, factor: 64 },
    DecimationBand { min_frequency_hz: 160.0, factor: 1024 },
    DecimationBand { min_frequency_hz: 20.0, factor: 8192 },
    DecimationBand { min_frequency_hz: 2.5, factor: 65536 },
];

fn reference_bands() -> Vec<DecimationBand> {
    REFERENCE_DECIMATION_BANDS.to_vec()
}

/// Soft edges of the square wave, in generator samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquareTransition {
    /// Edge width at `reference_hz`; scales linearly with frequency.
    pub samples_at_reference: f64,
    pub reference_hz: f64,
    /// Widths at or below this are replaced by `floor_samples`.
    pub floor_threshold: i64,
    pub floor_samples: i64,
    /// Buffer fractions where the falling and rising edges start.
    pub fall_position: f64,
    pub rise_position: f64,
}

impl Default for SquareTransition {
    fn default() -> Self {
        Self {
            samples_at_reference: 300.0,
            reference_hz: 1.0e6,
            floor_threshold: 10,
            floor_samples: 30,
            fall_position: 0.249,
            rise_position: 0.75,
        }
    }
}

/// Every hardware constant of the generator/oscilloscope pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareProfile {
    pub dac_sample_rate_hz: f64,
    pub buffer_length: usize,
    /// DAC counts per volt peak-to-peak.
    pub dac_counts_per_vpp: f64,
    pub dac_max_count: u32,
    /// Added to negative samples to fit the unsigned wire range.
    pub dac_rebias: i32,
    pub dac_offset_counts: i32,
    pub dac_gain_word: i32,
    pub square_transition: SquareTransition,
    pub adc_sample_rate_hz: f64,
    pub adc_bits: u32,
    pub adc_full_scale_volts: f64,
    pub adc_max_samples: usize,
    pub max_frequency_hz: f64,
    pub max_amplitude_vpp: f64,
    pub max_min_periods: u32,
    pub max_measurement_sweeps: u32,
    pub max_averaging_count: u32,
    /// Cap on frequency points in one sweep.
    pub max_sweep_points: usize,
    /// Fixed calibration of the oscilloscope; not read from files.
    #[serde(skip, default = "reference_bands")]
    pub decimation_bands: Vec<DecimationBand>,
}

impl Default for HardwareProfile {
    fn default() -> Self {
        // 125 MS/s generator and scope with 16k buffers, 14-bit converters.
        Self {
            dac_sample_rate_hz: 125.0e6,
            buffer_length: 16 * 1024,
            dac_counts_per_vpp: 4000.0,
            dac_max_count: 8191,
            dac_rebias: 1 << 14,
            dac_offset_counts: -155,
            dac_gain_word: 0x1fff,
            square_transition: SquareTransition::default(),
            adc_sample_rate_hz: 125.0e6,
            adc_bits: 14,
            adc_full_scale_volts: 2.0,
            adc_max_samples: 16 * 1024,
            max_frequency_hz: 62.5e6,
            max_amplitude_vpp: 2.0,
            max_min_periods: 20,
            max_measurement_sweeps: 10,
            max_averaging_count: 10_000,
            max_sweep_points: 100_000,
            decimation_bands: reference_bands(),
        }
    }
}

impl HardwareProfile {
    /// Checks the values a bench file can override.
    pub fn validate(&self) -> Result<(), LcrError> {
        let invalid = |field: &'static str, reason: &str| LcrError::InvalidProfile {
            field,
            reason: reason.to_owned(),
        };
        let positive = |v: f64| v > 0.0 && v.is_finite();
        for (field, value) in [
            ("dac_sample_rate_hz", self.dac_sample_rate_hz),
            ("adc_sample_rate_hz", self.adc_sample_rate_hz),
            ("dac_counts_per_vpp", self.dac_counts_per_vpp),
            ("adc_full_scale_volts", self.adc_full_scale_volts),
            ("max_amplitude_vpp", self.max_amplitude_vpp),
            ("square_transition.reference_hz", self.square_transition.reference_hz),
        ] {
            if !positive(value) {
                return Err(invalid(field, "must be positive and finite"));
            }
        }
        // 16.16 wrap index must fit in 32 bits
        if !(2..=65_536).contains(&self.buffer_length) {
            return Err(invalid("buffer_length", "must lie in [2, 65536] samples"));
        }
        if self.dac_max_count == 0 || i64::from(self.dac_max_count) >= i64::from(self.dac_rebias) {
            return Err(invalid("dac_max_count", "must be positive and below dac_rebias"));
        }
        if !(1..=24).contains(&self.adc_bits) {
            return Err(invalid("adc_bits", "must lie in [1, 24]"));
        }
        if self.adc_max_samples == 0 {
            return Err(invalid("adc_max_samples", "must be positive"));
        }
        if !positive(self.max_frequency_hz) || self.max_frequency_hz > self.dac_sample_rate_hz / 2.0 {
            return Err(invalid(
                "max_frequency_hz",
                "must be positive and at most half the generator rate",
            ));
        }
        for (field, value) in [
            ("max_min_periods", self.max_min_periods),
            ("max_measurement_sweeps", self.max_measurement_sweeps),
            ("max_averaging_count", self.max_averaging_count),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be positive"));
            }
        }
        if self.max_sweep_points == 0 {
            return Err(invalid("max_sweep_points", "must be positive"));
        }
        if self.decimation_bands.is_empty()
            || self
                .decimation_bands
                .iter()
                .any(|b| b.factor == 0 || !positive(b.min_frequency_hz))
        {
            return Err(invalid("decimation_bands", "need positive thresholds and factors"));
        }
        Ok(())
    }

    pub fn lowest_frequency_hz(&self) -> f64 {
        self.decimation_bands
            .iter()
            .map(|b| b.min_frequency_hz)
            .fold(f64::INFINITY, f64::min)
    }

    /// Volts per raw ADC count with the fixture's DC bias applied.
    pub fn adc_volts_per_count(&self, dc_bias_volts: f64) -> f64 {
        (self.adc_full_scale_volts - dc_bias_volts) / f64::from(self.adc_bits).exp2()
    }
}

/// Poll budget for one acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// Wall-clock cap on a single acquisition, on top of `max_attempts`.
    pub deadline_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 150_000,
            delay_ms: 1,
            deadline_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// What a sweep does when an acquisition runs out of retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Return the timeout error; no table is produced.
    #[default]
    AbortSweep,
    /// Leave the pass out of the mean and continue.
    SkipPass,
}

/// How the lock-in products are integrated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationRule {
    /// Sum of |dt * (f[i] - f[i+1]) / 2|; keeps amplitude ratios, drops phase.
    #[default]
    AbsoluteSegments,
    /// Standard signed trapezoid, sum of dt * (f[i] + f[i+1]) / 2.
    Signed,
}

/// Caller-facing sweep settings, as read from a config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub start_frequency_hz: f64,
    pub end_frequency_hz: f64,
    pub step_frequency_hz: f64,
    pub amplitude_vpp: f64,
    pub acquisition_size: usize,
    pub decimation_hint: Option<u32>,
    pub averaging_count: u32,
    /// Repeats at a single frequency; forced to 1 when sweeping frequency.
    pub measurement_sweeps: u32,
    pub min_periods: u32,
    pub shunt_resistance_ohms: f64,
    pub dc_bias_volts: f64,
    pub channel: Channel,
    pub equalization: bool,
    pub shaping: bool,
    /// Run a gated short-circuit calibration before measuring.
    pub calibration: bool,
    pub retry: RetryPolicy,
    pub timeout_policy: TimeoutPolicy,
    pub integration: IntegrationRule,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_frequency_hz: 1000.0,
            end_frequency_hz: 10_000.0,
            step_frequency_hz: 1000.0,
            amplitude_vpp: 2.0,
            acquisition_size: 16 * 1024,
            decimation_hint: None,
            averaging_count: 5,
            measurement_sweeps: 1,
            min_periods: 15,
            shunt_resistance_ohms: 8200.0,
            dc_bias_volts: 0.0,
            channel: Channel::A,
            equalization: false,
            shaping: false,
            calibration: false,
            retry: RetryPolicy::default(),
            timeout_policy: TimeoutPolicy::default(),
            integration: IntegrationRule::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepMode {
    /// Step from start (inclusive) to end (exclusive).
    Frequency,
    /// Measure the start frequency repeatedly.
    Repeated,
}

/// A [`SweepConfig`] that passed every range check.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedSweep {
    config: SweepConfig,
    mode: SweepMode,
    profile: HardwareProfile,
    frequencies: Vec<f64>,
    passes_per_point: u32,
}

impl SweepConfig {
    pub fn validate(mut self, profile: &HardwareProfile) -> Result<ValidatedSweep, LcrError> {
        profile.validate()?;
        let lowest = profile.lowest_frequency_hz();
        let max = profile.max_frequency_hz;
        if !(self.start_frequency_hz >= lowest && self.start_frequency_hz <= max) {
            return Err(LcrError::FrequencyOutOfRange {
                value: self.start_frequency_hz,
                min: lowest,
                max,
            });
        }
        if self.end_frequency_hz.is_nan() {
            return Err(LcrError::FrequencyOutOfRange {
                value: self.end_frequency_hz,
                min: lowest,
                max,
            });
        }
        if self.end_frequency_hz > max {
            warn!(
                "end frequency {} Hz too high, clamped to {} Hz",
                self.end_frequency_hz, max
            );
            self.end_frequency_hz = max;
        }
        if self.end_frequency_hz < self.start_frequency_hz {
            return Err(LcrError::DescendingSweep {
                start: self.start_frequency_hz,
                end: self.end_frequency_hz,
            });
        }
        if !(self.step_frequency_hz > 0.0 && self.step_frequency_hz.is_finite()) {
            return Err(LcrError::InvalidStep(self.step_frequency_hz));
        }
        if !(self.amplitude_vpp >= 0.0 && self.amplitude_vpp <= profile.max_amplitude_vpp) {
            return Err(LcrError::AmplitudeOutOfRange {
                value: self.amplitude_vpp,
                max: profile.max_amplitude_vpp,
            });
        }
        if self.acquisition_size == 0 || self.acquisition_size > profile.adc_max_samples {
            return Err(LcrError::AcquisitionSizeOutOfRange {
                value: self.acquisition_size,
                max: profile.adc_max_samples,
            });
        }
        if let Some(hint) = self.decimation_hint {
            if !profile.decimation_bands.iter().any(|b| b.factor == hint) {
                return Err(LcrError::UnknownDecimation(hint));
            }
        }
        if self.averaging_count == 0 || self.averaging_count > profile.max_averaging_count {
            return Err(LcrError::InvalidAveraging {
                value: self.averaging_count,
                max: profile.max_averaging_count,
            });
        }
        if self.min_periods == 0 || self.min_periods > profile.max_min_periods {
            return Err(LcrError::MinPeriodsOutOfRange {
                value: self.min_periods,
                max: profile.max_min_periods,
            });
        }
        if !(self.shunt_resistance_ohms > 0.0 && self.shunt_resistance_ohms.is_finite()) {
            return Err(LcrError::InvalidShunt(self.shunt_resistance_ohms));
        }
        if !(self.dc_bias_volts >= 0.0 && self.dc_bias_volts < profile.adc_full_scale_volts) {
            return Err(LcrError::DcBiasOutOfRange {
                value: self.dc_bias_volts,
                full_scale: profile.adc_full_scale_volts,
            });
        }
        if self.measurement_sweeps > profile.max_measurement_sweeps {
            warn!(
                "measurement sweeps {} too high, clamped to {}",
                self.measurement_sweeps, profile.max_measurement_sweeps
            );
            self.measurement_sweeps = profile.max_measurement_sweeps;
        }
        self.measurement_sweeps = self.measurement_sweeps.max(1);
        let mode = if self.end_frequency_hz > self.start_frequency_hz {
            if self.measurement_sweeps > 1 {
                info!("frequency sweep requested, measurement sweeps reset to 1");
                self.measurement_sweeps = 1;
            }
            SweepMode::Frequency
        } else {
            SweepMode::Repeated
        };
        let frequencies = match mode {
            SweepMode::Repeated => vec![self.start_frequency_hz],
            SweepMode::Frequency => self.frequency_points(profile.max_sweep_points)?,
        };
        let passes_per_point = self
            .averaging_count
            .checked_mul(self.measurement_sweeps)
            .ok_or(LcrError::InvalidAveraging {
                value: self.averaging_count,
                max: profile.max_averaging_count,
            })?;
        Ok(ValidatedSweep {
            config: self,
            mode,
            profile: profile.clone(),
            frequencies,
            passes_per_point,
        })
    }

    /// `start + k * step` below `end`, strictly ascending and at most `max_points` long.
    fn frequency_points(&self, max_points: usize) -> Result<Vec<f64>, LcrError> {
        let (start, end, step) = (
            self.start_frequency_hz,
            self.end_frequency_hz,
            self.step_frequency_hz,
        );
        let count = ((end - start) / step).ceil();
        if start + step <= start || !(count >= 1.0 && count <= max_points as f64) {
            return Err(LcrError::InvalidStep(step));
        }
        let points: Vec<f64> = (0..count as usize)
            .map(|k| start + k as f64 * step)
            .take_while(|f| *f < end)
            .collect();
        if points.is_empty() || points.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LcrError::InvalidStep(step));
        }
        Ok(points)
    }
}

impl ValidatedSweep {
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn mode(&self) -> SweepMode {
        self.mode
    }

    /// Profile the sweep was checked against.
    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Frequencies to visit, strictly ascending.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Acquisitions averaged into each frequency result.
    pub fn passes_per_point(&self) -> u32 {
        self.passes_per_point
    }
}
