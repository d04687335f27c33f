// src/types.rs
use serde::{Deserialize, Serialize};
use crate::drivers::LcrError;

/// Excitation waveform shapes the generator can replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalShape {
    Sine,
    Square,
    Triangle,
    /// Exponential chirp from the start to the end frequency over one buffer.
    Sweep,
}

/// What the generator should play: shape, peak-to-peak amplitude and frequency.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
    pub shape: SignalShape,
    pub amplitude_vpp: f64,
    pub start_frequency_hz: f64,
    /// Only read for [`SignalShape::Sweep`].
    pub end_frequency_hz: f64,
}

impl SignalSpec {
    pub fn sine(amplitude_vpp: f64, frequency_hz: f64) -> Self {
        Self {
            shape: SignalShape::Sine,
            amplitude_vpp,
            start_frequency_hz: frequency_hz,
            end_frequency_hz: frequency_hz,
        }
    }
}

/// Generator output channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    #[default]
    A,
    B,
}

impl Channel {
    /// Bit used in the enable mask handed to the output device.
    pub fn mask(self) -> u8 {
        match self {
            Channel::A => 0b01,
            Channel::B => 0b10,
        }
    }
}

/// One lock-in impedance estimate from a single acquisition pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImpedancePoint {
    pub frequency_hz: f64,
    pub real_ohms: f64,
    pub imag_ohms: f64,
    pub magnitude_ohms: f64,
    /// Normalized to (-180, 180].
    pub phase_deg: f64,
}

/// Mean impedance over all passes that succeeded at one frequency.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResult {
    pub frequency_hz: f64,
    pub mean_real_ohms: f64,
    pub mean_imag_ohms: f64,
    pub passes: usize,
}

impl FrequencyResult {
    pub fn from_points(frequency_hz: f64, points: &[ImpedancePoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let count = points.len() as f64;
        let mean_real_ohms = points.iter().map(|p| p.real_ohms).sum::<f64>() / count;
        let mean_imag_ohms = points.iter().map(|p| p.imag_ohms).sum::<f64>() / count;
        Some(Self {
            frequency_hz,
            mean_real_ohms,
            mean_imag_ohms,
            passes: points.len(),
        })
    }

    pub fn magnitude_ohms(&self) -> f64 {
        self.mean_real_ohms.hypot(self.mean_imag_ohms)
    }

    pub fn phase_deg(&self) -> f64 {
        self.mean_imag_ohms.atan2(self.mean_real_ohms).to_degrees()
    }
}

/// Ordered results of one sweep, ascending in frequency.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepResultTable {
    entries: Vec<FrequencyResult>,
    /// Frequencies where every pass timed out under the skip policy.
    skipped: Vec<f64>,
}

impl SweepResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, result: FrequencyResult) {
        debug_assert!(self
            .entries
            .last()
            .map_or(true, |last| last.frequency_hz < result.frequency_hz));
        self.entries.push(result);
    }

    pub(crate) fn mark_skipped(&mut self, frequency_hz: f64) {
        self.skipped.push(frequency_hz);
    }

    pub fn entries(&self) -> &[FrequencyResult] {
        &self.entries
    }

    pub fn skipped(&self) -> &[f64] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrequencyResult> {
        self.entries.iter()
    }

    /// Looks up the entry measured at `frequency_hz` (relative tolerance 1e-9).
    pub fn at(&self, frequency_hz: f64) -> Option<&FrequencyResult> {
        let tolerance = frequency_hz.abs().max(1.0) * 1e-9;
        self.entries
            .iter()
            .find(|e| (e.frequency_hz - frequency_hz).abs() <= tolerance)
    }

    /// Subtracts a short-circuit baseline, frequency by frequency.
    ///
    /// Every entry must have a baseline entry at the same frequency.
    pub fn corrected_by(&self, short: &SweepResultTable) -> Result<SweepResultTable, LcrError> {
        let mut corrected = SweepResultTable {
            entries: Vec::with_capacity(self.entries.len()),
            skipped: self.skipped.clone(),
        };
        for entry in &self.entries {
            let baseline = short
                .at(entry.frequency_hz)
                .ok_or(LcrError::MissingCalibrationPoint {
                    frequency_hz: entry.frequency_hz,
                })?;
            corrected.entries.push(FrequencyResult {
                mean_real_ohms: entry.mean_real_ohms - baseline.mean_real_ohms,
                mean_imag_ohms: entry.mean_imag_ohms - baseline.mean_imag_ohms,
                ..*entry
            });
        }
        Ok(corrected)
    }
}
