//! Software lock-in: mix a trace with sin/cos references at the excitation
//! frequency and integrate the products over the acquisition window.
//!
//! Integration runs over an explicit time vector. Two rules are available:
//!
//! - [`IntegrationRule::AbsoluteSegments`] sums `|dt * (f[i] - f[i+1]) / 2|`.
//!   Every segment contributes a non-negative area whatever its sign, so the
//!   result measures how much the product moves rather than its signed area.
//!   Amplitude ratios between two traces at the same frequency survive; the
//!   in-phase/quadrature split and therefore the phase do not.
//! - [`IntegrationRule::Signed`] is the usual trapezoid `dt * (f[i] + f[i+1]) / 2`.
use crate::config::IntegrationRule;
/// In-phase (`x`, sine reference) and quadrature (`y`, cosine reference) integrals.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DemodulatedComponents {
    pub x: f64,
    pub y: f64,
}
impl DemodulatedComponents {
    pub fn amplitude(&self) -> f64 {
        self.x.hypot(self.y)
    }
    /// Radians.
    pub fn phase(&self) -> f64 {
        self.y.atan2(self.x)
    }
}
/// Sum of `|(t[i+1] - t[i]) * (f[i] - f[i+1]) / 2|` over consecutive pairs.
pub fn trapezoid_abs(values: &[f64], times: &[f64]) -> f64 {
    values
        .windows(2)
        .zip(times.windows(2))
        .map(|(f, t)| ((t[1] - t[0]) * (f[0] - f[1]) / 2.0).abs())
        .sum()
}
/// Sum of `(t[i+1] - t[i]) * (f[i] + f[i+1]) / 2` over consecutive pairs.
pub fn trapezoid(values: &[f64], times: &[f64]) -> f64 {
    values
        .windows(2)
        .zip(times.windows(2))
        .map(|(f, t)| (t[1] - t[0]) * (f[0] + f[1]) / 2.0)
        .sum()
}
fn integrate(rule: IntegrationRule, values: &[f64], times: &[f64]) -> f64 {
    match rule {
        IntegrationRule::AbsoluteSegments => trapezoid_abs(values, times),
        IntegrationRule::Signed => trapezoid(values, times),
    }
}
/// Reference sequences and time axis for one window length.
pub struct LockInDemodulator {
    rule: IntegrationRule,
    times: Vec<f64>,
    sin_ref: Vec<f64>,
    cos_ref: Vec<f64>,
}
impl LockInDemodulator {
    pub fn new(len: usize, angular_frequency: f64, sample_period_s: f64, rule: IntegrationRule) -> Self {
        let times: Vec<f64> = (0..len).map(|i| i as f64 * sample_period_s).collect();
        let sin_ref = times.iter().map(|t| (t * angular_frequency).sin()).collect();
        let cos_ref = times.iter().map(|t| (t * angular_frequency).cos()).collect();
        Self {
            rule,
            times,
            sin_ref,
            cos_ref,
        }
    }
    pub fn len(&self) -> usize {
        self.times.len()
    }
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
    /// Samples past the reference length are ignored.
    pub fn components(&self, trace: &[f64]) -> DemodulatedComponents {
        let len = trace.len().min(self.len());
        let mixed = |reference: &[f64]| -> Vec<f64> {
            trace[..len]
                .iter()
                .zip(&reference[..len])
                .map(|(v, r)| v * r)
                .collect()
        };
        let times = &self.times[..len];
        DemodulatedComponents {
            x: integrate(self.rule, &mixed(&self.sin_ref), times),
            y: integrate(self.rule, &mixed(&self.cos_ref), times),
        }
    }
}
/// Demodulates the voltage and current traces of one pass.
pub fn demodulate(
    voltage: &[f64],
    current: &[f64],
    angular_frequency: f64,
    sample_period_s: f64,
    rule: IntegrationRule,
) -> (DemodulatedComponents, DemodulatedComponents) {
    let len = voltage.len().max(current.len());
    let lockin = LockInDemodulator::new(len, angular_frequency, sample_period_s, rule);
    (lockin.components(voltage), lockin.components(current))
}
