use log::debug;
use crate::config::{DecimationBand, HardwareProfile};
use crate::drivers::LcrError;
/// Acquisition settings derived for one frequency point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcquisitionPlan {
    /// Index into the decimation table, 0 is the fastest band.
    pub decimation_bucket: usize,
    pub decimation_factor: u32,
    pub sample_count: usize,
    /// Seconds between acquired samples.
    pub sample_period_s: f64,
}
impl AcquisitionPlan {
    /// Duration covered by `sample_count` samples.
    pub fn window_s(&self) -> f64 {
        self.sample_count as f64 * self.sample_period_s
    }
}
/// Picks the decimation band for `frequency_hz` and sizes the window so it
/// spans `min_periods` signal periods.
pub fn plan(
    frequency_hz: f64,
    min_periods: u32,
    sample_rate_hz: f64,
    bands: &[DecimationBand],
) -> Result<AcquisitionPlan, LcrError> {
    let (bucket, band) = bands
        .iter()
        .enumerate()
        .find(|(_, band)| frequency_hz >= band.min_frequency_hz)
        .ok_or_else(|| LcrError::FrequencyBelowRange {
            frequency_hz,
            lowest_hz: bands
                .iter()
                .map(|b| b.min_frequency_hz)
                .fold(f64::INFINITY, f64::min),
        })?;
    let factor = f64::from(band.factor);
    let sample_count =
        (f64::from(min_periods) * sample_rate_hz / (frequency_hz * factor)).round() as usize;
    let plan = AcquisitionPlan {
        decimation_bucket: bucket,
        decimation_factor: band.factor,
        sample_count,
        sample_period_s: factor / sample_rate_hz,
    };
    debug!(
        "plan @ {frequency_hz} Hz: bucket {bucket}, dec {}, N = {}, T = {:e} s",
        plan.decimation_factor, plan.sample_count, plan.sample_period_s
    );
    Ok(plan)
}
/// [`plan`] bound to a hardware profile.
pub struct SamplingPlanner<'a> {
    profile: &'a HardwareProfile,
}
impl<'a> SamplingPlanner<'a> {
    pub fn new(profile: &'a HardwareProfile) -> Self {
        Self { profile }
    }
    pub fn plan(&self, frequency_hz: f64, min_periods: u32) -> Result<AcquisitionPlan, LcrError> {
        plan(
            frequency_hz,
            min_periods,
            self.profile.adc_sample_rate_hz,
            &self.profile.decimation_bands,
        )
    }
}
