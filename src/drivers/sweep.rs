use std::f64::consts::PI;
use log::{debug, info, warn};
use crate::config::{TimeoutPolicy, ValidatedSweep};
use crate::drivers::buffer::{FixtureScale, LoadTraces};
use crate::drivers::impedance::estimate;
use crate::drivers::lockin::LockInDemodulator;
use crate::drivers::planner::SamplingPlanner;
use crate::drivers::source::{
    acquire_with_retry, AcquisitionDevice, AcquisitionSettings, CancelToken, OutputDevice,
};
use crate::drivers::synth::WaveformSynthesizer;
use crate::drivers::LcrError;
use crate::types::{FrequencyResult, ImpedancePoint, SignalSpec, SweepResultTable};
/// Operator acknowledgment required before a calibration run.
pub trait CalibrationGate {
    fn confirm(&mut self, prompt: &str) -> bool;
}
impl<F: FnMut(&str) -> bool> CalibrationGate for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}
/// Drives generator and scope through a frequency sweep, one point at a time.
///
/// Hardware constants come from the profile each [`ValidatedSweep`] was checked against.
pub struct SweepController<O: OutputDevice, A: AcquisitionDevice> {
    output: O,
    acquisition: A,
    cancel: CancelToken,
    initialized: bool,
}
impl<O: OutputDevice, A: AcquisitionDevice> SweepController<O, A> {
    pub fn new(output: O, acquisition: A) -> Self {
        Self {
            output,
            acquisition,
            cancel: CancelToken::new(),
            initialized: false,
        }
    }
    /// Token that aborts the running sweep at the next poll or pass.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
    pub fn into_devices(self) -> (O, A) {
        (self.output, self.acquisition)
    }
    pub fn init(&mut self) -> Result<(), LcrError> {
        self.output
            .init()
            .map_err(|e| init_failure("generator", e))?;
        self.acquisition
            .init()
            .map_err(|e| init_failure("oscilloscope", e))?;
        self.initialized = true;
        info!("generator and oscilloscope initialized");
        Ok(())
    }
    /// Asks `gate` for a short on the fixture, then sweeps it as a baseline.
    pub fn run_calibration<G: CalibrationGate + ?Sized>(
        &mut self,
        gate: &mut G,
        sweep: &ValidatedSweep,
    ) -> Result<SweepResultTable, LcrError> {
        if !gate.confirm("Short connection calibration. continue? [y|n]") {
            return Err(LcrError::CalibrationDeclined);
        }
        info!("short-circuit calibration initiated");
        self.run_sweep(sweep)
    }
    pub fn run_sweep(&mut self, sweep: &ValidatedSweep) -> Result<SweepResultTable, LcrError> {
        if !self.initialized {
            self.init()?;
        }
        let config = sweep.config();
        let frequencies = sweep.frequencies();
        info!(
            "sweep {} -> {} Hz, {} point(s), {} pass(es) each, Rs = {} ohm",
            config.start_frequency_hz,
            config.end_frequency_hz,
            frequencies.len(),
            sweep.passes_per_point(),
            config.shunt_resistance_ohms
        );
        if let Some(hint) = config.decimation_hint {
            debug!("decimation hint {hint} ignored, bands are chosen per frequency");
        }
        let mut table = SweepResultTable::new();
        for &frequency_hz in frequencies {
            if self.cancel.is_cancelled() {
                return Err(LcrError::Cancelled);
            }
            match self.measure_point(sweep, frequency_hz)? {
                Some(result) => table.push(result),
                None => table.mark_skipped(frequency_hz),
            }
        }
        info!(
            "sweep finished: {} result(s), {} skipped",
            table.len(),
            table.skipped().len()
        );
        Ok(table)
    }
    fn drive_output(&mut self, sweep: &ValidatedSweep, frequency_hz: f64) -> Result<(), LcrError> {
        let config = sweep.config();
        let waveform = WaveformSynthesizer::new(sweep.profile())
            .synthesize(&SignalSpec::sine(config.amplitude_vpp, frequency_hz));
        self.output.configure(config.channel, &waveform.params)?;
        self.output.load(config.channel, &waveform.buffer)?;
        self.output.enable(config.channel.mask())
    }
    /// `Ok(None)` when every pass timed out under [`TimeoutPolicy::SkipPass`].
    fn measure_point(
        &mut self,
        sweep: &ValidatedSweep,
        frequency_hz: f64,
    ) -> Result<Option<FrequencyResult>, LcrError> {
        let config = sweep.config();
        let profile = sweep.profile();
        self.drive_output(sweep, frequency_hz)?;
        let plan = SamplingPlanner::new(profile).plan(frequency_hz, config.min_periods)?;
        self.acquisition.configure(&AcquisitionSettings::for_plan(
            &plan,
            config.equalization,
            config.shaping,
        ))?;
        let scale = FixtureScale::new(
            profile.adc_volts_per_count(config.dc_bias_volts),
            config.shunt_resistance_ohms,
        );
        let requested = plan.sample_count.min(config.acquisition_size);
        let lockin = LockInDemodulator::new(
            requested,
            2.0 * PI * frequency_hz,
            plan.sample_period_s,
            config.integration,
        );
        let passes = sweep.passes_per_point();
        let mut points: Vec<ImpedancePoint> = Vec::with_capacity(passes as usize);
        for pass in 0..passes {
            if self.cancel.is_cancelled() {
                return Err(LcrError::Cancelled);
            }
            let trace = match acquire_with_retry(
                &mut self.acquisition,
                &config.retry,
                &self.cancel,
                frequency_hz,
            ) {
                Ok(trace) => trace,
                Err(err @ LcrError::AcquisitionTimeout { .. })
                    if config.timeout_policy == TimeoutPolicy::SkipPass =>
                {
                    warn!("pass {pass} at {frequency_hz} Hz left out: {err}");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let traces = LoadTraces::from_acquired(&trace, &scale, requested)?;
            let voltage = lockin.components(&traces.voltage);
            let current = lockin.components(&traces.current);
            let point = estimate(frequency_hz, &voltage, &current)?;
            debug!(
                "pass {pass} @ {frequency_hz} Hz: |V| = {:e}, |I| = {:e}, Z = {:.3} {:+.3}j ohm ({:.2} deg)",
                voltage.amplitude(),
                current.amplitude(),
                point.real_ohms,
                point.imag_ohms,
                point.phase_deg
            );
            points.push(point);
        }
        let result = FrequencyResult::from_points(frequency_hz, &points);
        match &result {
            Some(r) => info!(
                "{frequency_hz} Hz: Z = {:.3} {:+.3}j ohm over {} pass(es)",
                r.mean_real_ohms, r.mean_imag_ohms, r.passes
            ),
            None => warn!("no pass at {frequency_hz} Hz was acquired; point skipped"),
        }
        Ok(result)
    }
}
fn init_failure(device: &'static str, err: LcrError) -> LcrError {
    match err {
        LcrError::DeviceInit { .. } => err,
        other => LcrError::DeviceInit {
            device,
            reason: other.to_string(),
        },
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HardwareProfile, IntegrationRule, RetryPolicy, SweepConfig};
    use crate::drivers::simulator::{LoadModel, SimulatedBench, SimulatedGenerator, SimulatedScope};
    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            delay_ms: 0,
            deadline_ms: None,
        }
    }
    fn sweep(config: SweepConfig) -> ValidatedSweep {
        config.validate(&HardwareProfile::default()).unwrap()
    }
    fn bench(load: LoadModel) -> SimulatedBench {
        SimulatedBench::new(HardwareProfile::default(), load, 8200.0)
    }
    fn controller(bench: &SimulatedBench) -> SweepController<SimulatedGenerator, SimulatedScope> {
        SweepController::new(bench.generator(), bench.scope())
    }
    #[test]
    fn reference_sweep_yields_nine_ascending_points() {
        let bench = bench(LoadModel::resistor(4700.0));
        let table = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                amplitude_vpp: 2.0,
                start_frequency_hz: 1000.0,
                end_frequency_hz: 10_000.0,
                step_frequency_hz: 1000.0,
                shunt_resistance_ohms: 8200.0,
                averaging_count: 5,
                ..SweepConfig::default()
            }))
            .unwrap();
        assert_eq!(table.len(), 9);
        let freqs: Vec<f64> = table.iter().map(|r| r.frequency_hz).collect();
        assert_eq!(freqs, (1..=9).map(|k| k as f64 * 1000.0).collect::<Vec<_>>());
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
        assert!(table.iter().all(|r| r.passes == 5));
        assert_eq!(bench.acquisitions(), 45);
        assert_eq!(bench.reloads(), 9);
    }
    #[test]
    fn resistor_reads_its_value_with_reference_integration() {
        let bench = bench(LoadModel::resistor(4700.0));
        let table = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                end_frequency_hz: 4000.0,
                averaging_count: 2,
                ..SweepConfig::default()
            }))
            .unwrap();
        for r in table.iter() {
            assert!(
                (r.mean_real_ohms - 4700.0).abs() / 4700.0 < 0.02,
                "{} Hz: {}",
                r.frequency_hz,
                r.mean_real_ohms
            );
            assert!(r.mean_imag_ohms.abs() < 0.02 * 4700.0);
        }
    }
    #[test]
    fn series_rc_reads_reactance_with_signed_integration() {
        let load = LoadModel::series_rc(1000.0, 1.0e-7);
        let bench = bench(load).with_noise(1.0, 7);
        let table = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                start_frequency_hz: 500.0,
                end_frequency_hz: 5000.0,
                step_frequency_hz: 1500.0,
                averaging_count: 3,
                integration: IntegrationRule::Signed,
                ..SweepConfig::default()
            }))
            .unwrap();
        assert_eq!(table.len(), 3);
        for r in table.iter() {
            let z = load.impedance(r.frequency_hz);
            assert!(
                (r.magnitude_ohms() - z.norm()).abs() / z.norm() < 0.02,
                "{} Hz: |Z| {} vs {}",
                r.frequency_hz,
                r.magnitude_ohms(),
                z.norm()
            );
            assert!(
                (r.phase_deg() - z.arg().to_degrees()).abs() < 2.0,
                "{} Hz: phase {} vs {}",
                r.frequency_hz,
                r.phase_deg(),
                z.arg().to_degrees()
            );
        }
    }
    #[test]
    fn scope_decimation_follows_the_plan() {
        let bench = bench(LoadModel::resistor(1000.0));
        controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                start_frequency_hz: 25_000.0,
                end_frequency_hz: 25_000.0,
                averaging_count: 1,
                shaping: true,
                ..SweepConfig::default()
            }))
            .unwrap();
        let settings = bench.last_settings().unwrap();
        assert_eq!(settings.decimation_index, 1);
        assert_eq!(settings.decimation_factor, 8);
        assert!(settings.shaping);
        assert!(!settings.equalization);
    }
    #[test]
    fn repeated_mode_averages_all_passes_into_one_result() {
        let bench = bench(LoadModel::resistor(2200.0));
        let table = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                start_frequency_hz: 3000.0,
                end_frequency_hz: 3000.0,
                measurement_sweeps: 3,
                averaging_count: 2,
                ..SweepConfig::default()
            }))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].passes, 6);
        assert_eq!(bench.acquisitions(), 6);
    }
    #[test]
    fn timeout_aborts_the_sweep_by_default() {
        let bench = bench(LoadModel::resistor(1000.0)).never_triggering();
        let err = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                retry: quick_retry(),
                ..SweepConfig::default()
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            LcrError::AcquisitionTimeout { frequency_hz, attempts: 4 } if frequency_hz == 1000.0
        ));
    }
    #[test]
    fn skip_policy_drops_points_without_data() {
        let bench = bench(LoadModel::resistor(1000.0)).never_triggering();
        let table = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                end_frequency_hz: 3000.0,
                retry: quick_retry(),
                timeout_policy: TimeoutPolicy::SkipPass,
                ..SweepConfig::default()
            }))
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.skipped(), &[1000.0, 2000.0]);
    }
    #[test]
    fn slow_trigger_is_absorbed_by_retries() {
        let bench = bench(LoadModel::resistor(1000.0)).with_not_ready_polls(3);
        let table = controller(&bench)
            .run_sweep(&sweep(SweepConfig {
                end_frequency_hz: 2000.0,
                averaging_count: 2,
                retry: quick_retry(),
                ..SweepConfig::default()
            }))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].passes, 2);
    }
    #[test]
    fn cancelled_sweep_stops() {
        let bench = bench(LoadModel::resistor(1000.0));
        let mut controller = controller(&bench);
        controller.cancel_token().cancel();
        let err = controller.run_sweep(&sweep(SweepConfig::default())).unwrap_err();
        assert!(matches!(err, LcrError::Cancelled));
        assert_eq!(bench.acquisitions(), 0);
    }
    #[test]
    fn init_failure_aborts_before_any_work() {
        let bench = bench(LoadModel::resistor(1000.0)).failing_init();
        let err = controller(&bench)
            .run_sweep(&sweep(SweepConfig::default()))
            .unwrap_err();
        assert!(matches!(err, LcrError::DeviceInit { device: "generator", .. }));
        assert_eq!(bench.reloads(), 0);
    }
    #[test]
    fn declined_calibration_runs_nothing() {
        let bench = bench(LoadModel::short());
        let mut gate = |_: &str| false;
        let err = controller(&bench)
            .run_calibration(&mut gate, &sweep(SweepConfig::default()))
            .unwrap_err();
        assert!(matches!(err, LcrError::CalibrationDeclined));
        assert_eq!(bench.acquisitions(), 0);
    }
    #[test]
    fn short_calibration_corrects_a_measurement() {
        let bench = bench(LoadModel::short());
        let config = sweep(SweepConfig {
            end_frequency_hz: 3000.0,
            averaging_count: 2,
            ..SweepConfig::default()
        });
        let mut controller = controller(&bench);
        let mut prompts = Vec::new();
        let mut gate = |prompt: &str| {
            prompts.push(prompt.to_owned());
            true
        };
        let short = controller.run_calibration(&mut gate, &config).unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(short.len(), 2);
        for r in short.iter() {
            assert!(r.magnitude_ohms() < 5.0, "short reads {}", r.magnitude_ohms());
        }
        bench.set_load(LoadModel::resistor(3300.0));
        let measured = controller.run_sweep(&config).unwrap();
        let corrected = measured.corrected_by(&short).unwrap();
        for r in corrected.iter() {
            assert!((r.mean_real_ohms - 3300.0).abs() / 3300.0 < 0.02);
        }
    }
    #[test]
    fn devices_can_be_borrowed() {
        let bench = bench(LoadModel::resistor(1000.0));
        let mut generator = bench.generator();
        let mut scope = bench.scope();
        let mut controller = SweepController::new(&mut generator, &mut scope);
        let table = controller
            .run_sweep(&sweep(SweepConfig {
                end_frequency_hz: 2000.0,
                averaging_count: 1,
                ..SweepConfig::default()
            }))
            .unwrap();
        assert_eq!(table.len(), 1);
        let (_generator, _scope) = controller.into_devices();
    }
    #[test]
    fn hardware_constants_follow_the_validated_sweep() {
        let profile = HardwareProfile {
            buffer_length: 8192,
            ..HardwareProfile::default()
        };
        let bench = SimulatedBench::new(profile.clone(), LoadModel::resistor(4700.0), 8200.0);
        let config = SweepConfig {
            end_frequency_hz: 3000.0,
            averaging_count: 2,
            ..SweepConfig::default()
        }
        .validate(&profile)
        .unwrap();
        let table = controller(&bench).run_sweep(&config).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(bench.reloads(), 2);
        for r in table.iter() {
            assert!((r.mean_real_ohms - 4700.0).abs() / 4700.0 < 0.02);
        }
    }
    #[test]
    fn lost_trigger_is_skipped_and_recovers() {
        let bench = bench(LoadModel::resistor(1000.0));
        let config = sweep(SweepConfig {
            end_frequency_hz: 3000.0,
            averaging_count: 2,
            retry: quick_retry(),
            timeout_policy: TimeoutPolicy::SkipPass,
            ..SweepConfig::default()
        });
        let mut controller = controller(&bench);
        assert_eq!(controller.run_sweep(&config).unwrap().len(), 2);
        bench.set_never_trigger(true);
        let dark = controller.run_sweep(&config).unwrap();
        assert!(dark.is_empty());
        assert_eq!(dark.skipped(), &[1000.0, 2000.0]);
        bench.set_never_trigger(false);
        let table = controller.run_sweep(&config).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.skipped().is_empty());
        assert_eq!(bench.acquisitions(), 8);
    }
}
