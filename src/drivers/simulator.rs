use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use crate::config::HardwareProfile;
use crate::drivers::source::{AcquiredTrace, AcquisitionDevice, AcquisitionSettings, OutputDevice};
use crate::drivers::synth::{DeviceWaveformParams, SampleBuffer};
use crate::drivers::LcrError;
use crate::types::Channel;
/// Series R-L-C load; missing parts are shorted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModel {
    pub resistance_ohms: f64,
    pub inductance_henries: Option<f64>,
    pub capacitance_farads: Option<f64>,
}
impl LoadModel {
    pub fn short() -> Self {
        Self::default()
    }
    pub fn resistor(resistance_ohms: f64) -> Self {
        Self {
            resistance_ohms,
            ..Self::default()
        }
    }
    pub fn series_rc(resistance_ohms: f64, capacitance_farads: f64) -> Self {
        Self {
            resistance_ohms,
            capacitance_farads: Some(capacitance_farads),
            ..Self::default()
        }
    }
    pub fn impedance(&self, frequency_hz: f64) -> Complex64 {
        let w = 2.0 * PI * frequency_hz;
        let mut z = Complex64::new(self.resistance_ohms, 0.0);
        if let Some(l) = self.inductance_henries {
            z += Complex64::new(0.0, w * l);
        }
        if let Some(c) = self.capacitance_farads {
            z += Complex64::new(0.0, -1.0 / (w * c));
        }
        z
    }
}
#[derive(Clone, Default)]
struct GeneratorChannel {
    params: Option<DeviceWaveformParams>,
    buffer: Option<SampleBuffer>,
}
struct BenchState {
    profile: HardwareProfile,
    load: LoadModel,
    shunt_ohms: f64,
    dc_bias_volts: f64,
    generator: [GeneratorChannel; 2],
    enabled_mask: u8,
    settings: Option<AcquisitionSettings>,
    not_ready_polls: u32,
    pending_polls: u32,
    never_trigger: bool,
    fail_init: bool,
    noise_counts: f64,
    rng: StdRng,
    acquisitions: usize,
    reloads: usize,
}
fn slot(channel: Channel) -> usize {
    match channel {
        Channel::A => 0,
        Channel::B => 1,
    }
}
impl BenchState {
    /// Replays generator memory like the DAC does and renders both probes.
    fn render(&mut self, settings: &AcquisitionSettings) -> AcquiredTrace {
        let p = &self.profile;
        let len = p.adc_max_samples;
        let active = [Channel::A, Channel::B]
            .into_iter()
            .find(|ch| self.enabled_mask & ch.mask() != 0)
            .and_then(|ch| {
                let gen = &self.generator[slot(ch)];
                Some((gen.params?, gen.buffer.clone()?))
            });
        let Some((params, buffer)) = active else {
            return AcquiredTrace {
                channels: vec![vec![0.0; len]; 2],
            };
        };
        let n = buffer.len() as f64;
        let frequency_hz = f64::from(params.step_increment) / 65536.0 * p.dac_sample_rate_hz / n;
        let z = self.load.impedance(frequency_hz);
        let h = Complex64::new(self.shunt_ohms, 0.0) / (z + self.shunt_ohms);
        let shift = h.arg() / (2.0 * PI) * n;
        let volts_per_dac_count = 1.0 / (2.0 * p.dac_counts_per_vpp);
        let volts_per_adc_count = p.adc_volts_per_count(self.dc_bias_volts);
        let adc_limit = (f64::from(p.adc_bits) - 1.0).exp2();
        let dac_limit = p.dac_max_count as i32;
        let rebias = p.dac_rebias;
        let decode = |pos: f64| -> f64 {
            let idx = pos.rem_euclid(n) as usize % buffer.len();
            let raw = buffer.samples()[idx];
            let signed = if raw > dac_limit { raw - rebias } else { raw };
            f64::from(signed) * volts_per_dac_count
        };
        let period = f64::from(settings.decimation_factor) / p.adc_sample_rate_hz;
        let advance = p.dac_sample_rate_hz * f64::from(params.step_increment) / 65536.0;
        let mut excitation = Vec::with_capacity(len);
        let mut shunt = Vec::with_capacity(len);
        for k in 0..len {
            let pos = k as f64 * period * advance;
            let v_exc = decode(pos);
            let v_shunt = h.norm() * decode(pos + shift);
            for (volts, out) in [(v_exc, &mut excitation), (v_shunt, &mut shunt)] {
                let noise = if self.noise_counts > 0.0 {
                    self.rng.gen_range(-self.noise_counts..=self.noise_counts)
                } else {
                    0.0
                };
                let counts = (volts / volts_per_adc_count + noise)
                    .round()
                    .clamp(-adc_limit, adc_limit - 1.0);
                out.push(counts as f32);
            }
        }
        AcquiredTrace {
            channels: vec![excitation, shunt],
        }
    }
}
/// In-memory generator + scope pair with a load between them.
///
/// Probe 0 sees the generator output, probe 1 the shunt in series with the load.
#[derive(Clone)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}
impl SimulatedBench {
    pub fn new(profile: HardwareProfile, load: LoadModel, shunt_ohms: f64) -> Self {
        let state = BenchState {
            profile,
            load,
            shunt_ohms,
            dc_bias_volts: 0.0,
            generator: Default::default(),
            enabled_mask: 0,
            settings: None,
            not_ready_polls: 0,
            pending_polls: 0,
            never_trigger: false,
            fail_init: false,
            noise_counts: 0.0,
            rng: StdRng::seed_from_u64(0),
            acquisitions: 0,
            reloads: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
    /// Bench state is plain data, so a panic in another handle leaves it usable.
    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
    fn update(&self, f: impl FnOnce(&mut BenchState)) {
        f(&mut self.lock());
    }
    /// Uniform noise of +/- `counts` on every ADC sample.
    pub fn with_noise(self, counts: f64, seed: u64) -> Self {
        self.update(|s| {
            s.noise_counts = counts;
            s.rng = StdRng::seed_from_u64(seed);
        });
        self
    }
    /// Number of empty polls before each acquisition triggers.
    pub fn with_not_ready_polls(self, polls: u32) -> Self {
        self.update(|s| {
            s.not_ready_polls = polls;
            s.pending_polls = polls;
        });
        self
    }
    pub fn with_dc_bias(self, volts: f64) -> Self {
        self.update(|s| s.dc_bias_volts = volts);
        self
    }
    pub fn never_triggering(self) -> Self {
        self.update(|s| s.never_trigger = true);
        self
    }
    pub fn failing_init(self) -> Self {
        self.update(|s| s.fail_init = true);
        self
    }
    pub fn set_load(&self, load: LoadModel) {
        self.update(|s| s.load = load);
    }
    pub fn set_never_trigger(&self, never: bool) {
        self.update(|s| s.never_trigger = never);
    }
    pub fn generator(&self) -> SimulatedGenerator {
        SimulatedGenerator {
            bench: self.clone(),
        }
    }
    pub fn scope(&self) -> SimulatedScope {
        SimulatedScope {
            bench: self.clone(),
        }
    }
    pub fn acquisitions(&self) -> usize {
        self.lock().acquisitions
    }
    pub fn reloads(&self) -> usize {
        self.lock().reloads
    }
    pub fn last_settings(&self) -> Option<AcquisitionSettings> {
        self.lock().settings
    }
}
pub struct SimulatedGenerator {
    bench: SimulatedBench,
}
impl OutputDevice for SimulatedGenerator {
    fn init(&mut self) -> Result<(), LcrError> {
        if self.bench.lock().fail_init {
            return Err(LcrError::DeviceInit {
                device: "generator",
                reason: "simulated init failure".into(),
            });
        }
        Ok(())
    }
    fn configure(&mut self, channel: Channel, params: &DeviceWaveformParams) -> Result<(), LcrError> {
        self.bench.lock().generator[slot(channel)].params = Some(*params);
        Ok(())
    }
    fn load(&mut self, channel: Channel, buffer: &SampleBuffer) -> Result<(), LcrError> {
        let mut state = self.bench.lock();
        if buffer.len() != state.profile.buffer_length {
            return Err(LcrError::Device(format!(
                "buffer of {} samples, generator memory holds {}",
                buffer.len(),
                state.profile.buffer_length
            )));
        }
        state.generator[slot(channel)].buffer = Some(buffer.clone());
        state.reloads += 1;
        Ok(())
    }
    fn enable(&mut self, channel_mask: u8) -> Result<(), LcrError> {
        self.bench.lock().enabled_mask = channel_mask;
        Ok(())
    }
}
pub struct SimulatedScope {
    bench: SimulatedBench,
}
impl AcquisitionDevice for SimulatedScope {
    fn init(&mut self) -> Result<(), LcrError> {
        if self.bench.lock().fail_init {
            return Err(LcrError::DeviceInit {
                device: "oscilloscope",
                reason: "simulated init failure".into(),
            });
        }
        Ok(())
    }
    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<(), LcrError> {
        self.bench.lock().settings = Some(*settings);
        Ok(())
    }
    fn poll(&mut self) -> Result<Option<AcquiredTrace>, LcrError> {
        let mut state = self.bench.lock();
        let settings = state
            .settings
            .ok_or_else(|| LcrError::Device("oscilloscope polled before configure".into()))?;
        if state.never_trigger {
            return Ok(None);
        }
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(None);
        }
        state.pending_polls = state.not_ready_polls;
        state.acquisitions += 1;
        Ok(Some(state.render(&settings)))
    }
}
