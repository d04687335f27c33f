use std::f64::consts::PI;
use log::warn;
use crate::config::HardwareProfile;
use crate::types::{SignalShape, SignalSpec};
/// Register values the generator needs besides the sample memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceWaveformParams {
    pub offset_gain: i32,
    /// Phase accumulator wrap bound, 16.16 fixed point.
    pub wrap_index: u32,
    /// Phase accumulator advance per DAC clock, 16.16 fixed point.
    pub step_increment: u32,
}
/// Rendered generator memory in the device's unsigned wire range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleBuffer {
    samples: Vec<i32>,
}
impl SampleBuffer {
    pub fn samples(&self) -> &[i32] {
        &self.samples
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
/// Output of [`WaveformSynthesizer::synthesize`].
#[derive(Clone, Debug)]
pub struct SynthesizedWaveform {
    pub buffer: SampleBuffer,
    pub params: DeviceWaveformParams,
    /// Peak amplitude actually written, in DAC counts.
    pub amplitude_counts: u32,
    /// Set when the requested amplitude exceeded the DAC range.
    pub saturated: bool,
}
/// Phase of an exponential chirp: `w0*T/k * (exp(t*k/T) - 1)`, `k = ln(w1/w0)`.
#[derive(Clone, Copy, Debug)]
pub struct ChirpPhase {
    start_rad_s: f64,
    rate: f64,
    duration_s: f64,
}
impl ChirpPhase {
    pub fn new(start_hz: f64, end_hz: f64, duration_s: f64) -> Self {
        let start_rad_s = 2.0 * PI * start_hz;
        let end_rad_s = 2.0 * PI * end_hz;
        let rate = if start_hz > 0.0 && end_hz > 0.0 {
            (end_rad_s / start_rad_s).ln()
        } else {
            0.0
        };
        Self {
            start_rad_s,
            rate,
            duration_s,
        }
    }
    pub fn phase(&self, t: f64) -> f64 {
        if self.rate == 0.0 {
            // limit of the chirp when both ends coincide
            return self.start_rad_s * t;
        }
        self.start_rad_s * self.duration_s / self.rate
            * ((t * self.rate / self.duration_s).exp() - 1.0)
    }
    /// Angular frequency, the derivative of [`ChirpPhase::phase`].
    pub fn angular_frequency(&self, t: f64) -> f64 {
        self.start_rad_s * (t * self.rate / self.duration_s).exp()
    }
}
/// Renders one buffer of generator memory for a [`SignalSpec`].
pub struct WaveformSynthesizer<'a> {
    profile: &'a HardwareProfile,
}
impl<'a> WaveformSynthesizer<'a> {
    pub fn new(profile: &'a HardwareProfile) -> Self {
        Self { profile }
    }
    pub fn synthesize(&self, spec: &SignalSpec) -> SynthesizedWaveform {
        let p = self.profile;
        let n = p.buffer_length;
        let len = n as f64;
        let params = DeviceWaveformParams {
            offset_gain: (p.dac_offset_counts << 16) + p.dac_gain_word,
            step_increment: (65536.0 * spec.start_frequency_hz / p.dac_sample_rate_hz * len)
                .round() as u32,
            wrap_index: (65536.0 * (len - 1.0)).round() as u32,
        };
        let requested = (spec.amplitude_vpp * p.dac_counts_per_vpp).max(0.0) as u64;
        let saturated = requested > u64::from(p.dac_max_count);
        let amp = if saturated {
            warn!(
                "amplitude {} Vpp exceeds DAC range, clamped to {} counts",
                spec.amplitude_vpp, p.dac_max_count
            );
            p.dac_max_count
        } else {
            requested as u32
        };
        let amp_f = f64::from(amp);
        let edge = SquareEdges::new(p, spec.start_frequency_hz, len);
        let chirp = ChirpPhase::new(
            spec.start_frequency_hz,
            spec.end_frequency_hz,
            len / p.dac_sample_rate_hz,
        );
        let samples = (0..n)
            .map(|i| {
                let x = i as f64;
                let cosine = (2.0 * PI * x / len).cos();
                let value = match spec.shape {
                    SignalShape::Sine => (amp_f * cosine).round() as i32,
                    SignalShape::Square => edge.sample(x, amp_f, (amp_f * cosine).round()),
                    SignalShape::Triangle => {
                        (-amp_f * (cosine.acos() / PI * 2.0 - 1.0)).round() as i32
                    }
                    SignalShape::Sweep => {
                        let t = x / p.dac_sample_rate_hz;
                        (amp_f * chirp.phase(t).sin()).round() as i32
                    }
                };
                if value < 0 {
                    value + p.dac_rebias
                } else {
                    value
                }
            })
            .collect();
        SynthesizedWaveform {
            buffer: SampleBuffer { samples },
            params,
            amplitude_counts: amp,
            saturated,
        }
    }
}
/// Linear ramps replacing the two square-wave edges.
struct SquareEdges {
    width: f64,
    fall_start: f64,
    rise_start: f64,
}
impl SquareEdges {
    fn new(profile: &HardwareProfile, frequency_hz: f64, len: f64) -> Self {
        let t = &profile.square_transition;
        let mut width = (frequency_hz / t.reference_hz * t.samples_at_reference) as i64;
        if width <= t.floor_threshold {
            width = t.floor_samples;
        }
        Self {
            width: width as f64,
            fall_start: len * t.fall_position,
            rise_start: len * t.rise_position,
        }
    }
    fn sample(&self, x: f64, amp: f64, rounded_cosine: f64) -> i32 {
        let ramp = |x1: f64, y1: f64, y2: f64| {
            let slope = (y2 - y1) / self.width;
            (slope * (x - x1) + y1).round() as i32
        };
        if x > self.fall_start && x <= self.fall_start + self.width {
            ramp(self.fall_start, amp, -amp)
        } else if x > self.rise_start && x <= self.rise_start + self.width {
            ramp(self.rise_start, -amp, amp)
        } else if rounded_cosine > 0.0 {
            amp as i32
        } else {
            -(amp as i32)
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn profile() -> HardwareProfile {
        HardwareProfile::default()
    }
    fn spec(shape: SignalShape, amplitude_vpp: f64) -> SignalSpec {
        SignalSpec {
            shape,
            amplitude_vpp,
            start_frequency_hz: 1000.0,
            end_frequency_hz: 1000.0,
        }
    }
    fn on_edge(edges: &SquareEdges, x: f64) -> bool {
        (x > edges.fall_start && x <= edges.fall_start + edges.width)
            || (x > edges.rise_start && x <= edges.rise_start + edges.width)
    }
    /// Undo the wire rebias.
    fn signed(sample: i32, profile: &HardwareProfile) -> i32 {
        if sample > profile.dac_max_count as i32 {
            sample - profile.dac_rebias
        } else {
            sample
        }
    }
    #[test]
    fn device_params_follow_fixed_point_formulas() {
        let p = profile();
        let out = WaveformSynthesizer::new(&p).synthesize(&spec(SignalShape::Sine, 1.0));
        assert_eq!(out.params.step_increment, 8590);
        assert_eq!(out.params.wrap_index, 65536 * 16383);
        assert_eq!(out.params.offset_gain, (-155 << 16) + 0x1fff);
    }
    #[test]
    fn sine_matches_rounded_cosine_exactly() {
        let p = profile();
        let out = WaveformSynthesizer::new(&p).synthesize(&spec(SignalShape::Sine, 2.0));
        assert!(!out.saturated);
        assert_eq!(out.amplitude_counts, 8000);
        assert_eq!(out.buffer.len(), 16384);
        for (i, &s) in out.buffer.samples().iter().enumerate() {
            let mut expected = (8000.0 * (2.0 * PI * i as f64 / 16384.0).cos()).round() as i32;
            if expected < 0 {
                expected += 1 << 14;
            }
            assert_eq!(s, expected, "sample {i}");
        }
    }
    #[test]
    fn samples_stay_in_unsigned_wire_range() {
        let p = profile();
        let synth = WaveformSynthesizer::new(&p);
        for shape in [
            SignalShape::Sine,
            SignalShape::Square,
            SignalShape::Triangle,
            SignalShape::Sweep,
        ] {
            let out = synth.synthesize(&SignalSpec {
                end_frequency_hz: 50_000.0,
                ..spec(shape, 2.0)
            });
            assert!(out
                .buffer
                .samples()
                .iter()
                .all(|&s| (0..(1 << 14)).contains(&s)));
        }
    }
    #[test]
    fn triangle_is_symmetric() {
        let p = profile();
        let out = WaveformSynthesizer::new(&p).synthesize(&spec(SignalShape::Triangle, 1.5));
        let s: Vec<i32> = out.buffer.samples().iter().map(|&v| signed(v, &p)).collect();
        let n = s.len();
        for i in 1..n / 2 {
            assert!((s[i] - s[n - i]).abs() <= 1, "sample {i}");
        }
        assert_eq!(s[0], 6000);
        assert_eq!(s[n / 2], -6000);
    }
    #[test]
    fn square_holds_full_level_off_the_edges() {
        let p = profile();
        let out = WaveformSynthesizer::new(&p).synthesize(&spec(SignalShape::Square, 1.0));
        let edges = SquareEdges::new(&p, 1000.0, 16384.0);
        assert_eq!(edges.width, 30.0);
        let mut ramp_samples = 0;
        for (i, &raw) in out.buffer.samples().iter().enumerate() {
            let x = i as f64;
            let v = signed(raw, &p);
            if on_edge(&edges, x) {
                ramp_samples += 1;
                assert!(v.abs() <= 4000);
                continue;
            }
            let cosine = (2.0 * PI * x / 16384.0).cos();
            if cosine.abs() < 1e-9 {
                continue;
            }
            assert_eq!(v.abs(), 4000, "sample {i}");
            assert_eq!(v.signum(), cosine.signum() as i32, "sample {i}");
        }
        assert_eq!(ramp_samples, 60);
    }
    #[test]
    fn square_edges_scale_with_frequency() {
        let p = profile();
        assert_eq!(SquareEdges::new(&p, 2.0e6, 16384.0).width, 600.0);
        assert_eq!(SquareEdges::new(&p, 20_000.0, 16384.0).width, 30.0);
    }
    #[test]
    fn chirp_frequency_rises_monotonically() {
        let chirp = ChirpPhase::new(1000.0, 50_000.0, 16384.0 / 125.0e6);
        let duration = 16384.0 / 125.0e6;
        let mut last = 0.0;
        for i in 0..=1000 {
            let t = duration * i as f64 / 1000.0;
            let w = chirp.angular_frequency(t);
            assert!(w > last);
            last = w;
        }
        assert!((chirp.angular_frequency(0.0) / (2.0 * PI) - 1000.0).abs() < 1e-6);
        assert!((chirp.angular_frequency(duration) / (2.0 * PI) - 50_000.0).abs() < 1e-3);
        let down = ChirpPhase::new(50_000.0, 1000.0, duration);
        assert!(down.angular_frequency(duration) < down.angular_frequency(0.0));
    }
    #[test]
    fn chirp_phase_slope_matches_instantaneous_frequency() {
        let duration = 16384.0 / 125.0e6;
        let chirp = ChirpPhase::new(2000.0, 20_000.0, duration);
        let t = duration / 3.0;
        let h = duration * 1e-6;
        let slope = (chirp.phase(t + h) - chirp.phase(t - h)) / (2.0 * h);
        let w = chirp.angular_frequency(t);
        assert!((slope - w).abs() / w < 1e-6);
    }
    #[test]
    fn flat_sweep_degrades_to_a_sine() {
        let chirp = ChirpPhase::new(1000.0, 1000.0, 1.0);
        assert!((chirp.phase(0.5) - PI * 1000.0).abs() < 1e-9);
    }
    #[test]
    fn amplitude_beyond_dac_range_saturates() {
        let p = profile();
        let out = WaveformSynthesizer::new(&p).synthesize(&spec(SignalShape::Sine, 3.0));
        assert!(out.saturated);
        assert_eq!(out.amplitude_counts, 8191);
        let peak = out
            .buffer
            .samples()
            .iter()
            .map(|&s| signed(s, &p).abs())
            .max()
            .unwrap();
        assert_eq!(peak, 8191);
    }
}
