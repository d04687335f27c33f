use crate::drivers::source::AcquiredTrace;
use crate::drivers::LcrError;
/// Where the fixture's two probes sit and how counts become volts.
#[derive(Clone, Copy, Debug)]
pub struct FixtureScale {
    /// Probe on the generator side of the load.
    pub excitation_channel: usize,
    /// Probe across the shunt resistor.
    pub shunt_channel: usize,
    pub volts_per_count: f64,
    pub shunt_ohms: f64,
}
impl FixtureScale {
    pub fn new(volts_per_count: f64, shunt_ohms: f64) -> Self {
        Self {
            excitation_channel: 0,
            shunt_channel: 1,
            volts_per_count,
            shunt_ohms,
        }
    }
}
/// Voltage across and current through the load, sample by sample.
#[derive(Clone, Debug, Default)]
pub struct LoadTraces {
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
}
impl LoadTraces {
    /// Converts at most `requested` samples of `trace`.
    pub fn from_acquired(
        trace: &AcquiredTrace,
        scale: &FixtureScale,
        requested: usize,
    ) -> Result<Self, LcrError> {
        let needed = scale.excitation_channel.max(scale.shunt_channel) + 1;
        trace.validate(needed)?;
        let len = requested.min(trace.samples_per_channel().unwrap_or(0));
        let excitation = &trace.channels[scale.excitation_channel][..len];
        let shunt = &trace.channels[scale.shunt_channel][..len];
        let mut voltage = Vec::with_capacity(len);
        let mut current = Vec::with_capacity(len);
        for (&e, &s) in excitation.iter().zip(shunt) {
            let v_excitation = f64::from(e) * scale.volts_per_count;
            let v_shunt = f64::from(s) * scale.volts_per_count;
            voltage.push(v_excitation - v_shunt);
            current.push(v_shunt / scale.shunt_ohms);
        }
        Ok(Self { voltage, current })
    }
    pub fn len(&self) -> usize {
        self.voltage.len()
    }
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }
}
