//! Impedance from the lock-in components of the load voltage and current.
//!
//! - Amplitude and phase per trace: `sqrt(x^2 + y^2)`, `atan2(y, x)`.
//! - `Z = |V| / |I| * exp(j * (phi_V - phi_I))`.
//! - The phase difference is reported in degrees, wrapped to (-180, 180].
use rustfft::num_complex::Complex64;
use crate::drivers::lockin::DemodulatedComponents;
use crate::drivers::LcrError;
use crate::types::ImpedancePoint;
/// Wraps an angle in degrees into (-180, 180].
pub fn wrap_phase_deg(phase_deg: f64) -> f64 {
    let wrapped = phase_deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
/// Builds one [`ImpedancePoint`] from the demodulated voltage and current.
///
/// The current components come from the shunt voltage divided by the shunt
/// resistance, so they are already in amperes (times the integration scale
/// shared with the voltage).
pub fn estimate(
    frequency_hz: f64,
    voltage: &DemodulatedComponents,
    current: &DemodulatedComponents,
) -> Result<ImpedancePoint, LcrError> {
    let current_amplitude = current.amplitude();
    if !(current_amplitude > 0.0 && current_amplitude.is_finite()) {
        return Err(LcrError::NoCurrent { frequency_hz });
    }
    let magnitude_ohms = voltage.amplitude() / current_amplitude;
    let phase_deg = wrap_phase_deg((voltage.phase() - current.phase()).to_degrees());
    let z = Complex64::from_polar(magnitude_ohms, phase_deg.to_radians());
    Ok(ImpedancePoint {
        frequency_hz,
        real_ohms: z.re,
        imag_ohms: z.im,
        magnitude_ohms,
        phase_deg,
    })
}
