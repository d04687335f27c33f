use thiserror::Error;
#[derive(Debug, Error)]
pub enum LcrError {
    #[error("frequency {value} Hz outside valid range [{min}, {max}] Hz")]
    FrequencyOutOfRange { value: f64, min: f64, max: f64 },
    #[error("amplitude {value} Vpp outside valid range [0, {max}] Vpp")]
    AmplitudeOutOfRange { value: f64, max: f64 },
    #[error("end frequency {end} Hz is below start frequency {start} Hz")]
    DescendingSweep { start: f64, end: f64 },
    #[error("frequency step must be positive, got {0} Hz")]
    InvalidStep(f64),
    #[error("shunt resistance must be positive and finite, got {0} ohm")]
    InvalidShunt(f64),
    #[error("acquisition size {value} outside valid range [1, {max}]")]
    AcquisitionSizeOutOfRange { value: usize, max: usize },
    #[error("averaging count {value} outside valid range [1, {max}]")]
    InvalidAveraging { value: u32, max: u32 },
    #[error("minimum periods {value} outside valid range [1, {max}]")]
    MinPeriodsOutOfRange { value: u32, max: u32 },
    #[error("DC bias {value} V must lie in [0, {full_scale}) V")]
    DcBiasOutOfRange { value: f64, full_scale: f64 },
    #[error("decimation {0} is not one of the hardware decimation factors")]
    UnknownDecimation(u32),
    #[error("hardware profile field {field} {reason}")]
    InvalidProfile { field: &'static str, reason: String },
    #[error("frequency {frequency_hz} Hz is below the lowest decimation band ({lowest_hz} Hz)")]
    FrequencyBelowRange { frequency_hz: f64, lowest_hz: f64 },
    #[error("acquisition at {frequency_hz} Hz was not triggered after {attempts} attempts")]
    AcquisitionTimeout { frequency_hz: f64, attempts: u32 },
    #[error("sweep cancelled")]
    Cancelled,
    #[error("{device} initialization failed: {reason}")]
    DeviceInit { device: &'static str, reason: String },
    #[error("device fault: {0}")]
    Device(String),
    #[error("channel count mismatch: expected at least {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("acquired channels have unequal lengths")]
    RaggedTrace,
    #[error("no current through the load at {frequency_hz} Hz; impedance undefined")]
    NoCurrent { frequency_hz: f64 },
    #[error("operator declined the short-circuit calibration")]
    CalibrationDeclined,
    #[error("calibration baseline has no entry at {frequency_hz} Hz")]
    MissingCalibrationPoint { frequency_hz: f64 },
}
impl LcrError {
    /// True for errors raised while validating a sweep, before any device work.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LcrError::FrequencyOutOfRange { .. }
                | LcrError::AmplitudeOutOfRange { .. }
                | LcrError::DescendingSweep { .. }
                | LcrError::InvalidStep(_)
                | LcrError::InvalidShunt(_)
                | LcrError::AcquisitionSizeOutOfRange { .. }
                | LcrError::InvalidAveraging { .. }
                | LcrError::InvalidProfile { .. }
                | LcrError::MinPeriodsOutOfRange { .. }
                | LcrError::DcBiasOutOfRange { .. }
                | LcrError::UnknownDecimation(_)
                | LcrError::FrequencyBelowRange { .. }
        )
    }
}
