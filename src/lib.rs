//! Impedance sweep core for an arbitrary waveform generator + oscilloscope bench.
//!
//! The generator drives the load through a shunt resistor, the scope records
//! both ends of the shunt, and a software lock-in turns each acquisition into
//! a complex impedance.
pub mod config;
pub mod drivers;
pub mod types;
pub use config::{HardwareProfile, SweepConfig, ValidatedSweep};
pub use drivers::{LcrError, SweepController};
pub use types::{FrequencyResult, ImpedancePoint, SweepResultTable};
