// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod buffer;
pub mod error;
pub mod impedance;
pub mod lockin;
pub mod planner;
pub mod simulator;
pub mod source;
pub mod sweep;
pub mod synth;
// 公开导出这些模块里的结构体，方便外部调用
pub use buffer::{FixtureScale, LoadTraces};
pub use error::LcrError;
pub use impedance::{estimate, wrap_phase_deg};
pub use lockin::{demodulate, DemodulatedComponents, LockInDemodulator};
pub use planner::{AcquisitionPlan, SamplingPlanner};
pub use simulator::{LoadModel, SimulatedBench, SimulatedGenerator, SimulatedScope};
pub use source::{
    acquire_with_retry, AcquiredTrace, AcquisitionDevice, AcquisitionSettings, CancelToken,
    OutputDevice,
};
pub use sweep::{CalibrationGate, SweepController};
pub use synth::{ChirpPhase, DeviceWaveformParams, SampleBuffer, SynthesizedWaveform, WaveformSynthesizer};
