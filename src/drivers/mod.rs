// src/drivers/mod.rs
// Acquisition and signal-processing core.
pub mod bands;
pub mod buffer;
pub mod error;
pub mod fft;
pub mod filter;
pub mod pipeline;
pub mod serial;
pub mod source;
pub mod synthetic;
// 公开导出这些模块里的结构体，方便外部调用
pub use bands::{
    band_power, band_powers, vrms, welch_psd, Band, BandPowerOptions, Psd, CANONICAL_BANDS,
};
pub use buffer::{SampleStore, Window};
pub use error::AcquisitionError;
pub use fft::{spectrum, spectrum_with_length, Spectrum};
pub use filter::{FilterChain, RangeTopology};
pub use pipeline::{AcquisitionController, AcquisitionState};
pub use serial::{parse_record, DeviceLink, SerialSource, MAX_LINE_BYTES};
pub use source::{AcquisitionSource, ReplaySource, SampleVector, SignalSource, SourceKind};
pub use synthetic::SyntheticSource;
