//! Multi-channel biosignal acquisition: serial or synthetic source, per-channel
//! notch and Butterworth filtering, a bounded sample history and spectral views.
pub mod config;
pub mod drivers;

pub use config::{AcquisitionConfig, CHANNEL_COUNT};
pub use drivers::*;
