use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::drivers::AcquisitionError;
/// Number of channels carried by one `Channel:` record.
pub const CHANNEL_COUNT: usize = 9;

/// Snapshot of everything the acquisition core needs, injected at construction.
///
/// The core never writes configuration back; loading from JSON only exists so
/// the runner binary can hand over a file produced elsewhere.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sample_rate_hz: f64,
    pub channels: usize,
    pub filter: FilterConfig,
    /// Default waveform window, in samples.
    pub plot_length: usize,
    /// Default spectrum window, in samples.
    pub spectrum_length: usize,
    pub spectrum_fmin_hz: f64,
    pub spectrum_fmax_hz: f64,
    /// Window used for the band power bars, in samples.
    pub band_power_length: usize,
    /// Ring capacity of the sample store, in samples per channel.
    pub history_capacity: usize,
    /// Consumer tick period.
    pub update_interval_ms: u64,
    pub device: DeviceConfig,
    pub synthetic: SyntheticConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 500.0,
            channels: CHANNEL_COUNT,
            filter: FilterConfig::default(),
            plot_length: 2000,
            spectrum_length: 120,
            spectrum_fmin_hz: 3.0,
            spectrum_fmax_hz: 50.0,
            band_power_length: 1024,
            history_capacity: 30_000,
            update_interval_ms: 40,
            device: DeviceConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, AcquisitionError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AcquisitionError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks the non-filter fields; the filter chain validates its own section.
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if !(self.sample_rate_hz > 0.0) || !self.sample_rate_hz.is_finite() {
            return Err(AcquisitionError::InvalidSampleRate);
        }
        if self.channels == 0 {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        if self.history_capacity == 0 {
            return Err(AcquisitionError::InvalidCapacity);
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }
}

/// Notch plus range-limiting stage parameters.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub notch_hz: f64,
    pub notch_q: f64,
    /// One cutoff selects a low-pass, two select a band-pass.
    pub cutoffs_hz: Vec<f64>,
    pub order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        // Mains at 60 Hz, 4-60 Hz band, fourth-order Butterworth.
        Self {
            notch_hz: 60.0,
            notch_q: 30.0,
            cutoffs_hz: vec![4.0, 60.0],
            order: 4,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// No port means the synthetic generator is used straight away.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 50,
            stop_timeout_ms: 1000,
        }
    }
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticConfig {
    pub frequency_hz: f64,
    pub amplitude: f64,
    pub noise_amplitude: f64,
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 8.0,
            amplitude: 50.0,
            noise_amplitude: 15.0,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = AcquisitionConfig::from_json_str(
            r#"{ "sample_rate_hz": 250.0, "filter": { "cutoffs_hz": [40.0] } }"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate_hz, 250.0);
        assert_eq!(config.filter.cutoffs_hz, vec![40.0]);
        assert_eq!(config.filter.notch_hz, 60.0);
        assert_eq!(config.history_capacity, 30_000);
        assert_eq!(config.device.baud_rate, 115_200);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "device": {{ "port": "/dev/ttyUSB0" }} }}"#).unwrap();
        let config = AcquisitionConfig::load(file.path()).unwrap();
        assert_eq!(config.device.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.channels, CHANNEL_COUNT);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = AcquisitionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, AcquisitionError::Config(_)));
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let mut config = AcquisitionConfig::default();
        config.sample_rate_hz = 0.0;
        assert!(matches!(
            config.validate(),
            Err(AcquisitionError::InvalidSampleRate)
        ));
        let mut config = AcquisitionConfig::default();
        config.history_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(AcquisitionError::InvalidCapacity)
        ));
        assert!(AcquisitionConfig::default().validate().is_ok());
    }
}
