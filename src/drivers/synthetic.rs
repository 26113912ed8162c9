use std::f64::consts::PI;
use std::time::Instant;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::config::SyntheticConfig;
use crate::drivers::source::{SampleVector, SignalSource, SourceKind};
use crate::drivers::AcquisitionError;
/// Phase-staggered sinusoids plus gaussian noise, one phase per channel.
///
/// The only state is the running sample counter, so consecutive calls
/// continue the same waveform.
pub struct SyntheticSource {
    config: SyntheticConfig,
    sample_rate_hz: f64,
    channels: usize,
    next_index: u64,
    rng: StdRng,
    paced_since: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig, sample_rate_hz: f64, channels: usize) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            sample_rate_hz,
            channels,
            next_index: 0,
            rng,
            paced_since: None,
        }
    }

    /// Releases samples no faster than the sample rate, measured from now.
    pub fn paced(mut self) -> Self {
        self.paced_since = Some(Instant::now());
        self
    }

    pub fn samples_emitted(&self) -> u64 {
        self.next_index
    }

    /// Generates the next `n` samples as `(time_axis, channels x n)`.
    pub fn produce(&mut self, n: usize) -> (Vec<f64>, Array2<f64>) {
        let mut values = Array2::zeros((self.channels, n));
        let mut time_axis = Vec::with_capacity(n);
        for i in 0..n {
            time_axis.push(self.next_index as f64 / self.sample_rate_hz);
            let sample = self.generate();
            for (c, v) in sample.into_iter().enumerate() {
                values[[c, i]] = v;
            }
        }
        (time_axis, values)
    }

    fn generate(&mut self) -> Vec<f64> {
        let t = self.next_index as f64 / self.sample_rate_hz;
        self.next_index += 1;
        let omega_t = 2.0 * PI * self.config.frequency_hz * t;
        (0..self.channels)
            .map(|c| {
                let phase = c as f64 * PI / self.channels as f64;
                self.config.amplitude * (omega_t + phase).sin()
                    + self.config.noise_amplitude * self.gaussian()
            })
            .collect()
    }

    // Box-Muller; the cosine branch is enough here.
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

impl SignalSource for SyntheticSource {
    fn next_sample(&mut self) -> Result<Option<SampleVector>, AcquisitionError> {
        if let Some(since) = self.paced_since {
            let due = (since.elapsed().as_secs_f64() * self.sample_rate_hz) as u64;
            if self.next_index >= due {
                return Ok(None);
            }
        }
        Ok(Some(SampleVector::new(self.generate())))
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }
}
