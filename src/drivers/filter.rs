use std::f64::consts::PI;
use ndarray::Array2;
use rustfft::num_complex::Complex64;
use crate::config::FilterConfig;
use crate::drivers::source::SampleVector;
use crate::drivers::AcquisitionError;
/// Highest Butterworth order accepted for the range-limiting stage.
pub const MAX_ORDER: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    /// State that holds the output steady for a constant `input`.
    fn steady(coeffs: &BiquadCoeffs, input: f64) -> Self {
        let output = coeffs.dc_gain() * input;
        let z2 = coeffs.b2 * input - coeffs.a2 * output;
        let z1 = coeffs.b1 * input - coeffs.a1 * output + z2;
        Self { z1, z2 }
    }
}

#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
}

/// Cascade of second-order sections carrying its own state.
#[derive(Clone, Debug)]
struct Stage {
    sections: Vec<BiquadFilter>,
}

impl Stage {
    fn new(coeffs: Vec<BiquadCoeffs>) -> Self {
        Self {
            sections: coeffs.into_iter().map(BiquadFilter::new).collect(),
        }
    }

    fn process(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }

    /// Loads steady-state initial conditions for a constant `input` and
    /// returns the stage's steady output.
    fn prime(&mut self, mut input: f64) -> f64 {
        for section in &mut self.sections {
            section.state = BiquadState::steady(&section.coeffs, input);
            input *= section.coeffs.dc_gain();
        }
        input
    }

    #[cfg(test)]
    fn gain_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate_hz;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let c = s.coeffs;
                ((c.b0 + c.b1 * z1 + c.b2 * z2) / (1.0 + c.a1 * z1 + c.a2 * z2)).norm()
            })
            .product()
    }
}

/// Notch then range-limit, for one channel.
#[derive(Clone, Debug)]
struct ChannelFilter {
    notch: Stage,
    range: Stage,
    primed: bool,
}

impl ChannelFilter {
    fn process_sample(&mut self, value: f64) -> f64 {
        if !self.primed {
            let settled = self.notch.prime(value);
            self.range.prime(settled);
            self.primed = true;
        }
        let notched = self.notch.process(value);
        self.range.process(notched)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RangeTopology {
    Lowpass { cutoff_hz: f64 },
    Bandpass { low_hz: f64, high_hz: f64 },
}

/// Per-channel notch plus Butterworth range limiting, applied one sample at a time.
///
/// Every channel owns its own state; nothing is shared or reset after
/// construction, so feeding a stream in one piece or in arbitrary chunks
/// yields identical output.
#[derive(Clone, Debug)]
pub struct FilterChain {
    channels: Vec<ChannelFilter>,
    topology: RangeTopology,
}

impl FilterChain {
    pub fn new(
        config: &FilterConfig,
        sample_rate_hz: f64,
        channels: usize,
    ) -> Result<Self, AcquisitionError> {
        if !(sample_rate_hz > 0.0) || !sample_rate_hz.is_finite() {
            return Err(AcquisitionError::InvalidSampleRate);
        }
        if channels == 0 {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        let nyquist = sample_rate_hz * 0.5;
        let notch = notch_coeffs(config.notch_hz, config.notch_q, sample_rate_hz)?;
        let topology = match config.cutoffs_hz.as_slice() {
            &[cutoff_hz] => {
                check_frequency("low-pass cutoff", cutoff_hz, nyquist)?;
                RangeTopology::Lowpass { cutoff_hz }
            }
            &[low_hz, high_hz] => {
                check_frequency("band-pass low cutoff", low_hz, nyquist)?;
                check_frequency("band-pass high cutoff", high_hz, nyquist)?;
                if low_hz >= high_hz {
                    return Err(AcquisitionError::InvalidFilter(format!(
                        "band-pass low cutoff {low_hz} Hz must be below high cutoff {high_hz} Hz"
                    )));
                }
                RangeTopology::Bandpass { low_hz, high_hz }
            }
            other => {
                return Err(AcquisitionError::InvalidFilter(format!(
                    "expected one or two cutoffs, got {}",
                    other.len()
                )))
            }
        };
        if config.order == 0 || config.order > MAX_ORDER {
            return Err(AcquisitionError::InvalidFilter(format!(
                "filter order must be within 1..={MAX_ORDER}, got {}",
                config.order
            )));
        }
        let range = butterworth(topology, config.order, sample_rate_hz);
        log::debug!(
            "filter chain: notch {} Hz (Q {}), {:?} order {} ({} sections)",
            config.notch_hz,
            config.notch_q,
            topology,
            config.order,
            range.len()
        );
        let template = ChannelFilter {
            notch: Stage::new(vec![notch]),
            range: Stage::new(range),
            primed: false,
        };
        Ok(Self {
            channels: vec![template; channels],
            topology,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn topology(&self) -> RangeTopology {
        self.topology
    }

    /// Filters one sample vector, advancing every channel's state once.
    pub fn apply(&mut self, sample: &SampleVector) -> Result<SampleVector, AcquisitionError> {
        if sample.num_channels() != self.channels.len() {
            return Err(AcquisitionError::ChannelMismatch {
                expected: self.channels.len(),
                actual: sample.num_channels(),
            });
        }
        let filtered = self
            .channels
            .iter_mut()
            .zip(sample.values())
            .map(|(channel, &value)| channel.process_sample(value))
            .collect();
        Ok(SampleVector::new(filtered))
    }

    /// Filters a `channels x n` block column by column, in time order.
    pub fn apply_block(&mut self, block: &Array2<f64>) -> Result<Array2<f64>, AcquisitionError> {
        let (rows, cols) = block.dim();
        if rows != self.channels.len() {
            return Err(AcquisitionError::ChannelMismatch {
                expected: self.channels.len(),
                actual: rows,
            });
        }
        let mut out = Array2::zeros((rows, cols));
        for t in 0..cols {
            for (c, channel) in self.channels.iter_mut().enumerate() {
                out[[c, t]] = channel.process_sample(block[[c, t]]);
            }
        }
        Ok(out)
    }
}

fn check_frequency(what: &str, freq_hz: f64, nyquist: f64) -> Result<(), AcquisitionError> {
    if freq_hz.is_finite() && freq_hz > 0.0 && freq_hz < nyquist {
        Ok(())
    } else {
        Err(AcquisitionError::InvalidFilter(format!(
            "{what} {freq_hz} Hz must lie strictly between 0 and Nyquist ({nyquist} Hz)"
        )))
    }
}

/// Second-order notch with -3 dB bandwidth `freq_hz / q`.
fn notch_coeffs(freq_hz: f64, q: f64, sample_rate_hz: f64) -> Result<BiquadCoeffs, AcquisitionError> {
    let nyquist = sample_rate_hz * 0.5;
    check_frequency("notch frequency", freq_hz, nyquist)?;
    if !(q > 0.0) || !q.is_finite() {
        return Err(AcquisitionError::InvalidFilter(format!(
            "notch quality factor must be positive, got {q}"
        )));
    }
    let w0 = PI * freq_hz / nyquist;
    let bw = w0 / q;
    let gain = 1.0 / (1.0 + (bw / 2.0).tan());
    let cos_w0 = w0.cos();
    Ok(BiquadCoeffs {
        b0: gain,
        b1: -2.0 * gain * cos_w0,
        b2: gain,
        a1: -2.0 * gain * cos_w0,
        a2: 2.0 * gain - 1.0,
    })
}

/// Digital Butterworth design: analog prototype, frequency transform,
/// bilinear transform, then pairing into second-order sections.
fn butterworth(topology: RangeTopology, order: usize, sample_rate_hz: f64) -> Vec<BiquadCoeffs> {
    let fs2 = 2.0 * sample_rate_hz;
    let warp = |freq_hz: f64| fs2 * (PI * freq_hz / sample_rate_hz).tan();
    let prototype: Vec<Complex64> = (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::from_polar(1.0, theta)
        })
        .collect();

    let (analog_poles, digital_zeros, mut gain) = match topology {
        RangeTopology::Lowpass { cutoff_hz } => {
            let wc = warp(cutoff_hz);
            let poles: Vec<Complex64> = prototype.iter().map(|&p| p * wc).collect();
            (poles, vec![-1.0; order], wc.powi(order as i32))
        }
        RangeTopology::Bandpass { low_hz, high_hz } => {
            let (wl, wh) = (warp(low_hz), warp(high_hz));
            let bw = wh - wl;
            let wo2 = wl * wh;
            let poles: Vec<Complex64> = prototype
                .iter()
                .flat_map(|&p| {
                    let half = p * (bw / 2.0);
                    let root = (half * half - wo2).sqrt();
                    [half + root, half - root]
                })
                .collect();
            // Analog zeros at s = 0 land on z = 1; the excess degree lands on z = -1.
            let zeros: Vec<f64> = (0..order).flat_map(|_| [1.0, -1.0]).collect();
            (poles, zeros, bw.powi(order as i32) * fs2.powi(order as i32))
        }
    };

    let mut denominator = Complex64::new(1.0, 0.0);
    for &p in &analog_poles {
        denominator *= fs2 - p;
    }
    gain = (Complex64::new(gain, 0.0) / denominator).re;

    let digital_poles: Vec<Complex64> = analog_poles
        .iter()
        .map(|&p| (fs2 + p) / (fs2 - p))
        .collect();

    // Conjugate pairs first, then real poles two at a time; closest to the
    // unit circle last.
    let mut pole_groups: Vec<Vec<Complex64>> = Vec::new();
    let mut real_poles = Vec::new();
    for p in digital_poles {
        if p.im.abs() <= 1e-10 * p.norm().max(1.0) {
            real_poles.push(p.re);
        } else if p.im > 0.0 {
            pole_groups.push(vec![p, p.conj()]);
        }
    }
    real_poles.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
    for pair in real_poles.chunks(2) {
        pole_groups.push(pair.iter().map(|&r| Complex64::new(r, 0.0)).collect());
    }
    pole_groups.sort_by(|a, b| a[0].norm().total_cmp(&b[0].norm()));

    let mut zeros = digital_zeros.into_iter();
    let mut sections = Vec::with_capacity(pole_groups.len());
    for group in pole_groups {
        let (a1, a2) = match group.as_slice() {
            &[p, q] => (-(p + q).re, (p * q).re),
            &[p] => (-p.re, 0.0),
            _ => unreachable!("pole groups hold one or two poles"),
        };
        let (b0, b1, b2) = if group.len() == 2 {
            let z1 = zeros.next().unwrap_or(-1.0);
            let z2 = zeros.next().unwrap_or(-1.0);
            (1.0, -(z1 + z2), z1 * z2)
        } else {
            (1.0, -zeros.next().unwrap_or(-1.0), 0.0)
        };
        sections.push(BiquadCoeffs { b0, b1, b2, a1, a2 });
    }
    if let Some(first) = sections.first_mut() {
        first.b0 *= gain;
        first.b1 *= gain;
        first.b2 *= gain;
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyntheticConfig;
    use crate::drivers::synthetic::SyntheticSource;
    const FS: f64 = 500.0;

    fn chain(cutoffs: &[f64], order: usize, channels: usize) -> FilterChain {
        let config = FilterConfig {
            cutoffs_hz: cutoffs.to_vec(),
            order,
            ..FilterConfig::default()
        };
        FilterChain::new(&config, FS, channels).unwrap()
    }

    fn sine(freq_hz: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / FS).sin())
            .collect()
    }

    fn tail_rms(values: &[f64], tail: usize) -> f64 {
        let tail = &values[values.len() - tail..];
        (tail.iter().map(|v| v * v).sum::<f64>() / tail.len() as f64).sqrt()
    }

    fn run(chain: &mut FilterChain, input: &[f64]) -> Vec<f64> {
        input
            .iter()
            .map(|&v| chain.apply(&SampleVector::new(vec![v])).unwrap().values()[0])
            .collect()
    }

    #[test]
    fn chunked_filtering_matches_single_pass() {
        let mut source = SyntheticSource::new(
            SyntheticConfig {
                seed: Some(11),
                ..SyntheticConfig::default()
            },
            FS,
            9,
        );
        let (_, signal) = source.produce(1000);
        let reference = chain(&[4.0, 60.0], 4, 9).apply_block(&signal).unwrap();

        for chunk in [1usize, 7, 50] {
            let mut chunked = chain(&[4.0, 60.0], 4, 9);
            let mut pieces = Vec::new();
            let mut start = 0;
            while start < signal.ncols() {
                let end = (start + chunk).min(signal.ncols());
                let block = signal.slice(ndarray::s![.., start..end]).to_owned();
                pieces.push(chunked.apply_block(&block).unwrap());
                start = end;
            }
            let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
            let joined = ndarray::concatenate(ndarray::Axis(1), &views).unwrap();
            assert_eq!(joined, reference, "chunk size {chunk}");
        }
    }

    #[test]
    fn per_sample_and_block_paths_agree() {
        let input = sine(10.0, 300);
        let mut a = chain(&[30.0], 3, 1);
        let mut b = chain(&[30.0], 3, 1);
        let by_sample = run(&mut a, &input);
        let block = Array2::from_shape_vec((1, input.len()), input).unwrap();
        let by_block = b.apply_block(&block).unwrap();
        assert_eq!(by_block.row(0).to_vec(), by_sample);
    }

    #[test]
    fn constant_input_has_no_startup_transient() {
        let mut lowpass = chain(&[40.0], 4, 1);
        let out = run(&mut lowpass, &[123.0; 200]);
        assert!(out.iter().all(|v| (v - 123.0).abs() < 1e-6));

        let mut bandpass = chain(&[4.0, 60.0], 4, 1);
        let out = run(&mut bandpass, &[-80.0; 200]);
        assert!(out.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn notch_removes_mains_and_keeps_neighbours() {
        let mut mains = chain(&[100.0], 4, 1);
        let out = run(&mut mains, &sine(60.0, 4000));
        assert!(tail_rms(&out, 1000) < 0.05);

        let mut alpha = chain(&[100.0], 4, 1);
        let out = run(&mut alpha, &sine(20.0, 4000));
        let rms = tail_rms(&out, 1000);
        assert!((rms - 0.5f64.sqrt()).abs() < 0.02, "rms {rms}");
    }

    #[test]
    fn butterworth_gains_match_design() {
        for order in 1..=6 {
            let lp = Stage::new(butterworth(
                RangeTopology::Lowpass { cutoff_hz: 40.0 },
                order,
                FS,
            ));
            assert!((lp.gain_at(0.0, FS) - 1.0).abs() < 1e-9, "order {order}");
            assert!((lp.gain_at(40.0, FS) - 0.5f64.sqrt()).abs() < 1e-6);
            assert!(lp.gain_at(200.0, FS) < 0.1);

            let bp = Stage::new(butterworth(
                RangeTopology::Bandpass {
                    low_hz: 4.0,
                    high_hz: 60.0,
                },
                order,
                FS,
            ));
            assert!(bp.gain_at(0.0, FS) < 1e-9);
            assert!((bp.gain_at(4.0, FS) - 0.5f64.sqrt()).abs() < 1e-6);
            assert!((bp.gain_at(60.0, FS) - 0.5f64.sqrt()).abs() < 1e-6);
            assert!((bp.gain_at(15.5, FS) - 1.0).abs() < 0.02);
        }
    }

    #[test]
    fn bandpass_rejects_drift() {
        let mut bp = chain(&[4.0, 60.0], 4, 1);
        let out = run(&mut bp, &sine(0.5, 6000));
        assert!(tail_rms(&out, 2000) < 0.01);
        assert_eq!(
            bp.topology(),
            RangeTopology::Bandpass {
                low_hz: 4.0,
                high_hz: 60.0
            }
        );
    }

    #[test]
    fn invalid_configuration_is_rejected_at_construction() {
        let bad = [
            FilterConfig {
                cutoffs_hz: vec![250.0],
                ..FilterConfig::default()
            },
            FilterConfig {
                cutoffs_hz: vec![60.0, 4.0],
                ..FilterConfig::default()
            },
            FilterConfig {
                cutoffs_hz: vec![],
                ..FilterConfig::default()
            },
            FilterConfig {
                cutoffs_hz: vec![1.0, 2.0, 3.0],
                ..FilterConfig::default()
            },
            FilterConfig {
                order: 0,
                ..FilterConfig::default()
            },
            FilterConfig {
                order: MAX_ORDER + 1,
                ..FilterConfig::default()
            },
            FilterConfig {
                notch_hz: 300.0,
                ..FilterConfig::default()
            },
            FilterConfig {
                notch_q: 0.0,
                ..FilterConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(
                    FilterChain::new(&config, FS, 9),
                    Err(AcquisitionError::InvalidFilter(_))
                ),
                "accepted {config:?}"
            );
        }
        assert!(matches!(
            FilterChain::new(&FilterConfig::default(), 0.0, 9),
            Err(AcquisitionError::InvalidSampleRate)
        ));
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let mut chain = chain(&[40.0], 2, 9);
        let err = chain.apply(&SampleVector::new(vec![0.0; 8])).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::ChannelMismatch {
                expected: 9,
                actual: 8
            }
        ));
    }
}
