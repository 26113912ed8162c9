//! Welch power spectral density, band power and RMS amplitude over a window.
//!
//! The PSD follows the usual defaults: periodic Hann taper, 50 % overlap,
//! per-segment mean removal, one-sided density scaling, mean across segments.

use std::f64::consts::PI;
use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::Window;
/// Segment length used when no window duration is given.
pub const DEFAULT_SEGMENT: usize = 256;

/// Named closed frequency interval in Hz.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub name: &'static str,
    pub lo_hz: f64,
    pub hi_hz: f64,
}

impl Band {
    pub const fn new(name: &'static str, lo_hz: f64, hi_hz: f64) -> Self {
        Self { name, lo_hz, hi_hz }
    }
    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.lo_hz && freq_hz <= self.hi_hz
    }
}

pub const DELTA: Band = Band::new("Delta", 0.5, 4.0);
pub const THETA: Band = Band::new("Theta", 4.0, 8.0);
pub const ALPHA: Band = Band::new("Alpha", 8.0, 12.0);
pub const BETA1: Band = Band::new("Beta1", 12.0, 18.0);
pub const BETA2: Band = Band::new("Beta2", 18.0, 30.0);
pub const GAMMA: Band = Band::new("Gamma", 30.0, 45.0);

pub const CANONICAL_BANDS: [Band; 6] = [DELTA, THETA, ALPHA, BETA1, BETA2, GAMMA];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandPowerOptions {
    /// Divide by the power over every available bin.
    pub relative: bool,
    /// Welch segment duration; `None` uses `min(256, n)` samples.
    pub window_seconds: Option<f64>,
}

impl BandPowerOptions {
    pub fn relative() -> Self {
        Self {
            relative: true,
            ..Self::default()
        }
    }
}

/// One-sided power spectral density.
#[derive(Clone, Debug, PartialEq)]
pub struct Psd {
    pub frequencies_hz: Vec<f64>,
    pub density: Vec<f64>,
}

impl Psd {
    pub fn resolution_hz(&self) -> f64 {
        match self.frequencies_hz.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }

    /// Trapezoidal integral over the bins inside `band`.
    pub fn integrate(&self, band: &Band) -> f64 {
        let selected: Vec<f64> = self
            .frequencies_hz
            .iter()
            .zip(&self.density)
            .filter(|(f, _)| band.contains(**f))
            .map(|(_, &d)| d)
            .collect();
        trapezoid(&selected, self.resolution_hz())
    }

    pub fn total(&self) -> f64 {
        trapezoid(&self.density, self.resolution_hz())
    }
}

fn trapezoid(values: &[f64], dx: f64) -> f64 {
    values.windows(2).map(|w| (w[0] + w[1]) * 0.5 * dx).sum()
}

/// Welch estimate with `nperseg` samples per segment (clamped to the signal).
///
/// Returns `None` when fewer than two samples are available.
pub fn welch_psd(signal: &[f64], sample_rate_hz: f64, nperseg: usize) -> Option<Psd> {
    let nperseg = nperseg.min(signal.len());
    if nperseg < 2 {
        return None;
    }
    let noverlap = nperseg / 2;
    let step = nperseg - noverlap;
    let segments = (signal.len() - noverlap) / step;

    let taper: Vec<f64> = (0..nperseg)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / nperseg as f64).cos())
        .collect();
    let scale = 1.0 / (sample_rate_hz * taper.iter().map(|w| w * w).sum::<f64>());

    let bins = nperseg / 2 + 1;
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nperseg);
    let mut density = vec![0.0; bins];
    let mut buffer = Vec::with_capacity(nperseg);
    for s in 0..segments {
        let segment = &signal[s * step..s * step + nperseg];
        let mean = segment.iter().sum::<f64>() / nperseg as f64;
        buffer.clear();
        buffer.extend(
            segment
                .iter()
                .zip(&taper)
                .map(|(&x, &w)| Complex64::new((x - mean) * w, 0.0)),
        );
        fft.process(&mut buffer);
        for (k, acc) in density.iter_mut().enumerate() {
            *acc += buffer[k].norm_sqr() * scale;
        }
    }
    let nyquist_bin = (nperseg % 2 == 0).then_some(bins - 1);
    for (k, value) in density.iter_mut().enumerate() {
        *value /= segments as f64;
        if k != 0 && Some(k) != nyquist_bin {
            *value *= 2.0;
        }
    }
    let frequencies_hz = (0..bins)
        .map(|k| k as f64 * sample_rate_hz / nperseg as f64)
        .collect();
    Some(Psd {
        frequencies_hz,
        density,
    })
}

/// Sum of the selected channels, or `None` when nothing valid is selected.
pub fn combine_channels(window: &Window, channels: &[usize]) -> Option<Vec<f64>> {
    let mut combined: Option<Vec<f64>> = None;
    for &c in channels {
        let Some(row) = window.channel(c) else {
            log::trace!("ignoring channel {c} outside a {}-channel window", window.num_channels());
            continue;
        };
        match combined.as_mut() {
            Some(acc) => acc.iter_mut().zip(row.iter()).for_each(|(a, v)| *a += v),
            None => combined = Some(row.to_vec()),
        }
    }
    combined
}

fn combined_psd(window: &Window, channels: &[usize], options: &BandPowerOptions) -> Option<Psd> {
    let combined = combine_channels(window, channels)?;
    let fs = window.sample_rate_hz();
    let nperseg = match options.window_seconds {
        Some(seconds) => (seconds * fs) as usize,
        None => DEFAULT_SEGMENT.min(combined.len()),
    };
    welch_psd(&combined, fs, nperseg)
}

/// Power of the summed `channels` inside `band`.
///
/// `None` means "no input": no selected channel exists in the window or the
/// window holds fewer than two samples.
pub fn band_power(
    window: &Window,
    channels: &[usize],
    band: &Band,
    options: &BandPowerOptions,
) -> Option<f64> {
    let psd = combined_psd(window, channels, options)?;
    Some(power_in(&psd, band, options.relative))
}

/// Band power for a whole set of bands, computing the PSD once.
pub fn band_powers(
    window: &Window,
    channels: &[usize],
    bands: &[Band],
    options: &BandPowerOptions,
) -> Option<Vec<(Band, f64)>> {
    let psd = combined_psd(window, channels, options)?;
    Some(
        bands
            .iter()
            .map(|band| (*band, power_in(&psd, band, options.relative)))
            .collect(),
    )
}

fn power_in(psd: &Psd, band: &Band, relative: bool) -> f64 {
    let power = psd.integrate(band);
    if !relative {
        return power;
    }
    let total = psd.total();
    if total > 0.0 {
        power / total
    } else {
        0.0
    }
}

/// Root-mean-square amplitude of every channel, or `None` for an empty window.
pub fn vrms(window: &Window) -> Option<Vec<f64>> {
    if window.is_empty() {
        return None;
    }
    let n = window.len() as f64;
    Some(
        window
            .values()
            .outer_iter()
            .map(|row| (row.iter().map(|v| v * v).sum::<f64>() / n).sqrt())
            .collect(),
    )
}
