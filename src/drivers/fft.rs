use ndarray::Array2;
use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::Window;
/// Magnitude spectrum for each channel of a window.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub sample_rate_hz: f64,
    /// Transform length; zero for an empty spectrum.
    pub nfft: usize,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Array2<f64>, // channel x bins
}

impl Spectrum {
    pub fn is_empty(&self) -> bool {
        self.frequencies_hz.is_empty()
    }
    pub fn bin_width_hz(&self) -> f64 {
        if self.nfft == 0 {
            0.0
        } else {
            self.sample_rate_hz / self.nfft as f64
        }
    }
}

/// `|rfft|` of every channel over the full window, restricted to `[fmin, fmax]`.
///
/// The bounds are swapped when given in the wrong order.
pub fn spectrum(window: &Window, fmin_hz: f64, fmax_hz: f64) -> Spectrum {
    spectrum_with_length(window, window.len(), fmin_hz, fmax_hz)
}

/// Like [`spectrum`] with a fixed transform length.
///
/// Shorter windows are zero-padded to `nfft` and longer ones truncated to
/// their first `nfft` samples, so the bin grid only depends on `nfft`.
/// An empty window still yields an empty spectrum.
pub fn spectrum_with_length(window: &Window, nfft: usize, fmin_hz: f64, fmax_hz: f64) -> Spectrum {
    let (lo, hi) = if fmin_hz > fmax_hz {
        (fmax_hz, fmin_hz)
    } else {
        (fmin_hz, fmax_hz)
    };
    let fs = window.sample_rate_hz();
    if nfft == 0 || window.is_empty() {
        return Spectrum {
            sample_rate_hz: fs,
            nfft: 0,
            frequencies_hz: Vec::new(),
            magnitudes: Array2::zeros((window.num_channels(), 0)),
        };
    }
    let bins: Vec<usize> = (0..=nfft / 2)
        .filter(|&k| {
            let freq = k as f64 * fs / nfft as f64;
            freq >= lo && freq <= hi
        })
        .collect();
    let frequencies_hz = bins.iter().map(|&k| k as f64 * fs / nfft as f64).collect();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nfft);
    let mut magnitudes = Array2::zeros((window.num_channels(), bins.len()));
    let mut buffer = Vec::with_capacity(nfft);
    for (channel, mut row) in window
        .values()
        .outer_iter()
        .zip(magnitudes.outer_iter_mut())
    {
        buffer.clear();
        buffer.extend(channel.iter().take(nfft).map(|&v| Complex64::new(v, 0.0)));
        buffer.resize(nfft, Complex64::new(0.0, 0.0));
        fft.process(&mut buffer);
        for (slot, &k) in row.iter_mut().zip(&bins) {
            *slot = buffer[k].norm();
        }
    }
    Spectrum {
        sample_rate_hz: fs,
        nfft,
        frequencies_hz,
        magnitudes,
    }
}
