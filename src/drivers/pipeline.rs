use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use ndarray::Array2;
use parking_lot::Mutex;
use crate::config::AcquisitionConfig;
use crate::drivers::bands::{self, Band, BandPowerOptions, CANONICAL_BANDS};
use crate::drivers::error::AcquisitionError;
use crate::drivers::fft::{self, Spectrum};
use crate::drivers::filter::FilterChain;
use crate::drivers::serial::SerialSource;
use crate::drivers::source::{AcquisitionSource, SignalSource, SourceKind};
use crate::drivers::synthetic::SyntheticSource;
use crate::drivers::{SampleStore, Window};
/// Pause between polls when the source has nothing to deliver.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Opening,
    Streaming,
    Stopped,
    Error,
}

/// State the producer thread reports back through.
struct Shared {
    state: Mutex<AcquisitionState>,
    last_error: Mutex<Option<AcquisitionError>>,
    source_kind: Mutex<Option<SourceKind>>,
}

impl Shared {
    fn fail(&self, error: AcquisitionError) {
        *self.last_error.lock() = Some(error);
        *self.state.lock() = AcquisitionState::Error;
    }
}

struct Worker {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    done: Receiver<()>,
}

/// Owns the acquisition thread and the shared sample store.
///
/// Consumers pull windows and analyses from it on their own schedule; the
/// producer never waits on them.
pub struct AcquisitionController {
    config: AcquisitionConfig,
    store: Arc<SampleStore>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    injected: Option<AcquisitionSource>,
    recording_from: Option<u64>,
}

impl AcquisitionController {
    /// Validates the whole configuration, filter included, and allocates the store.
    pub fn new(config: AcquisitionConfig) -> Result<Self, AcquisitionError> {
        config.validate()?;
        FilterChain::new(&config.filter, config.sample_rate_hz, config.channels)?;
        let store = SampleStore::new(
            config.channels,
            config.history_capacity,
            config.sample_rate_hz,
        )?;
        Ok(Self {
            config,
            store: Arc::new(store),
            shared: Arc::new(Shared {
                state: Mutex::new(AcquisitionState::Idle),
                last_error: Mutex::new(None),
                source_kind: Mutex::new(None),
            }),
            worker: None,
            injected: None,
            recording_from: None,
        })
    }

    /// Like `new`, but the first `start()` drives `source` instead of opening a port.
    pub fn with_source(
        config: AcquisitionConfig,
        source: impl Into<AcquisitionSource>,
    ) -> Result<Self, AcquisitionError> {
        let mut controller = Self::new(config)?;
        controller.injected = Some(source.into());
        Ok(controller)
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn state(&self) -> AcquisitionState {
        *self.shared.state.lock()
    }

    /// True while the producer thread is delivering samples.
    pub fn is_ready(&self) -> bool {
        self.state() == AcquisitionState::Streaming
            && self
                .worker
                .as_ref()
                .map_or(false, |w| w.running.load(Ordering::Acquire))
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        *self.shared.source_kind.lock()
    }

    /// Takes the most recent connectivity error, if any.
    pub fn take_error(&self) -> Option<AcquisitionError> {
        self.shared.last_error.lock().take()
    }

    /// Handle for consumers living on other threads.
    pub fn store(&self) -> Arc<SampleStore> {
        self.store.clone()
    }

    /// Starts (or restarts) acquisition with a fresh filter chain.
    ///
    /// A port that cannot be opened is reported through `take_error` and
    /// replaced by the synthetic generator; the call still succeeds.
    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if matches!(
            self.state(),
            AcquisitionState::Opening | AcquisitionState::Streaming
        ) {
            return Err(AcquisitionError::AlreadyRunning);
        }
        self.reap_worker()?;
        let chain = FilterChain::new(
            &self.config.filter,
            self.config.sample_rate_hz,
            self.config.channels,
        )?;

        self.set_state(AcquisitionState::Opening);
        *self.shared.last_error.lock() = None;
        let source = match self.injected.take() {
            Some(source) => source,
            None => self.open_source(),
        };
        let kind = source.kind();
        // Streaming before the thread exists, so an early read failure is not overwritten.
        *self.shared.source_kind.lock() = Some(kind);
        self.set_state(AcquisitionState::Streaming);

        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = mpsc::channel();
        let handle = {
            let store = self.store.clone();
            let shared = self.shared.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("acquisition".into())
                .spawn(move || produce(source, chain, store, shared, running, done_tx))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("failed to spawn acquisition thread: {e}");
                self.set_state(AcquisitionState::Error);
                return Err(AcquisitionError::Io(e));
            }
        };
        self.worker = Some(Worker {
            handle,
            running,
            done: done_rx,
        });
        log::info!("acquisition streaming from {kind} source");
        Ok(())
    }

    /// Stops the producer, waiting at most the configured stop timeout.
    ///
    /// A thread that overruns the timeout is kept and joined by the next
    /// `start()`, which refuses to open a new source while it is alive.
    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.running.store(false, Ordering::Release);
        let timeout = self.config.device.stop_timeout();
        let outcome = match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    self.shared.fail(AcquisitionError::ThreadPanicked);
                    return Err(AcquisitionError::ThreadPanicked);
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("acquisition thread still busy after {timeout:?}");
                self.worker = Some(worker);
                Err(AcquisitionError::StopTimedOut(timeout))
            }
        };
        {
            let mut state = self.shared.state.lock();
            if *state == AcquisitionState::Streaming {
                *state = AcquisitionState::Stopped;
            }
        }
        log::info!("acquisition stopped ({} samples held)", self.store.size());
        outcome
    }

    /// The most recent `min(length, size)` filtered samples.
    pub fn window(&self, length: usize) -> Window {
        self.store.window(length)
    }

    /// Window sized for the waveform view.
    pub fn plot_window(&self) -> Window {
        self.window(self.config.plot_length)
    }

    pub fn spectrum(&self, window: &Window, fmin_hz: f64, fmax_hz: f64) -> Spectrum {
        fft::spectrum(window, fmin_hz, fmax_hz)
    }

    /// Spectrum over the configured length and frequency range.
    ///
    /// Until the store holds `spectrum_length` samples the window is
    /// zero-padded, so the bin grid never changes.
    pub fn latest_spectrum(&self) -> Spectrum {
        let window = self.window(self.config.spectrum_length);
        fft::spectrum_with_length(
            &window,
            self.config.spectrum_length,
            self.config.spectrum_fmin_hz,
            self.config.spectrum_fmax_hz,
        )
    }

    pub fn band_power(
        &self,
        window: &Window,
        channels: &[usize],
        band: &Band,
        relative: bool,
    ) -> Option<f64> {
        let options = BandPowerOptions {
            relative,
            ..BandPowerOptions::default()
        };
        bands::band_power(window, channels, band, &options)
    }

    /// Canonical band powers over the configured band-power window.
    pub fn latest_band_powers(&self, channels: &[usize], relative: bool) -> Option<Vec<(Band, f64)>> {
        let window = self.window(self.config.band_power_length);
        let options = BandPowerOptions {
            relative,
            ..BandPowerOptions::default()
        };
        bands::band_powers(&window, channels, &CANONICAL_BANDS, &options)
    }

    /// Per-channel RMS amplitude over the waveform window.
    pub fn latest_vrms(&self) -> Option<Vec<f64>> {
        bands::vrms(&self.plot_window())
    }

    /// Marks the current position; `stop_recording` returns everything after it.
    pub fn start_recording(&mut self) {
        self.recording_from = Some(self.store.total_pushed());
    }

    /// Filtered samples (`channels x n`) since `start_recording`, limited to
    /// what the ring still holds. Empty when no recording was started.
    pub fn stop_recording(&mut self) -> Array2<f64> {
        match self.recording_from.take() {
            Some(index) => self.store.since(index).into_values(),
            None => Array2::zeros((self.config.channels, 0)),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording_from.is_some()
    }

    fn set_state(&self, state: AcquisitionState) {
        *self.shared.state.lock() = state;
    }

    fn open_source(&self) -> AcquisitionSource {
        let Some(port) = self.config.device.port.as_deref() else {
            log::info!("no device port configured; using synthetic source");
            return self.synthetic_source();
        };
        match SerialSource::open(&self.config.device, port, self.config.channels) {
            Ok(source) => source.into(),
            Err(e) => {
                log::warn!("{e}; falling back to synthetic source");
                self.shared.fail(e);
                self.synthetic_source()
            }
        }
    }

    fn synthetic_source(&self) -> AcquisitionSource {
        SyntheticSource::new(
            self.config.synthetic.clone(),
            self.config.sample_rate_hz,
            self.config.channels,
        )
        .paced()
        .into()
    }

    // Joins a worker that died on a read error or overran `stop()`.
    fn reap_worker(&mut self) -> Result<(), AcquisitionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.running.store(false, Ordering::Release);
        let timeout = self.config.device.stop_timeout();
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::warn!("previous acquisition thread panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.worker = Some(worker);
                Err(AcquisitionError::StopTimedOut(timeout))
            }
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("error while stopping acquisition: {e}");
        }
    }
}

/// Producer loop: read, filter, store, until told to stop or the link fails.
fn produce(
    mut source: AcquisitionSource,
    mut chain: FilterChain,
    store: Arc<SampleStore>,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    done: Sender<()>,
) {
    let outcome = loop {
        if !running.load(Ordering::Acquire) {
            break Ok(());
        }
        match source.next_sample() {
            Ok(Some(sample)) => {
                if let Err(e) = chain.apply(&sample).and_then(|filtered| store.push(&filtered)) {
                    log::debug!("dropping sample: {e}");
                }
            }
            Ok(None) => thread::sleep(IDLE_BACKOFF),
            Err(e) => break Err(e),
        }
    };
    if let Err(e) = source.close() {
        log::warn!("error while closing {} source: {e}", source.kind());
    }
    running.store(false, Ordering::Release);
    if let Err(e) = outcome {
        log::error!("acquisition stopped on {} source: {e}", source.kind());
        shared.fail(e);
    }
    let _ = done.send(());
}
