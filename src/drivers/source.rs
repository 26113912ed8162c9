use std::collections::VecDeque;
use std::fmt;
use crate::drivers::serial::SerialSource;
use crate::drivers::synthetic::SyntheticSource;
use crate::drivers::AcquisitionError;
/// One reading per channel, produced once per acquisition tick.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleVector {
    values: Vec<f64>,
}

impl SampleVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
    pub fn values(&self) -> &[f64] {
        &self.values
    }
    pub fn num_channels(&self) -> usize {
        self.values.len()
    }
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

impl From<Vec<f64>> for SampleVector {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Serial,
    Synthetic,
    Replay,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Serial => "serial",
            SourceKind::Synthetic => "synthetic",
            SourceKind::Replay => "replay",
        };
        f.write_str(name)
    }
}

/// Something that can yield sample vectors on demand.
///
/// `Ok(None)` means "nothing available right now"; the caller is expected to
/// wait briefly and ask again. Errors are reserved for a broken link.
pub trait SignalSource: Send {
    fn next_sample(&mut self) -> Result<Option<SampleVector>, AcquisitionError>;
    fn is_ready(&self) -> bool;
    fn kind(&self) -> SourceKind;
    fn close(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }
}

/// In-memory source useful for tests and deterministic playback.
pub struct ReplaySource {
    queue: VecDeque<SampleVector>,
}

impl ReplaySource {
    pub fn new(samples: impl IntoIterator<Item = SampleVector>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
        }
    }
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl SignalSource for ReplaySource {
    fn next_sample(&mut self) -> Result<Option<SampleVector>, AcquisitionError> {
        Ok(self.queue.pop_front())
    }
    fn is_ready(&self) -> bool {
        true
    }
    fn kind(&self) -> SourceKind {
        SourceKind::Replay
    }
}

/// The closed set of sources the controller can drive.
pub enum AcquisitionSource {
    Serial(SerialSource),
    Synthetic(SyntheticSource),
    Replay(ReplaySource),
}

impl SignalSource for AcquisitionSource {
    fn next_sample(&mut self) -> Result<Option<SampleVector>, AcquisitionError> {
        match self {
            AcquisitionSource::Serial(source) => source.next_sample(),
            AcquisitionSource::Synthetic(source) => source.next_sample(),
            AcquisitionSource::Replay(source) => source.next_sample(),
        }
    }
    fn is_ready(&self) -> bool {
        match self {
            AcquisitionSource::Serial(source) => source.is_ready(),
            AcquisitionSource::Synthetic(source) => source.is_ready(),
            AcquisitionSource::Replay(source) => source.is_ready(),
        }
    }
    fn kind(&self) -> SourceKind {
        match self {
            AcquisitionSource::Serial(source) => source.kind(),
            AcquisitionSource::Synthetic(source) => source.kind(),
            AcquisitionSource::Replay(source) => source.kind(),
        }
    }
    fn close(&mut self) -> Result<(), AcquisitionError> {
        match self {
            AcquisitionSource::Serial(source) => source.close(),
            AcquisitionSource::Synthetic(source) => source.close(),
            AcquisitionSource::Replay(source) => source.close(),
        }
    }
}

impl From<SerialSource> for AcquisitionSource {
    fn from(source: SerialSource) -> Self {
        AcquisitionSource::Serial(source)
    }
}

impl From<SyntheticSource> for AcquisitionSource {
    fn from(source: SyntheticSource) -> Self {
        AcquisitionSource::Synthetic(source)
    }
}

impl From<ReplaySource> for AcquisitionSource {
    fn from(source: ReplaySource) -> Self {
        AcquisitionSource::Replay(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn replay_yields_in_order_then_runs_dry() {
        let mut source = AcquisitionSource::from(ReplaySource::new(vec![
            SampleVector::new(vec![1.0, 2.0]),
            SampleVector::new(vec![3.0, 4.0]),
        ]));
        assert_eq!(source.kind(), SourceKind::Replay);
        assert!(source.is_ready());
        assert_eq!(source.next_sample().unwrap().unwrap().values(), &[1.0, 2.0]);
        assert_eq!(source.next_sample().unwrap().unwrap().values(), &[3.0, 4.0]);
        assert!(source.next_sample().unwrap().is_none());
    }
}
