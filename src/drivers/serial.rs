use std::io::{self, BufRead, BufReader, Read, Write};
use crate::config::DeviceConfig;
use crate::drivers::source::{SampleVector, SignalSource, SourceKind};
use crate::drivers::AcquisitionError;
/// Control byte that tells the firmware to begin streaming.
pub const START_STREAMING: u8 = b'1';
const RECORD_PREFIX: &str = "Channel:";
/// Longest line kept while waiting for its newline; a 9-field record is far shorter.
pub const MAX_LINE_BYTES: usize = 256;

/// Anything a line-oriented device can be read from and written to.
pub trait DeviceLink: Read + Write + Send {}
impl<T: Read + Write + Send + ?Sized> DeviceLink for T {}

/// Physical source reading `Channel:` text records from a serial link.
pub struct SerialSource {
    link: Option<BufReader<Box<dyn DeviceLink>>>,
    description: String,
    channels: usize,
    pending: Vec<u8>,
    discarding: bool,
    dropped_lines: u64,
}

impl SerialSource {
    /// Opens `port`, discards stale input and sends the start handshake.
    pub fn open(
        device: &DeviceConfig,
        port: &str,
        channels: usize,
    ) -> Result<Self, AcquisitionError> {
        let port_error = |source| AcquisitionError::PortOpen {
            port: port.to_string(),
            source,
        };
        let handle = serialport::new(port, device.baud_rate)
            .timeout(device.read_timeout())
            .open()
            .map_err(port_error)?;
        handle
            .clear(serialport::ClearBuffer::Input)
            .map_err(port_error)?;
        log::info!("opened serial port {port} at {} baud", device.baud_rate);
        Self::from_link(Box::new(handle), port, channels)
    }

    /// Wraps an already open link and performs the handshake on it.
    pub fn from_link(
        mut link: Box<dyn DeviceLink>,
        description: impl Into<String>,
        channels: usize,
    ) -> Result<Self, AcquisitionError> {
        link.write_all(&[START_STREAMING])?;
        link.flush()?;
        Ok(Self {
            link: Some(BufReader::new(link)),
            description: description.into(),
            channels,
            pending: Vec::with_capacity(128),
            discarding: false,
            dropped_lines: 0,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Lines read so far that did not match the record schema.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }
}

impl SignalSource for SerialSource {
    fn next_sample(&mut self) -> Result<Option<SampleVector>, AcquisitionError> {
        let Some(reader) = self.link.as_mut() else {
            return Err(AcquisitionError::LinkClosed);
        };
        loop {
            let available = match reader.fill_buf() {
                // A partial record before EOF is lost with the link.
                Ok([]) => return Err(AcquisitionError::LinkClosed),
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(AcquisitionError::Io(e)),
            };
            let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..=end], true),
                None => (available, false),
            };
            let used = chunk.len();
            // While discarding, bytes up to the next newline belong to an over-long line.
            if !self.discarding {
                if self.pending.len() + used > MAX_LINE_BYTES {
                    self.pending.clear();
                    self.discarding = true;
                    self.dropped_lines += 1;
                    log::trace!("dropping line longer than {MAX_LINE_BYTES} bytes");
                } else {
                    self.pending.extend_from_slice(chunk);
                }
            }
            reader.consume(used);
            if !complete || std::mem::take(&mut self.discarding) {
                continue;
            }
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            match parse_record(&line, self.channels) {
                Some(values) => return Ok(Some(SampleVector::new(values))),
                None => {
                    self.dropped_lines += 1;
                    log::trace!("dropping malformed line {:?}", line.trim());
                }
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.link.is_some()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Serial
    }

    fn close(&mut self) -> Result<(), AcquisitionError> {
        if let Some(mut reader) = self.link.take() {
            reader.get_mut().flush()?;
            log::info!("closed serial link {}", self.description);
        }
        Ok(())
    }
}

impl Drop for SerialSource {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Parses `Channel:v1,...,vN`; anything else yields `None`.
///
/// Each value must look like `-?\d+\.?\d*`, with no surrounding whitespace.
pub fn parse_record(line: &str, channels: usize) -> Option<Vec<f64>> {
    let body = line.trim().strip_prefix(RECORD_PREFIX)?;
    let mut values = Vec::with_capacity(channels);
    for field in body.split(',') {
        if !is_signed_decimal(field) {
            return None;
        }
        values.push(field.parse::<f64>().ok()?);
    }
    (values.len() == channels).then_some(values)
}

fn is_signed_decimal(field: &str) -> bool {
    let digits = field.strip_prefix('-').unwrap_or(field);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };
    !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{self, Cursor, Read, Write};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use parking_lot::Mutex;
    /// In-memory link: reads come from a script, writes are captured.
    pub struct ScriptedLink {
        input: Cursor<Vec<u8>>,
        pub written: Arc<Mutex<Vec<u8>>>,
        stall_when_drained: bool,
        read_delay: Option<Duration>,
    }

    impl ScriptedLink {
        /// Reports EOF once the script is consumed.
        pub fn closing(script: &str) -> Self {
            Self {
                input: Cursor::new(script.as_bytes().to_vec()),
                written: Arc::new(Mutex::new(Vec::new())),
                stall_when_drained: false,
                read_delay: None,
            }
        }

        /// Reports read timeouts forever once the script is consumed.
        pub fn stalling(script: &str) -> Self {
            Self {
                stall_when_drained: true,
                ..Self::closing(script)
            }
        }

        /// Blocks for `delay` on every read, then reports a timeout.
        pub fn sluggish(delay: Duration) -> Self {
            Self {
                read_delay: Some(delay),
                ..Self::stalling("")
            }
        }
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(delay) = self.read_delay {
                thread::sleep(delay);
            }
            let n = self.input.read(buf)?;
            if n == 0 && self.stall_when_drained {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            Ok(n)
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
