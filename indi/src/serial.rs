//! Blocking serial line helpers
//!
//! Drivers talk to hardware through [`Tty`], a thin layer over a
//! [`SerialIo`] port. All calls are synchronous and block the driver for at
//! most their timeout; the event loop is single-threaded so nothing else runs
//! meanwhile. Failures come back as [`TtyError`], whose messages read the
//! way clients have always seen them in device messages.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use serialport::{DataBits, FlowControl, SerialPort, StopBits};

use crate::options::SerialTimeouts;

/// Line rates accepted by [`Tty::connect`].
pub const SUPPORTED_BIT_RATES: [u32; 18] = [
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400,
];

/// Serial line errors
#[derive(Debug, thiserror::Error)]
pub enum TtyError {
    #[error("Read Error: {0}")]
    Read(#[source] io::Error),
    #[error("Write Error: {0}")]
    Write(#[source] io::Error),
    #[error("Select Error: {0}")]
    Select(#[source] io::Error),
    #[error("Timeout error")]
    TimeOut,
    #[error("Port failure Error: {reason}. {hint}")]
    PortFailure { reason: String, hint: &'static str },
    #[error("Parameter error")]
    Param,
    #[error("{0}")]
    Errno(#[source] io::Error),
    #[error("Read overflow")]
    Overflow,
    #[error("Port is busy")]
    PortBusy,
}

pub type TtyResult<T> = Result<T, TtyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl TryFrom<i32> for Parity {
    type Error = TtyError;

    fn try_from(value: i32) -> TtyResult<Self> {
        match value {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Even),
            2 => Ok(Parity::Odd),
            _ => Err(TtyError::Param),
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

fn data_bits(word_size: u8) -> TtyResult<DataBits> {
    match word_size {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(TtyError::Param),
    }
}

fn stop_bits(count: u8) -> TtyResult<StopBits> {
    match count {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(TtyError::Param),
    }
}

/// Byte stream the [`Tty`] helpers drive.
///
/// Reads must return `TimedOut` (or `WouldBlock`) once the configured
/// timeout passes without data.
pub trait SerialIo: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard anything queued in either direction.
    fn flush_io(&mut self) -> io::Result<()>;
}

impl SerialIo for dyn SerialPort {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        SerialPort::set_timeout(self, timeout).map_err(io::Error::from)
    }

    fn flush_io(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::All).map_err(io::Error::from)
    }
}

impl<S: SerialIo + ?Sized> SerialIo for Box<S> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn flush_io(&mut self) -> io::Result<()> {
        (**self).flush_io()
    }
}

fn port_failure(err: &serialport::Error) -> TtyError {
    let hint = match err.kind {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            "Try adding your user to the dialout group and restart (sudo adduser $USER dialout)"
        }
        _ => "Check if device is connected to this port.",
    };
    TtyError::PortFailure {
        reason: err.description.clone(),
        hint,
    }
}

fn is_busy(err: &serialport::Error) -> bool {
    err.description.to_ascii_lowercase().contains("busy")
}

/// An open serial line
pub struct Tty<P: SerialIo = Box<dyn SerialPort>> {
    port: P,
    name: String,
    clear_leading_lf: bool,
}

impl Tty {
    /// Open `path` with default timeouts.
    pub fn connect(
        path: &str,
        bit_rate: u32,
        word_size: u8,
        parity: Parity,
        stop: u8,
    ) -> TtyResult<Self> {
        Self::connect_with(path, bit_rate, word_size, parity, stop, &SerialTimeouts::default())
    }

    /// Open `path` in raw mode.
    ///
    /// The port is opened exclusively except for Bluetooth `rfcomm` links.
    /// A busy port is retried `timeouts.connect_retries` times before giving
    /// up with [`TtyError::PortBusy`].
    pub fn connect_with(
        path: &str,
        bit_rate: u32,
        word_size: u8,
        parity: Parity,
        stop: u8,
        timeouts: &SerialTimeouts,
    ) -> TtyResult<Self> {
        if !SUPPORTED_BIT_RATES.contains(&bit_rate) {
            return Err(TtyError::Param);
        }
        let builder = serialport::new(path, bit_rate)
            .data_bits(data_bits(word_size)?)
            .parity(parity.into())
            .stop_bits(stop_bits(stop)?)
            .flow_control(FlowControl::None)
            .timeout(timeouts.response_timeout());

        let attempts = timeouts.connect_retries.max(1);
        for attempt in 1..=attempts {
            match builder.clone().open_native() {
                Ok(mut port) => {
                    if path.contains("rfcomm") {
                        port.set_exclusive(false).map_err(|e| port_failure(&e))?;
                    }
                    tracing::info!("Connected to {} at {} baud", path, bit_rate);
                    let port: Box<dyn SerialPort> = Box::new(port);
                    return Ok(Tty::from_port(path, port));
                }
                Err(e) if is_busy(&e) => {
                    tracing::warn!(
                        "Port {} is busy (attempt {}/{})",
                        path,
                        attempt,
                        attempts
                    );
                    if attempt < attempts {
                        thread::sleep(timeouts.connect_backoff());
                    }
                }
                Err(e) => return Err(port_failure(&e)),
            }
        }
        Err(TtyError::PortBusy)
    }
}

impl<P: SerialIo> Tty<P> {
    pub fn from_port(name: &str, port: P) -> Self {
        Self {
            port,
            name: name.to_string(),
            clear_leading_lf: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop a stray `\n` at the start of each read. Some controllers
    /// terminate replies with CR LF and leave the LF for the next command.
    pub fn set_clear_leading_lf(&mut self, enabled: bool) {
        self.clear_leading_lf = enabled;
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Next chunk from the port. `Ok(0)` never escapes; it is a timeout.
    fn read_some(&mut self, buf: &mut [u8]) -> TtyResult<usize> {
        loop {
            match self.port.read(buf) {
                Ok(0) => return Err(TtyError::TimeOut),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    return Err(TtyError::TimeOut)
                }
                Err(e) => return Err(TtyError::Read(e)),
            }
        }
    }

    fn arm(&mut self, timeout: Duration) -> TtyResult<()> {
        self.port.set_timeout(timeout).map_err(TtyError::Select)
    }

    /// Fill `buf` completely. Each chunk must arrive within `timeout`.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> TtyResult<usize> {
        if buf.is_empty() {
            return Err(TtyError::Param);
        }
        self.arm(timeout)?;

        let mut filled = 0;
        while filled < buf.len() {
            let mut n = self.read_some(&mut buf[filled..])?;
            if self.clear_leading_lf && filled == 0 && buf[0] == b'\n' {
                buf.copy_within(1..n, 0);
                n -= 1;
            }
            filled += n;
        }
        tracing::debug!("{}: read {:02X?}", self.name, &buf[..filled]);
        Ok(filled)
    }

    /// Read byte by byte up to and including `stop`.
    pub fn read_section(&mut self, stop: u8, timeout: Duration) -> TtyResult<Vec<u8>> {
        self.arm(timeout)?;

        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.read_some(&mut byte)?;
            if self.clear_leading_lf && out.is_empty() && byte[0] == b'\n' {
                continue;
            }
            out.push(byte[0]);
            if byte[0] == stop {
                break;
            }
        }
        tracing::debug!("{}: read {:?}", self.name, String::from_utf8_lossy(&out));
        Ok(out)
    }

    /// Like [`Tty::read_section`] but into a fixed buffer. Filling `buf`
    /// without seeing `stop` is [`TtyError::Overflow`].
    pub fn nread_section(
        &mut self,
        buf: &mut [u8],
        stop: u8,
        timeout: Duration,
    ) -> TtyResult<usize> {
        if buf.is_empty() {
            return Err(TtyError::Param);
        }
        self.arm(timeout)?;

        let mut filled = 0;
        let mut byte = [0u8; 1];
        while filled < buf.len() {
            self.read_some(&mut byte)?;
            if self.clear_leading_lf && filled == 0 && byte[0] == b'\n' {
                continue;
            }
            buf[filled] = byte[0];
            filled += 1;
            if byte[0] == stop {
                tracing::debug!("{}: read {:02X?}", self.name, &buf[..filled]);
                return Ok(filled);
            }
        }
        Err(TtyError::Overflow)
    }

    /// Write all of `data`.
    pub fn write(&mut self, data: &[u8]) -> TtyResult<usize> {
        tracing::debug!("{}: write {:02X?}", self.name, data);
        let mut written = 0;
        while written < data.len() {
            match self.port.write(&data[written..]) {
                Ok(0) => {
                    return Err(TtyError::Write(io::Error::from(io::ErrorKind::WriteZero)))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TtyError::Write(e)),
            }
        }
        self.port.flush().map_err(TtyError::Write)?;
        Ok(written)
    }

    pub fn write_string(&mut self, text: &str) -> TtyResult<usize> {
        self.write(text.as_bytes())
    }

    /// Discard pending input and output.
    pub fn flush(&mut self) -> TtyResult<()> {
        self.port.flush_io().map_err(TtyError::Errno)
    }

    /// Flush and close the line.
    pub fn disconnect(mut self) -> TtyResult<()> {
        self.flush()?;
        tracing::info!("Disconnected from {}", self.name);
        Ok(())
    }
}

impl<P: SerialIo + 'static> Tty<P> {
    /// Erase the port type so real and simulated lines can share one
    /// field type.
    pub fn into_boxed(self) -> Tty<Box<dyn SerialIo>> {
        Tty {
            port: Box::new(self.port),
            name: self.name,
            clear_leading_lf: self.clear_leading_lf,
        }
    }
}

impl Tty<Box<dyn SerialIo>> {
    pub fn boxed<P: SerialIo + 'static>(name: &str, port: P) -> Self {
        Tty::from_port(name, port).into_boxed()
    }
}

/// Additive 8-bit checksum.
pub fn checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// `payload` followed by its [`checksum8`].
pub fn frame_with_checksum(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(checksum8(payload));
    frame
}

pub fn verify_checksum(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((sum, payload)) => checksum8(payload) == *sum,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory port. Reads hand out at most `chunk` bytes and time out
    /// once the queue is empty.
    struct MemoryPort {
        input: VecDeque<u8>,
        chunk: usize,
        written: Vec<u8>,
        timeout: Duration,
        cleared: bool,
    }

    impl MemoryPort {
        fn new(input: &[u8], chunk: usize) -> Self {
            Self {
                input: input.iter().copied().collect(),
                chunk,
                written: Vec::new(),
                timeout: Duration::ZERO,
                cleared: false,
            }
        }
    }

    impl Read for MemoryPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            let n = buf.len().min(self.chunk).min(self.input.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.input.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MemoryPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // Short writes exercise the write loop.
            let n = buf.len().min(3);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialIo for MemoryPort {
        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn flush_io(&mut self) -> io::Result<()> {
            self.input.clear();
            self.cleared = true;
            Ok(())
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[test]
    fn test_read_fills_buffer_across_chunks() {
        let mut tty = Tty::from_port("mem", MemoryPort::new(b"FD012345X", 2));
        let mut buf = [0u8; 9];
        assert_eq!(tty.read(&mut buf, TIMEOUT).unwrap(), 9);
        assert_eq!(&buf, b"FD012345X");
        assert_eq!(tty.port_mut().timeout, TIMEOUT);
    }

    #[test]
    fn test_read_times_out_when_short() {
        let mut tty = Tty::from_port("mem", MemoryPort::new(b"FD0", 4));
        let mut buf = [0u8; 9];
        assert!(matches!(tty.read(&mut buf, TIMEOUT), Err(TtyError::TimeOut)));
    }

    #[test]
    fn test_read_section_includes_stop() {
        let mut tty = Tty::from_port("mem", MemoryPort::new(b"OK#rest", 8));
        assert_eq!(tty.read_section(b'#', TIMEOUT).unwrap(), b"OK#".to_vec());
        assert_eq!(tty.read_section(b'#', TIMEOUT).unwrap_err().to_string(), "Timeout error");
    }

    #[test]
    fn test_clear_leading_lf() {
        let mut tty = Tty::from_port("mem", MemoryPort::new(b"\nABC\r\nDEF\r", 8));
        tty.set_clear_leading_lf(true);
        let mut buf = [0u8; 3];
        tty.read(&mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf, b"ABC");
        tty.read_section(b'\r', TIMEOUT).unwrap();
        assert_eq!(tty.read_section(b'\r', TIMEOUT).unwrap(), b"DEF\r".to_vec());
    }

    #[test]
    fn test_nread_section_overflow() {
        let mut tty = Tty::from_port("mem", MemoryPort::new(b"123456#", 1));
        let mut small = [0u8; 4];
        assert!(matches!(
            tty.nread_section(&mut small, b'#', TIMEOUT),
            Err(TtyError::Overflow)
        ));

        let mut tty = Tty::from_port("mem", MemoryPort::new(b"12#", 1));
        let mut buf = [0u8; 8];
        assert_eq!(tty.nread_section(&mut buf, b'#', TIMEOUT).unwrap(), 3);
        assert_eq!(&buf[..3], b"12#");
    }

    #[test]
    fn test_write_loops_over_short_writes() {
        let mut tty = Tty::from_port("mem", MemoryPort::new(b"", 1));
        assert_eq!(tty.write_string("FG000100").unwrap(), 8);
        assert_eq!(tty.port_mut().written, b"FG000100".to_vec());
    }

    #[test]
    fn test_disconnect_flushes() {
        let mut tty = Tty::boxed("mem", MemoryPort::new(b"junk", 4));
        tty.flush().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(tty.read(&mut buf, TIMEOUT), Err(TtyError::TimeOut)));
        tty.disconnect().unwrap();
    }

    #[test]
    fn test_connect_rejects_bad_parameters() {
        assert!(matches!(
            Tty::connect("/dev/null", 12345, 8, Parity::None, 1),
            Err(TtyError::Param)
        ));
        assert!(matches!(
            Tty::connect("/dev/null", 9600, 9, Parity::None, 1),
            Err(TtyError::Param)
        ));
        assert!(matches!(
            Tty::connect("/dev/null", 9600, 8, Parity::None, 3),
            Err(TtyError::Param)
        ));
        assert!(Parity::try_from(3).is_err());
        assert_eq!(Parity::try_from(1).unwrap(), Parity::Even);
    }

    #[test]
    fn test_checksum_framing() {
        let frame = frame_with_checksum(b"FV000000");
        assert_eq!(frame.len(), 9);
        assert_eq!(frame[8], checksum8(b"FV000000"));
        assert!(verify_checksum(&frame));

        let mut corrupt = frame.clone();
        corrupt[2] ^= 0x01;
        assert!(!verify_checksum(&corrupt));
        assert!(!verify_checksum(&[]));
        assert_eq!(checksum8(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(TtyError::Overflow.to_string(), "Read overflow");
        assert_eq!(TtyError::PortBusy.to_string(), "Port is busy");
        assert_eq!(TtyError::Param.to_string(), "Parameter error");
        let err = TtyError::PortFailure {
            reason: "No such file or directory".to_string(),
            hint: "Check if device is connected to this port.",
        };
        assert_eq!(
            err.to_string(),
            "Port failure Error: No such file or directory. Check if device is connected to this port."
        );
    }
}
