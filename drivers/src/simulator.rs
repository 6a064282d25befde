//! In-process RoboFocus stand-in used by `--simulation`
//!
//! Answers the same 9-byte frames as the real controller. Moves complete
//! instantly but are still reported the way the hardware does it: a burst
//! of direction bytes followed by the final position frame.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use lodestar_indi::serial::{frame_with_checksum, verify_checksum};
use lodestar_indi::SerialIo;

use crate::robofocus::FRAME_LEN;

/// Direction bytes emitted ahead of a move's final frame.
const MOTION_BYTES: usize = 3;

#[derive(Debug)]
pub struct SimulatedRoboFocus {
    position: u32,
    half_kelvin: u32,
    firmware: &'static str,
    pending: Vec<u8>,
    replies: VecDeque<u8>,
}

impl Default for SimulatedRoboFocus {
    fn default() -> Self {
        Self::new(1000, 20.0)
    }
}

impl SimulatedRoboFocus {
    pub fn new(position: u32, celsius: f64) -> Self {
        Self {
            position,
            half_kelvin: ((celsius + 273.15) * 2.0).round().max(0.0) as u32,
            firmware: "003.10",
            pending: Vec::with_capacity(FRAME_LEN),
            replies: VecDeque::new(),
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    fn reply(&mut self, code: &str, payload: &str) {
        let frame = frame_with_checksum(format!("{}{}", code, payload).as_bytes());
        self.replies.extend(frame);
    }

    fn handle(&mut self, frame: &[u8]) {
        if !verify_checksum(frame) {
            tracing::warn!("Simulator dropped frame with bad checksum: {:02X?}", frame);
            return;
        }
        let value = std::str::from_utf8(&frame[2..8])
            .ok()
            .and_then(|s| s.parse::<u32>().ok());
        match (&frame[..2], value) {
            (b"FV", _) => self.reply("FV", self.firmware),
            (b"FG", Some(0)) => self.reply("FD", &format!("{:06}", self.position)),
            (b"FG", Some(target)) => {
                let direction = if target < self.position { b'I' } else { b'O' };
                self.replies.extend(std::iter::repeat(direction).take(MOTION_BYTES));
                self.position = target;
                self.reply("FD", &format!("{:06}", self.position));
            }
            (b"FT", _) => self.reply("FT", &format!("{:06}", self.half_kelvin)),
            _ => tracing::debug!("Simulator ignored {:?}", String::from_utf8_lossy(frame)),
        }
    }
}

impl Read for SimulatedRoboFocus {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replies.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(self.replies.len());
        for (slot, byte) in buf.iter_mut().zip(self.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedRoboFocus {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            // A lone CR stops the motor.
            if byte == b'\r' && self.pending.is_empty() {
                self.replies.clear();
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() == FRAME_LEN {
                let frame = std::mem::take(&mut self.pending);
                self.handle(&frame);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialIo for SimulatedRoboFocus {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn flush_io(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.replies.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robofocus::command;

    fn drain(sim: &mut SimulatedRoboFocus) -> Vec<u8> {
        sim.replies.drain(..).collect()
    }

    #[test]
    fn test_position_query() {
        let mut sim = SimulatedRoboFocus::new(1234, 20.0);
        sim.write_all(&command("FG", 0)).unwrap();
        let reply = drain(&mut sim);
        assert_eq!(&reply[..8], b"FD001234");
        assert!(verify_checksum(&reply));
    }

    #[test]
    fn test_move_reports_direction() {
        let mut sim = SimulatedRoboFocus::new(1000, 20.0);
        sim.write_all(&command("FG", 400)).unwrap();
        let reply = drain(&mut sim);
        assert_eq!(&reply[..3], b"III");
        assert_eq!(&reply[3..11], b"FD000400");
        assert_eq!(sim.position(), 400);
    }

    #[test]
    fn test_temperature_in_half_kelvin() {
        let mut sim = SimulatedRoboFocus::new(0, 20.0);
        sim.write_all(&command("FT", 0)).unwrap();
        assert_eq!(&drain(&mut sim)[..8], b"FT000586");
    }

    #[test]
    fn test_bad_checksum_ignored() {
        let mut sim = SimulatedRoboFocus::default();
        let mut frame = command("FV", 0);
        frame[8] = frame[8].wrapping_add(1);
        sim.write_all(&frame).unwrap();
        assert!(drain(&mut sim).is_empty());
    }
}
