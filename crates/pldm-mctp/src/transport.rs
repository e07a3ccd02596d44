//! Blocking byte-stream transports
//!
//! Reads stop either at an overall deadline or once the line has gone quiet
//! for an idle gap after the first byte. Both bounds are tunable per use, so
//! presence probes can be short while full table reads get more room.

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default line rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// One request/response exchange on a byte stream
pub trait Transport {
    /// Write `request` and return every byte received in reply.
    ///
    /// An empty reply is not an error at this layer.
    fn exchange(&mut self, request: &[u8]) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn exchange(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        (**self).exchange(request)
    }
}

/// Read deadline and idle gap for one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTiming {
    pub overall: Duration,
    pub idle: Duration,
}

impl ReadTiming {
    pub const fn new(overall: Duration, idle: Duration) -> Self {
        Self { overall, idle }
    }

    /// Full table and record reads
    pub const fn inventory() -> Self {
        Self::new(Duration::from_millis(2000), Duration::from_millis(200))
    }

    /// Quick presence probes
    pub const fn probe() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(100))
    }
}

impl Default for ReadTiming {
    fn default() -> Self {
        Self::inventory()
    }
}

/// Serial port opened 8N1
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    timing: ReadTiming,
    abort: Option<Arc<AtomicBool>>,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32, timing: ReadTiming) -> io::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(1))
            .open()?;

        debug!(path, baud_rate, "Opened serial port");

        Ok(Self::from_port(port, path, timing))
    }

    /// Wrap an already configured port.
    pub fn from_port(port: Box<dyn SerialPort>, path: &str, timing: ReadTiming) -> Self {
        Self {
            port,
            path: path.to_string(),
            timing,
            abort: None,
        }
    }

    /// Stop waiting for bytes as soon as `flag` is set.
    pub fn with_abort(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn set_timing(&mut self, timing: ReadTiming) {
        self.timing = timing;
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    fn read_until_idle(&mut self) -> io::Result<Vec<u8>> {
        let start = Instant::now();
        let mut last_rx: Option<Instant> = None;
        let mut out = Vec::new();
        let mut chunk = [0u8; 512];

        loop {
            if self.aborted() || start.elapsed() >= self.timing.overall {
                break;
            }
            if last_rx.is_some_and(|t| t.elapsed() >= self.timing.idle) {
                break;
            }

            let waiting = self.port.bytes_to_read()? as usize;
            if waiting == 0 {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }

            let want = waiting.min(chunk.len());
            match self.port.read(&mut chunk[..want]) {
                Ok(n) if n > 0 => {
                    out.extend_from_slice(&chunk[..n]);
                    last_rx = Some(Instant::now());
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e),
            }
        }

        trace!(path = %self.path, len = out.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Read finished");
        Ok(out)
    }
}

impl Transport for SerialTransport {
    fn exchange(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        // Stale bytes from an earlier exchange would be taken as the reply
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            debug!(path = %self.path, error = %e, "Failed to clear stale input");
        }
        self.port.write_all(request)?;
        self.port.flush()?;
        self.read_until_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::{FlowControl, Result as PortResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory port that queues `reply` whenever a request is written
    #[derive(Default)]
    struct LoopPort {
        rx: Mutex<VecDeque<u8>>,
        tx: Vec<u8>,
        reply: Vec<u8>,
        clear_fails: bool,
    }

    impl Read for LoopPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut rx = self.rx.lock().unwrap();
            let n = buf.len().min(rx.len());
            for (slot, b) in buf.iter_mut().zip(rx.drain(..n)) {
                *slot = b;
            }
            Ok(n)
        }
    }

    impl Write for LoopPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            self.rx.lock().unwrap().extend(self.reply.iter().copied());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for LoopPort {
        fn name(&self) -> Option<String> {
            Some("loop".to_string())
        }
        fn baud_rate(&self) -> PortResult<u32> {
            Ok(DEFAULT_BAUD_RATE)
        }
        fn data_bits(&self) -> PortResult<DataBits> {
            Ok(DataBits::Eight)
        }
        fn flow_control(&self) -> PortResult<FlowControl> {
            Ok(FlowControl::None)
        }
        fn parity(&self) -> PortResult<Parity> {
            Ok(Parity::None)
        }
        fn stop_bits(&self) -> PortResult<StopBits> {
            Ok(StopBits::One)
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(1)
        }
        fn set_baud_rate(&mut self, _: u32) -> PortResult<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: DataBits) -> PortResult<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: FlowControl) -> PortResult<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: Parity) -> PortResult<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: StopBits) -> PortResult<()> {
            Ok(())
        }
        fn set_timeout(&mut self, _: Duration) -> PortResult<()> {
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> PortResult<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> PortResult<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> PortResult<bool> {
            Ok(true)
        }
        fn read_data_set_ready(&mut self) -> PortResult<bool> {
            Ok(true)
        }
        fn read_ring_indicator(&mut self) -> PortResult<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> PortResult<bool> {
            Ok(true)
        }
        fn bytes_to_read(&self) -> PortResult<u32> {
            Ok(self.rx.lock().unwrap().len() as u32)
        }
        fn bytes_to_write(&self) -> PortResult<u32> {
            Ok(0)
        }
        fn clear(&self, buffer_to_clear: ClearBuffer) -> PortResult<()> {
            if self.clear_fails {
                return Err(serialport::Error::new(serialport::ErrorKind::NoDevice, "clear unsupported"));
            }
            if matches!(buffer_to_clear, ClearBuffer::Input | ClearBuffer::All) {
                self.rx.lock().unwrap().clear();
            }
            Ok(())
        }
        fn try_clone(&self) -> PortResult<Box<dyn SerialPort>> {
            Err(serialport::Error::new(serialport::ErrorKind::Unknown, "not cloneable"))
        }
        fn set_break(&self) -> PortResult<()> {
            Ok(())
        }
        fn clear_break(&self) -> PortResult<()> {
            Ok(())
        }
    }

    fn timing() -> ReadTiming {
        ReadTiming::new(Duration::from_millis(500), Duration::from_millis(20))
    }

    #[test]
    fn test_exchange_discards_stale_input() {
        let port = LoopPort {
            rx: Mutex::new(VecDeque::from([0xAA, 0xBB])),
            reply: vec![1, 2, 3],
            ..Default::default()
        };
        let mut transport = SerialTransport::from_port(Box::new(port), "loop", timing());
        assert_eq!(transport.exchange(&[0x7E]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_exchange_continues_when_clear_fails() {
        let port = LoopPort {
            rx: Mutex::new(VecDeque::from([0xAA])),
            reply: vec![1, 2, 3],
            clear_fails: true,
            ..Default::default()
        };
        let mut transport = SerialTransport::from_port(Box::new(port), "loop", timing());
        assert_eq!(transport.exchange(&[0x7E]).unwrap(), vec![0xAA, 1, 2, 3]);
    }

    #[test]
    fn test_abort_flag_stops_read() {
        let port = LoopPort {
            reply: vec![1, 2, 3],
            ..Default::default()
        };
        let flag = Arc::new(AtomicBool::new(true));
        let mut transport = SerialTransport::from_port(Box::new(port), "loop", timing()).with_abort(flag);
        assert!(transport.exchange(&[0x7E]).unwrap().is_empty());
    }
}
