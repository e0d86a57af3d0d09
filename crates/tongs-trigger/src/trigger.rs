use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::fifo::{self, ReadOutcome};
use crate::protocol::{FifoPaths, ProtocolError, TriggerWorkloadCmd, WorkloadTriggerCmd};

/// An output line whose edge starts a capture on the measurement device.
pub trait TriggerLine {
    /// Errors reported by the line
    type Error: std::error::Error + Send + Sync + 'static;

    /// Emits one trigger edge.
    fn pulse(&mut self) -> Result<(), Self::Error>;
}

impl<T: TriggerLine + ?Sized> TriggerLine for &mut T {
    type Error = T::Error;

    fn pulse(&mut self) -> Result<(), Self::Error> {
        (**self).pulse()
    }
}

/// RTS modem line of a serial device, e.g. a USB-serial adapter.
///
/// A pulse clears RTS, holds it for [`SerialRts::DEFAULT_HOLD`] and sets it again.
#[derive(Debug)]
pub struct SerialRts {
    device: File,
    hold: Duration,
}

impl SerialRts {
    /// Time RTS stays cleared per pulse.
    pub const DEFAULT_HOLD: Duration = Duration::from_micros(100);

    /// Opens the serial device at `path`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the device cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path.as_ref())?;
        info!("opened trigger device {:?}", path.as_ref());
        Ok(SerialRts {
            device,
            hold: Self::DEFAULT_HOLD,
        })
    }

    fn set_rts(&self, high: bool) -> io::Result<()> {
        let bits: libc::c_int = libc::TIOCM_RTS;
        let bits = &bits as *const libc::c_int;
        let fd = self.device.as_raw_fd();
        let ret = if high {
            unsafe { libc::ioctl(fd, libc::TIOCMBIS, bits) }
        } else {
            unsafe { libc::ioctl(fd, libc::TIOCMBIC, bits) }
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl TriggerLine for SerialRts {
    type Error = io::Error;

    fn pulse(&mut self) -> io::Result<()> {
        self.set_rts(false)?;
        thread::sleep(self.hold);
        self.set_rts(true)
    }
}

/// Trigger side of the protocol, one process per iteration.
///
/// Sends `TRIGGER_READY`, then pulses `line` for every `SEND_TRIGGER` until
/// `FINISHED_ITERATION` arrives.
pub struct TriggerProcess<L> {
    paths: FifoPaths,
    line: L,
    ready_delay: Duration,
    settle_delay: Duration,
}

/// Outcome of one trigger process run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerStats {
    /// Pulses emitted
    pub pulses: usize,
    /// Invalid bytes received and ignored
    pub invalid: usize,
}

impl<L: TriggerLine> TriggerProcess<L> {
    /// Creates a trigger process driving `line`.
    pub fn new(paths: FifoPaths, line: L) -> Self {
        TriggerProcess {
            paths,
            line,
            ready_delay: Duration::from_micros(500),
            settle_delay: Duration::from_micros(700),
        }
    }

    /// Runs one iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if a FIFO is missing or fails, the workload hangs up before
    /// `FINISHED_ITERATION`, or the line fails.
    pub fn run(&mut self) -> Result<TriggerStats, ProtocolError> {
        for path in [&self.paths.trigger2workload, &self.paths.workload2trigger] {
            if !fifo::is_fifo(path) {
                return Err(ProtocolError::MissingFifo(path.clone()));
            }
        }

        let path = &self.paths.trigger2workload;
        let mut ready = fifo::open_write(path).map_err(|source| ProtocolError::Open {
            path: path.clone(),
            source,
        })?;
        debug!("opened trigger2workload for writing");
        thread::sleep(self.ready_delay);
        fifo::write_byte(&mut ready, TriggerWorkloadCmd::TriggerReady.into()).map_err(
            |source| ProtocolError::Io {
                path: path.clone(),
                source,
            },
        )?;
        drop(ready);

        let path = &self.paths.workload2trigger;
        let mut commands = fifo::open_read(path).map_err(|source| ProtocolError::Open {
            path: path.clone(),
            source,
        })?;
        info!("trigger opened the workload2trigger FIFO");

        let mut stats = TriggerStats::default();
        loop {
            let outcome = fifo::read_byte(&mut commands).map_err(|source| ProtocolError::Io {
                path: path.clone(),
                source,
            })?;
            let byte = match outcome {
                ReadOutcome::Byte(byte) => byte,
                ReadOutcome::HungUp => return Err(ProtocolError::UnexpectedEof(path.clone())),
                ReadOutcome::Timeout => continue,
            };
            match WorkloadTriggerCmd::try_from(byte) {
                Ok(WorkloadTriggerCmd::SendTrigger) => {
                    self.line
                        .pulse()
                        .map_err(|e| ProtocolError::Line(Box::new(e)))?;
                    stats.pulses += 1;
                }
                Ok(WorkloadTriggerCmd::FinishedIteration) => break,
                Err(_) => {
                    warn!("received invalid command on workload2trigger FIFO: 0x{:02x}", byte);
                    stats.invalid += 1;
                }
            }
        }
        // give the scope time to register the last edge
        thread::sleep(self.settle_delay);
        info!("iteration finished after {} pulse(s)", stats.pulses);
        Ok(stats)
    }

    /// Releases the line.
    pub fn into_line(self) -> L {
        self.line
    }
}
