use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::fifo::{self, ReadOutcome};
use crate::protocol::{
    FifoPaths, ProtocolError, TriggerWorkloadCmd, WorkloadRunnerCmd, WorkloadTriggerCmd,
};

/// Default interval between checks for `TRIGGER_READY`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProtocolError + '_ {
    move |source| ProtocolError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn open_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProtocolError + '_ {
    move |source| ProtocolError::Open {
        path: path.to_path_buf(),
        source,
    }
}

/// Workload side of the trigger protocol.
///
/// The workload announces itself once with [`send_ready_to_runner`], then runs one
/// measured iteration per [`wait_for_trigger`]. The returned [`Iteration`] is the
/// only way to talk to the trigger process, so no command can be sent before the
/// trigger reported `TRIGGER_READY`.
///
/// [`send_ready_to_runner`]: WorkloadClient::send_ready_to_runner
/// [`wait_for_trigger`]: WorkloadClient::wait_for_trigger
#[derive(Debug)]
pub struct WorkloadClient {
    paths: FifoPaths,
    poll_interval: Duration,
    trigger2workload: Option<File>,
    workload2trigger: Option<File>,
}

impl WorkloadClient {
    /// Creates a client for the FIFOs at `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingFifo`] if any of the three FIFOs does not exist.
    pub fn new(paths: FifoPaths) -> Result<Self, ProtocolError> {
        for path in paths.all() {
            if !fifo::is_fifo(path) {
                return Err(ProtocolError::MissingFifo(path.to_path_buf()));
            }
        }
        Ok(WorkloadClient {
            paths,
            poll_interval: DEFAULT_POLL_INTERVAL,
            trigger2workload: None,
            workload2trigger: None,
        })
    }

    /// Sets the interval between checks for `TRIGGER_READY`.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The FIFO paths in use.
    pub fn paths(&self) -> &FifoPaths {
        &self.paths
    }

    /// Signals `WORKLOAD_READY` to the runner.
    ///
    /// Blocks until the runner opens its end of the FIFO.
    ///
    /// # Errors
    ///
    /// Returns an error if the FIFO cannot be opened or written.
    pub fn send_ready_to_runner(&mut self) -> Result<(), ProtocolError> {
        info!("signaling READY to runner script");
        let path = &self.paths.workload2runner;
        let mut fifo = fifo::open_write(path).map_err(open_error(path))?;
        fifo::write_byte(&mut fifo, WorkloadRunnerCmd::WorkloadReady.into())
            .map_err(io_error(path))
    }

    /// Waits for `TRIGGER_READY`, then opens the command channel to the trigger.
    ///
    /// Bytes other than `TRIGGER_READY` are ignored. While no trigger process holds
    /// the FIFO open the client sleeps one poll interval between checks.
    ///
    /// # Errors
    ///
    /// Returns an error if a FIFO cannot be opened or read.
    pub fn wait_for_trigger(&mut self) -> Result<Iteration<'_>, ProtocolError> {
        let path = &self.paths.trigger2workload;
        let reader = match &mut self.trigger2workload {
            Some(reader) => reader,
            slot @ None => slot.insert(fifo::open_read_nonblocking(path).map_err(open_error(path))?),
        };
        debug!("waiting for TRIGGER_READY on {:?}", path);
        loop {
            match fifo::poll_byte(reader, self.poll_interval).map_err(io_error(path))? {
                ReadOutcome::Byte(byte) => match TriggerWorkloadCmd::try_from(byte) {
                    Ok(TriggerWorkloadCmd::TriggerReady) => break,
                    Err(_) => warn!("ignoring byte 0x{:02x} while waiting for TRIGGER_READY", byte),
                },
                ReadOutcome::HungUp => thread::sleep(self.poll_interval),
                ReadOutcome::Timeout => {}
            }
        }

        // the new writer is opened before the previous one is dropped, otherwise the
        // trigger process could observe a moment without writers and read EOF
        let path = &self.paths.workload2trigger;
        let fresh = fifo::open_write(path).map_err(open_error(path))?;
        let channel = self.workload2trigger.insert(fresh);
        info!("opened the workload2trigger FIFO, ready to send trigger commands");
        Ok(Iteration {
            channel,
            path: &self.paths.workload2trigger,
            triggers: 0,
        })
    }
}

/// One measured iteration, between `TRIGGER_READY` and `FINISHED_ITERATION`.
#[derive(Debug)]
pub struct Iteration<'a> {
    channel: &'a mut File,
    path: &'a Path,
    triggers: usize,
}

impl Iteration<'_> {
    /// Requests one trigger pulse.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be written.
    #[inline]
    pub fn send_trigger(&mut self) -> Result<(), ProtocolError> {
        self.triggers += 1;
        fifo::write_byte(self.channel, WorkloadTriggerCmd::SendTrigger.into())
            .map_err(io_error(self.path))
    }

    /// Number of triggers requested so far.
    pub fn triggers(&self) -> usize {
        self.triggers
    }

    /// Ends the iteration with `FINISHED_ITERATION`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be written.
    pub fn finish(self) -> Result<(), ProtocolError> {
        debug!("finishing iteration after {} trigger(s)", self.triggers);
        fifo::write_byte(self.channel, WorkloadTriggerCmd::FinishedIteration.into())
            .map_err(io_error(self.path))
    }
}
