//! # Tongs Trigger
//!
//! Synchronisation between a measured workload, an external runner script and a
//! short-lived trigger process that drives an oscilloscope trigger line. The three
//! processes talk over single-byte commands on three named pipes:
//!
//! - `workload2runner`: the workload announces `WORKLOAD_READY` once after setup.
//! - `trigger2workload`: each trigger process announces `TRIGGER_READY`.
//! - `workload2trigger`: the workload requests pulses with `SEND_TRIGGER` and ends
//!   the iteration with `FINISHED_ITERATION`.
//!
//! The runner creates the FIFOs and spawns one trigger process per iteration.
//! [`WorkloadClient`] implements the workload side and [`TriggerProcess`] the
//! trigger side.

#![warn(missing_docs)]

mod client;
pub mod fifo;
mod protocol;
mod trigger;

pub use crate::client::{DEFAULT_POLL_INTERVAL, Iteration, WorkloadClient};
pub use crate::protocol::{
    FIFO_TRIGGER2WORKLOAD, FIFO_WORKLOAD2RUNNER, FIFO_WORKLOAD2TRIGGER, FifoPaths, ProtocolError,
    TriggerWorkloadCmd, WorkloadRunnerCmd, WorkloadTriggerCmd,
};
pub use crate::trigger::{SerialRts, TriggerLine, TriggerProcess, TriggerStats};

/// Scratch directories for tests of the FIFO protocol.
#[doc(hidden)]
pub mod test_util {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::FifoPaths;
    use crate::fifo::create_fifo;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Directory below the system temp dir, removed on drop.
    #[derive(Debug)]
    pub struct TempDir(PathBuf);

    impl TempDir {
        /// Creates a fresh directory whose name starts with `tongs-{prefix}`.
        pub fn new(prefix: &str) -> std::io::Result<Self> {
            let path = std::env::temp_dir().join(format!(
                "tongs-{}-{}-{}",
                prefix,
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&path)?;
            Ok(TempDir(path))
        }

        /// The directory.
        pub fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    /// Temporary directory holding the three protocol FIFOs.
    #[derive(Debug)]
    pub struct FifoDir {
        dir: TempDir,
        /// Paths of the FIFOs inside the directory.
        pub paths: FifoPaths,
    }

    impl FifoDir {
        /// Creates a fresh directory with all three FIFOs.
        pub fn new(prefix: &str) -> std::io::Result<Self> {
            let dir = TempDir::new(prefix)?;
            let paths = FifoPaths::in_dir(dir.path());
            for path in paths.all() {
                create_fifo(path, 0o600)?;
            }
            Ok(FifoDir { dir, paths })
        }

        /// The directory.
        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Owned copy of the FIFO paths.
        pub fn paths(&self) -> FifoPaths {
            self.paths.clone()
        }
    }
}
