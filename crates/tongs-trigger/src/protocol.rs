use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default path of the workload to runner FIFO.
pub const FIFO_WORKLOAD2RUNNER: &str = "/tmp/workload2runner";
/// Default path of the trigger to workload FIFO.
pub const FIFO_TRIGGER2WORKLOAD: &str = "/tmp/trigger2workload";
/// Default path of the workload to trigger FIFO.
pub const FIFO_WORKLOAD2TRIGGER: &str = "/tmp/workload2trigger";

/// Errors of the trigger protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A FIFO does not exist or is not a FIFO
    #[error("the required FIFO {0:?} does not exist")]
    MissingFifo(PathBuf),
    /// Opening a FIFO failed
    #[error("failed opening the FIFO {path:?}: {source}")]
    Open {
        /// FIFO path
        path: PathBuf,
        /// OS error
        source: std::io::Error,
    },
    /// Reading, writing or polling a FIFO failed
    #[error("I/O on FIFO {path:?} failed: {source}")]
    Io {
        /// FIFO path
        path: PathBuf,
        /// OS error
        source: std::io::Error,
    },
    /// The workload closed the command FIFO before finishing the iteration
    #[error("{0:?} was closed before FINISHED_ITERATION")]
    UnexpectedEof(PathBuf),
    /// A byte is not a command of the channel it was read from
    #[error("invalid command 0x{0:02x}")]
    InvalidCommand(u8),
    /// The trigger line failed
    #[error("trigger line failed: {0}")]
    Line(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Paths of the three FIFOs. They are created by the runner, never by the harness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FifoPaths {
    /// Workload to runner, carries [`WorkloadRunnerCmd`]
    pub workload2runner: PathBuf,
    /// Trigger to workload, carries [`TriggerWorkloadCmd`]
    pub trigger2workload: PathBuf,
    /// Workload to trigger, carries [`WorkloadTriggerCmd`]
    pub workload2trigger: PathBuf,
}

impl Default for FifoPaths {
    fn default() -> Self {
        FifoPaths {
            workload2runner: FIFO_WORKLOAD2RUNNER.into(),
            trigger2workload: FIFO_TRIGGER2WORKLOAD.into(),
            workload2trigger: FIFO_WORKLOAD2TRIGGER.into(),
        }
    }
}

impl FifoPaths {
    /// The default FIFO names placed in `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        FifoPaths {
            workload2runner: dir.join("workload2runner"),
            trigger2workload: dir.join("trigger2workload"),
            workload2trigger: dir.join("workload2trigger"),
        }
    }

    /// All three paths.
    pub fn all(&self) -> [&Path; 3] {
        [
            &self.workload2runner,
            &self.trigger2workload,
            &self.workload2trigger,
        ]
    }
}

macro_rules! command_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl From<$name> for u8 {
            fn from(cmd: $name) -> u8 {
                cmd as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(byte: u8) -> Result<Self, ProtocolError> {
                match byte {
                    $($value => Ok($name::$variant),)+
                    other => Err(ProtocolError::InvalidCommand(other)),
                }
            }
        }
    };
}

command_enum! {
    /// Commands from the workload to the runner. `0` is invalid.
    WorkloadRunnerCmd {
        /// Initialization finished, the runner may start trigger processes
        WorkloadReady = 1,
    }
}

command_enum! {
    /// Commands from the trigger process to the workload. `0` is invalid.
    TriggerWorkloadCmd {
        /// The trigger process is listening for commands
        TriggerReady = 1,
    }
}

command_enum! {
    /// Commands from the workload to the trigger process. `0` is invalid.
    WorkloadTriggerCmd {
        /// Pulse the trigger line
        SendTrigger = 1,
        /// The iteration ended, the trigger process terminates
        FinishedIteration = 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(u8::from(WorkloadRunnerCmd::WorkloadReady), 1);
        assert_eq!(u8::from(TriggerWorkloadCmd::TriggerReady), 1);
        assert_eq!(u8::from(WorkloadTriggerCmd::SendTrigger), 1);
        assert_eq!(u8::from(WorkloadTriggerCmd::FinishedIteration), 2);
        assert_eq!(
            WorkloadTriggerCmd::try_from(2).ok(),
            Some(WorkloadTriggerCmd::FinishedIteration)
        );
        for invalid in [0u8, 3, 0xff] {
            assert!(matches!(
                WorkloadTriggerCmd::try_from(invalid),
                Err(ProtocolError::InvalidCommand(b)) if b == invalid
            ));
        }
        assert!(TriggerWorkloadCmd::try_from(0).is_err());
    }

    #[test]
    fn test_paths() {
        let default = FifoPaths::default();
        assert_eq!(default.trigger2workload, PathBuf::from("/tmp/trigger2workload"));
        assert_eq!(FifoPaths::in_dir("/tmp"), default);
    }
}
