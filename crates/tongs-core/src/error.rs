use thiserror::Error;

use crate::memory::{AllocationError, ConfigError, ContextError, LinuxPageMapError, SearchError};
use crate::program::ProgramError;

/// Any error produced by `tongs-core`.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid DRAM geometry
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Allocation or memory type setup failed
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// Binding allocation and geometry failed
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Constrained address search failed
    #[error(transparent)]
    Search(#[from] SearchError),
    /// A program is invalid for its allocation
    #[error(transparent)]
    Program(#[from] ProgramError),
    /// Physical address resolution failed
    #[error(transparent)]
    PageMap(#[from] LinuxPageMapError),
}

impl Error {
    /// Returns true if retrying with another sample may succeed.
    ///
    /// Only search failures are recoverable; everything else means the machine or the
    /// configuration is unusable for the experiment.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Search(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        let e: Error = SearchError::Exhausted { attempts: 1024 }.into();
        assert!(e.is_recoverable());
        let e: Error = ConfigError::InvalidMatrixSize(0).into();
        assert!(!e.is_recoverable());
        assert_eq!(e.to_string(), "matrix size 0 is not in 1..=64");
    }
}
