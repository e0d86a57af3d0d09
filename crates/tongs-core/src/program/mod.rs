//! Replayable memory access programs.
//!
//! A [`Program`] is an append-only list of [`Instruction`]s executed strictly in
//! insertion order. The order is the variable under test, so nothing is reordered,
//! batched or skipped. Listings annotate every address with its DRAM coordinates.

mod instruction;

use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

pub use self::instruction::Instruction;
use crate::memory::{Allocation, DramContext, VirtAddr};

/// Errors from program validation and listing.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// An instruction touches memory outside the allocation
    #[error("instruction {index} ({mnemonic}) accesses {addr:?} outside the allocation")]
    OutOfBounds {
        /// Position in the program
        index: usize,
        /// Listing tag of the instruction
        mnemonic: &'static str,
        /// Offending address
        addr: VirtAddr,
    },
    /// Writing the listing failed
    #[error("could not write program listing to {path:?}: {source}")]
    Listing {
        /// Target file
        path: PathBuf,
        /// I/O error
        source: io::Error,
    },
}

/// An ordered, replayable instruction sequence.
///
/// Writes store a counter private to the program so consecutive writes never store
/// the same constant.
#[derive(Debug, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    counter: Cell<u8>,
}

impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Appends a read, a cache line flush and a fence for `addr`.
    pub fn push_access(&mut self, addr: VirtAddr) {
        self.push(Instruction::Read(addr));
        self.push(Instruction::Clflush(addr));
        self.push(Instruction::Mfence);
    }

    /// The instructions in execution order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true for a program without instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Checks that every address-bearing instruction stays inside `allocation`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::OutOfBounds`] for the first offending instruction.
    pub fn check_bounds(&self, allocation: &Allocation) -> Result<(), ProgramError> {
        for (index, inst) in self.instructions.iter().enumerate() {
            if let Some(addr) = inst.addr() {
                if !allocation.contains(addr) {
                    return Err(ProgramError::OutOfBounds {
                        index,
                        mnemonic: inst.mnemonic(),
                        addr,
                    });
                }
            }
        }
        Ok(())
    }

    /// Replays all instructions in order.
    ///
    /// # Safety
    ///
    /// Every address in the program must point into a live, writable mapping, for
    /// example an allocation that passed [`check_bounds`](Self::check_bounds).
    pub unsafe fn execute(&self) {
        let mut counter = self.counter.get();
        for inst in &self.instructions {
            unsafe { inst.execute(&mut counter) };
        }
        self.counter.set(counter);
    }

    /// Writes the listing, one instruction per line, with DRAM coordinates decoded
    /// through `ctx`.
    ///
    /// # Errors
    ///
    /// Returns any error of the underlying writer.
    pub fn write_to<W: Write>(&self, mut w: W, ctx: &DramContext) -> io::Result<()> {
        if self.instructions.is_empty() {
            return writeln!(w, "(empty)");
        }
        for inst in &self.instructions {
            match inst.addr() {
                Some(addr) => writeln!(w, "{} {}", inst.mnemonic(), ctx.from_virt(addr))?,
                None => writeln!(w, "{}", inst.mnemonic())?,
            }
        }
        Ok(())
    }

    /// Writes the listing to `path`, replacing the file.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Listing`] if the file cannot be written.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P, ctx: &DramContext) -> Result<(), ProgramError> {
        let path = path.as_ref();
        let wrap = |source| ProgramError::Listing {
            path: path.to_path_buf(),
            source,
        };
        let mut w = BufWriter::new(File::create(path).map_err(wrap)?);
        self.write_to(&mut w, ctx).map_err(wrap)?;
        w.flush().map_err(wrap)?;
        debug!("wrote {} instructions to {:?}", self.len(), path);
        Ok(())
    }
}

impl Extend<Instruction> for Program {
    fn extend<T: IntoIterator<Item = Instruction>>(&mut self, iter: T) {
        self.instructions.extend(iter);
    }
}

impl FromIterator<Instruction> for Program {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Program {
            instructions: iter.into_iter().collect(),
            counter: Cell::new(0),
        }
    }
}
