use serde::Serialize;

use crate::memory::{VirtAddr, access};

/// One step of a [`Program`](super::Program).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Instruction {
    /// Does nothing
    Nop,
    /// Loads one byte
    Read(VirtAddr),
    /// Stores the program's write counter and advances it
    Write(VirtAddr),
    /// Flushes the cache line (`clflushopt`)
    Clflush(VirtAddr),
    /// Full memory fence
    Mfence,
}

impl Instruction {
    /// The address this instruction touches, if any.
    pub fn addr(&self) -> Option<VirtAddr> {
        match self {
            Instruction::Read(addr) | Instruction::Write(addr) | Instruction::Clflush(addr) => {
                Some(*addr)
            }
            Instruction::Nop | Instruction::Mfence => None,
        }
    }

    /// Listing tag.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Nop => "NOP",
            Instruction::Read(_) => "READ",
            Instruction::Write(_) => "WRITE",
            Instruction::Clflush(_) => "CLFLUSH",
            Instruction::Mfence => "MFENCE",
        }
    }

    /// Executes the instruction.
    ///
    /// # Safety
    ///
    /// Address-bearing instructions must point into a live, writable mapping.
    #[inline(always)]
    pub(crate) unsafe fn execute(&self, counter: &mut u8) {
        match *self {
            Instruction::Nop => {}
            Instruction::Read(addr) => {
                let _ = std::hint::black_box(unsafe { access::read(addr) });
            }
            Instruction::Write(addr) => {
                unsafe { access::write(addr, *counter) };
                *counter = counter.wrapping_add(1);
            }
            Instruction::Clflush(addr) => unsafe { access::clflushopt(addr) },
            Instruction::Mfence => access::mfence(),
        }
    }
}
