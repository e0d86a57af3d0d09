use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// DRAM address with subchannel, rank, bank group, bank, row and column components.
///
/// Values produced by [`DramCodec::decode`](super::DramCodec::decode) are masked to
/// their field widths. Arithmetic may carry a field past its width; the excess bits
/// are dropped again when the address is encoded.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DramAddr {
    /// Subchannel number
    pub subchannel: usize,
    /// Rank number
    pub rank: usize,
    /// Bank group number
    pub bank_group: usize,
    /// Bank number inside the bank group
    pub bank: usize,
    /// Row number
    pub row: usize,
    /// Column number
    pub column: usize,
}

/// Prints `(subchannel,rank,bank_group,bank,row,column)` as stored.
///
/// Fields carried past their width by [`DramAddr::add`] are printed unmasked; pass the
/// address through [`DramCodec::normalize`](super::DramCodec::normalize) first to print
/// the location it encodes to.
impl Display for DramAddr {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(
            fmt,
            "({},{},{},{},{},{})",
            self.subchannel, self.rank, self.bank_group, self.bank, self.row, self.column
        )
    }
}

impl DramAddr {
    /// Creates a new DRAM address.
    pub fn new(
        subchannel: usize,
        rank: usize,
        bank_group: usize,
        bank: usize,
        row: usize,
        column: usize,
    ) -> Self {
        DramAddr {
            subchannel,
            rank,
            bank_group,
            bank,
            row,
            column,
        }
    }

    /// Adds offsets to each component in place.
    pub fn add_inplace(
        &mut self,
        subchannels: usize,
        ranks: usize,
        bank_groups: usize,
        banks: usize,
        rows: usize,
        columns: usize,
    ) {
        self.subchannel += subchannels;
        self.rank += ranks;
        self.bank_group += bank_groups;
        self.bank += banks;
        self.row += rows;
        self.column += columns;
    }

    /// Returns a copy with offsets added to each component.
    ///
    /// Mostly used to step to neighbouring rows: `addr.add(0, 0, 0, 0, 1, 0)`.
    pub fn add(
        &self,
        subchannels: usize,
        ranks: usize,
        bank_groups: usize,
        banks: usize,
        rows: usize,
        columns: usize,
    ) -> DramAddr {
        let mut res = *self;
        res.add_inplace(subchannels, ranks, bank_groups, banks, rows, columns);
        res
    }
}
