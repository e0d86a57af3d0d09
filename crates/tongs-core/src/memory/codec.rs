use itertools::Itertools;
use log::{debug, info};

use super::bit_matrix::BitMatrix;
use super::dram_addr::DramAddr;
use super::function::AddressFunction;
use super::geometry::{ConfigError, GeometryConfig};
use crate::util::{bit, low_mask};

/// Position of one DRAM address component inside the codec's intermediate value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Field {
    /// Bit offset of the component
    pub shift: usize,
    /// Mask of the component after shifting
    pub mask: usize,
}

impl Field {
    fn take(bits_used: &mut usize, count: usize) -> Field {
        let field = Field {
            shift: *bits_used,
            mask: low_mask(count) as usize,
        };
        *bits_used += count;
        field
    }

    /// Number of bits of the component.
    pub fn width(&self) -> usize {
        self.mask.count_ones() as usize
    }

    #[inline(always)]
    fn extract(&self, intermediate: u64) -> usize {
        intermediate.checked_shr(self.shift as u32).unwrap_or(0) as usize & self.mask
    }

    #[inline(always)]
    fn insert(&self, value: usize) -> u64 {
        ((value & self.mask) as u64)
            .checked_shl(self.shift as u32)
            .unwrap_or(0)
    }
}

/// Bijection between DRAM linear addresses and [`DramAddr`] tuples.
///
/// Built from a [`GeometryConfig`]. The `linear_to_dram` matrix holds one row per
/// addressing function, ordered column bits, row bits, bank, bank group, rank,
/// subchannel, so the lowest output bits hold the column. `dram_to_linear` is its
/// inverse over GF(2).
#[derive(Clone, Debug)]
pub struct DramCodec {
    matrix_size: usize,
    phys_linear_offset: u64,
    subchannel: Field,
    rank: Field,
    bank_group: Field,
    bank: Field,
    row: Field,
    column: Field,
    linear_to_dram: BitMatrix,
    dram_to_linear: BitMatrix,
}

impl DramCodec {
    /// Builds the codec matrices for `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid or its functions are
    /// linearly dependent.
    pub fn new(config: &GeometryConfig) -> Result<DramCodec, ConfigError> {
        info!(
            "Initializing DRAM codec for {} (D={})",
            if config.name.is_empty() { "<unnamed>" } else { config.name.as_str() },
            config.matrix_size
        );
        config.validate()?;
        for (field, funcs) in [
            ("SUB", &config.subchannel_funcs),
            ("RK", &config.rank_funcs),
            ("BG", &config.bank_group_funcs),
            ("BA", &config.bank_funcs),
        ] {
            debug!("{:>3}: [{}]", field, funcs.iter().join(", "));
        }
        debug!("row=0x{:09x} col=0x{:09x}", config.row_mask, config.column_mask);
        let dim = config.matrix_size;
        let mask = config.matrix_mask();

        let masked = |funcs: &[AddressFunction]| -> Vec<u64> {
            funcs.iter().map(|f| f.masked(mask).mask()).collect()
        };
        let subchannel_funcs = masked(&config.subchannel_funcs);
        let rank_funcs = masked(&config.rank_funcs);
        let bank_group_funcs = masked(&config.bank_group_funcs);
        let bank_funcs = masked(&config.bank_funcs);
        let row_mask = config.row_mask & mask;
        let column_mask = config.column_mask & mask;

        let mut bits_used = 0;
        let column = Field::take(&mut bits_used, column_mask.count_ones() as usize);
        let row = Field::take(&mut bits_used, row_mask.count_ones() as usize);
        let bank = Field::take(&mut bits_used, bank_funcs.len());
        let bank_group = Field::take(&mut bits_used, bank_group_funcs.len());
        let rank = Field::take(&mut bits_used, rank_funcs.len());
        let subchannel = Field::take(&mut bits_used, subchannel_funcs.len());
        debug_assert_eq!(bits_used, dim);

        let single_bits = |m: u64| (0..dim).map(bit).filter(move |b| m & b != 0);
        let rows: Vec<u64> = single_bits(column_mask)
            .chain(single_bits(row_mask))
            .chain(bank_funcs)
            .chain(bank_group_funcs)
            .chain(rank_funcs)
            .chain(subchannel_funcs)
            .collect();
        let linear_to_dram = BitMatrix::from_rows(rows);
        let dram_to_linear = linear_to_dram.inverse()?;
        debug!("linear_to_dram: {:?}", linear_to_dram);
        debug!("dram_to_linear: {:?}", dram_to_linear);
        info!("Finished DRAM configuration");

        Ok(DramCodec {
            matrix_size: dim,
            phys_linear_offset: config.phys_linear_offset,
            subchannel,
            rank,
            bank_group,
            bank,
            row,
            column,
            linear_to_dram,
            dram_to_linear,
        })
    }

    /// Dimension `D` of the matrices.
    pub fn matrix_size(&self) -> usize {
        self.matrix_size
    }

    /// Mask of the `D` address bits covered by the matrices.
    pub fn matrix_mask(&self) -> u64 {
        low_mask(self.matrix_size)
    }

    /// Configured offset between physical and DRAM linear addresses.
    pub fn phys_linear_offset(&self) -> u64 {
        self.phys_linear_offset
    }

    /// Field layouts in the order subchannel, rank, bank group, bank, row, column.
    pub fn fields(&self) -> [Field; 6] {
        [
            self.subchannel,
            self.rank,
            self.bank_group,
            self.bank,
            self.row,
            self.column,
        ]
    }

    /// The forward matrix.
    pub fn linear_to_dram(&self) -> &BitMatrix {
        &self.linear_to_dram
    }

    /// The inverse matrix.
    pub fn dram_to_linear(&self) -> &BitMatrix {
        &self.dram_to_linear
    }

    /// Decodes an address: removes the linear offset, reduces modulo `2^D` and applies
    /// `linear_to_dram`.
    pub fn decode(&self, addr: u64) -> DramAddr {
        let linear = addr.wrapping_sub(self.phys_linear_offset) & self.matrix_mask();
        let intermediate = self.linear_to_dram.apply(linear);
        DramAddr {
            subchannel: self.subchannel.extract(intermediate),
            rank: self.rank.extract(intermediate),
            bank_group: self.bank_group.extract(intermediate),
            bank: self.bank.extract(intermediate),
            row: self.row.extract(intermediate),
            column: self.column.extract(intermediate),
        }
    }

    /// Encodes a DRAM address into its offset inside a `2^D` aligned region.
    ///
    /// Fields are masked to their widths first.
    pub fn encode(&self, addr: &DramAddr) -> u64 {
        let intermediate = self.subchannel.insert(addr.subchannel)
            | self.rank.insert(addr.rank)
            | self.bank_group.insert(addr.bank_group)
            | self.bank.insert(addr.bank)
            | self.row.insert(addr.row)
            | self.column.insert(addr.column);
        self.dram_to_linear.apply(intermediate)
    }

    /// Masks every component of `addr` to its field width.
    pub fn normalize(&self, addr: &DramAddr) -> DramAddr {
        DramAddr {
            subchannel: addr.subchannel & self.subchannel.mask,
            rank: addr.rank & self.rank.mask,
            bank_group: addr.bank_group & self.bank_group.mask,
            bank: addr.bank & self.bank.mask,
            row: addr.row & self.row.mask,
            column: addr.column & self.column.mask,
        }
    }
}
