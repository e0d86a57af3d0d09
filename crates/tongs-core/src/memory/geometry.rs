use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::bit_matrix::MatrixError;
use super::function::{AddressFunction, parse_hex_mask};

/// Errors in a DRAM geometry configuration.
///
/// All of these are fatal: a geometry that does not describe a bijection cannot be
/// used to place accesses.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for a geometry
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The matrix dimension is outside `1..=64`
    #[error("matrix size {0} is not in 1..=64")]
    InvalidMatrixSize(usize),
    /// The linear offset would change address bits covered by the matrix
    #[error("physical-linear offset 0x{offset:x} is not a multiple of 2^{matrix_size}")]
    MisalignedOffset {
        /// Configured offset
        offset: u64,
        /// Matrix dimension
        matrix_size: usize,
    },
    /// Explicit functions plus row and column bits do not add up to the dimension
    #[error("configuration yields {actual} address functions, not {expected}")]
    FunctionCount {
        /// Matrix dimension
        expected: usize,
        /// Number of functions configured
        actual: usize,
    },
    /// The functions are linearly dependent
    #[error("address functions are linearly dependent: {0}")]
    SingularMatrix(#[from] MatrixError),
}

fn hex_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Hex(String),
        Int(u64),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Hex(s) => parse_hex_mask(&s).map_err(serde::de::Error::custom),
        Repr::Int(v) => Ok(v),
    }
}

/// Platform DRAM geometry.
///
/// The geometry is given as linear functions over the low `matrix_size` bits of the
/// physical address: explicit function lists for subchannel, rank, bank group and
/// bank, and two masks whose set bits each select one row or column bit. Masks may
/// be written as hex strings or integers.
///
/// ```json
/// {
///   "name": "Intel Raptor Lake, 1 rank",
///   "matrix_size": 30,
///   "phys_linear_offset": "0x0",
///   "subchannel_funcs": ["0x0000c3200"],
///   "rank_funcs": [],
///   "bank_group_funcs": ["0x000081100", "0x088844000", "0x111108000"],
///   "bank_funcs": ["0x222210000", "0x044420000"],
///   "row_mask": "0x3fffc0000",
///   "column_mask": "0x000000fff"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct GeometryConfig {
    /// Human readable platform name
    #[serde(default)]
    pub name: String,
    /// Dimension `D` of the codec matrices
    pub matrix_size: usize,
    /// Offset between physical and DRAM linear addresses, a multiple of `2^D`
    #[serde(deserialize_with = "hex_u64", default)]
    pub phys_linear_offset: u64,
    /// Subchannel functions
    #[serde(default)]
    pub subchannel_funcs: Vec<AddressFunction>,
    /// Rank functions
    #[serde(default)]
    pub rank_funcs: Vec<AddressFunction>,
    /// Bank group functions
    #[serde(default)]
    pub bank_group_funcs: Vec<AddressFunction>,
    /// Bank functions
    #[serde(default)]
    pub bank_funcs: Vec<AddressFunction>,
    /// Row bits, one function per set bit
    #[serde(deserialize_with = "hex_u64")]
    pub row_mask: u64,
    /// Column bits, one function per set bit
    #[serde(deserialize_with = "hex_u64")]
    pub column_mask: u64,
}

impl GeometryConfig {
    /// Loads a geometry from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. The geometry itself is
    /// validated when a [`DramCodec`](super::DramCodec) is built from it.
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> Result<GeometryConfig, ConfigError> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: GeometryConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Mask of the `matrix_size` low address bits.
    pub fn matrix_mask(&self) -> u64 {
        crate::util::low_mask(self.matrix_size)
    }

    /// Total number of address functions after masking to the matrix dimension.
    pub fn function_count(&self) -> usize {
        let mask = self.matrix_mask();
        self.subchannel_funcs.len()
            + self.rank_funcs.len()
            + self.bank_group_funcs.len()
            + self.bank_funcs.len()
            + (self.row_mask & mask).count_ones() as usize
            + (self.column_mask & mask).count_ones() as usize
    }

    /// Checks dimension, offset alignment and function count.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matrix_size == 0 || self.matrix_size > 64 {
            return Err(ConfigError::InvalidMatrixSize(self.matrix_size));
        }
        if self.phys_linear_offset & self.matrix_mask() != 0 {
            return Err(ConfigError::MisalignedOffset {
                offset: self.phys_linear_offset,
                matrix_size: self.matrix_size,
            });
        }
        let actual = self.function_count();
        if actual != self.matrix_size {
            return Err(ConfigError::FunctionCount {
                expected: self.matrix_size,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::MIB;

    const ZEN3: &str = r#"{
        "name": "AMD Zen 3, 2 ranks",
        "matrix_size": 28,
        "phys_linear_offset": "0x30000000",
        "rank_funcs": ["0x7fffe0000"],
        "bank_group_funcs": ["0x444440100", "0x088880200"],
        "bank_funcs": ["0x111100400", "0x222200800"],
        "row_mask": "0x7fffc0000",
        "column_mask": "0x00001f0ff"
    }"#;

    #[test]
    fn test_parse_and_validate() {
        let config: GeometryConfig = serde_json::from_str(ZEN3).expect("valid json");
        assert_eq!(config.phys_linear_offset, 768 * MIB as u64);
        assert!(config.subchannel_funcs.is_empty());
        assert_eq!(config.rank_funcs, vec![AddressFunction::new(0x7fffe0000)]);
        // 10 row bits below bit 28, 13 column bits and 5 explicit functions
        assert_eq!(config.function_count(), 28);
        config.validate().expect("valid geometry");
    }

    #[test]
    fn test_misaligned_offset() {
        let mut config: GeometryConfig = serde_json::from_str(ZEN3).expect("valid json");
        config.phys_linear_offset = 0x1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MisalignedOffset { offset: 0x1000, matrix_size: 28 })
        ));
    }

    #[test]
    fn test_wrong_function_count() {
        let mut config: GeometryConfig = serde_json::from_str(ZEN3).expect("valid json");
        config.bank_funcs.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FunctionCount { expected: 28, actual: 27 })
        ));
        config.matrix_size = 65;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMatrixSize(65))
        ));
    }
}
