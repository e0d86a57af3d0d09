use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::util::parity;

/// A boolean linear function over address bits.
///
/// `f(addr) = parity(mask & addr)`. DRAM controllers decode subchannel, rank, bank
/// group and bank with functions of this shape, and the same functions serve as
/// search predicates.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AddressFunction(u64);

impl AddressFunction {
    /// Creates a function from its mask.
    pub const fn new(mask: u64) -> Self {
        AddressFunction(mask)
    }

    /// The mask of address bits this function XORs together.
    pub const fn mask(&self) -> u64 {
        self.0
    }

    /// Evaluates the function for `addr`.
    #[inline(always)]
    pub const fn apply_to(&self, addr: u64) -> bool {
        parity(self.0 & addr)
    }

    /// Restricts the function to the bits in `mask`.
    pub const fn masked(&self, mask: u64) -> Self {
        AddressFunction(self.0 & mask)
    }
}

impl fmt::Debug for AddressFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AddressFunction(0x{:09x})", self.0)
    }
}

impl Display for AddressFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:09x}", self.0)
    }
}

impl From<u64> for AddressFunction {
    fn from(mask: u64) -> Self {
        AddressFunction(mask)
    }
}

/// Errors when parsing functions or constraints from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseFunctionError {
    /// The mask is not a hexadecimal number
    #[error("invalid function mask '{0}'")]
    InvalidMask(String),
    /// The constraint does not have the form `<mask>=<value>`
    #[error("constraint '{0}' is missing '='")]
    MissingEquals(String),
    /// The required value is neither 0 nor 1
    #[error("constraint value '{0}' is neither '0' nor '1'")]
    InvalidValue(String),
}

/// Parses a mask with or without `0x` prefix as hexadecimal.
pub(crate) fn parse_hex_mask(s: &str) -> Result<u64, ParseFunctionError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");
    u64::from_str_radix(&digits, 16).map_err(|_| ParseFunctionError::InvalidMask(s.into()))
}

impl FromStr for AddressFunction {
    type Err = ParseFunctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_mask(s).map(AddressFunction)
    }
}

impl Serialize for AddressFunction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Functions are written as hex strings (`"0x7fffe0000"`) or plain integers.
impl<'de> Deserialize<'de> for AddressFunction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Int(u64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Int(mask) => Ok(AddressFunction(mask)),
        }
    }
}

/// Requires an [`AddressFunction`] to evaluate to a fixed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionConstraint {
    function: AddressFunction,
    value: bool,
}

impl FunctionConstraint {
    /// Creates a constraint `function(addr) == value`.
    pub const fn new(function: AddressFunction, value: bool) -> Self {
        FunctionConstraint { function, value }
    }

    /// The constrained function.
    pub const fn func(&self) -> AddressFunction {
        self.function
    }

    /// The required value.
    pub const fn value(&self) -> bool {
        self.value
    }

    /// Returns true if `addr` satisfies the constraint.
    #[inline(always)]
    pub const fn is_satisfied_by(&self, addr: u64) -> bool {
        self.function.apply_to(addr) == self.value
    }
}

/// Returns true if `addr` satisfies every constraint. An empty set is always satisfied.
#[inline]
pub fn all_satisfied(constraints: &[FunctionConstraint], addr: u64) -> bool {
    constraints.iter().all(|c| c.is_satisfied_by(addr))
}

impl Display for FunctionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.function, self.value as u8)
    }
}

/// Parses the command line form `0x12345678=1`.
impl FromStr for FunctionConstraint {
    type Err = ParseFunctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (func, value) = s
            .split_once('=')
            .ok_or_else(|| ParseFunctionError::MissingEquals(s.into()))?;
        let value = match value.trim() {
            "0" => false,
            "1" => true,
            other => return Err(ParseFunctionError::InvalidValue(other.into())),
        };
        Ok(FunctionConstraint::new(func.parse()?, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Rng;
    use rand::RngCore;

    #[test]
    fn test_apply_to() {
        let f = AddressFunction::new(0xc3200);
        assert!(!f.apply_to(0));
        assert!(f.apply_to(1 << 9));
        assert!(!f.apply_to((1 << 9) | (1 << 12)));
        assert!(f.apply_to(0xc3200));
        assert!(!f.apply_to(0xc3200 & !(1 << 19)));
        // bits outside the mask never matter
        assert_eq!(f.apply_to(0x1), f.apply_to(0x0));
    }

    #[test]
    fn test_linear_over_xor() {
        let mut rng = Rng::from_seed(0xf00d);
        for _ in 0..10_000 {
            let f = AddressFunction::new(rng.next_u64());
            let a = rng.next_u64();
            let b = rng.next_u64();
            assert_eq!(f.apply_to(a) ^ f.apply_to(b), f.apply_to(a ^ b));
        }
    }

    #[test]
    fn test_constraint() {
        let c = FunctionConstraint::new(AddressFunction::new(0b110), true);
        assert!(c.is_satisfied_by(0b010));
        assert!(!c.is_satisfied_by(0b110));
        assert!(all_satisfied(&[], 0));
        assert!(!all_satisfied(&[c], 0));
    }

    #[test]
    fn test_parse_constraint() {
        let c: FunctionConstraint = "0x3fffc0040=1".parse().expect("valid constraint");
        assert_eq!(c.func().mask(), 0x3fffc0040);
        assert!(c.value());
        let c: FunctionConstraint = "c3200=0".parse().expect("valid constraint");
        assert_eq!(c.func().mask(), 0xc3200);
        assert!(!c.value());

        assert_eq!(
            "0x12".parse::<FunctionConstraint>(),
            Err(ParseFunctionError::MissingEquals("0x12".into()))
        );
        assert_eq!(
            "0x12=2".parse::<FunctionConstraint>(),
            Err(ParseFunctionError::InvalidValue("2".into()))
        );
        assert_eq!(
            "0xzz=1".parse::<FunctionConstraint>(),
            Err(ParseFunctionError::InvalidMask("0xzz".into()))
        );
    }

    #[test]
    fn test_parse_single_prefix() {
        assert_eq!("0X1f".parse::<AddressFunction>(), Ok(AddressFunction::new(0x1f)));
        assert_eq!(
            "0x0x12".parse::<AddressFunction>(),
            Err(ParseFunctionError::InvalidMask("0x0x12".into()))
        );
        assert!("0x0x12=1".parse::<FunctionConstraint>().is_err());
        assert!("0x".parse::<AddressFunction>().is_err());
    }

    #[test]
    fn test_deserialize_hex_and_int() {
        let fns: Vec<AddressFunction> =
            serde_json::from_str(r#"["0x7fffe0000", 256]"#).expect("valid json");
        assert_eq!(fns, vec![AddressFunction::new(0x7fffe0000), AddressFunction::new(256)]);
        assert_eq!(
            serde_json::to_string(&fns[0]).expect("serialize"),
            r#""0x7fffe0000""#
        );
    }
}
