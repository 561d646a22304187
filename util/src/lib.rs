use std::{error::Error, fmt};

/// Canonical byte order for everything we emit. Binary images and bytecode
/// are little-endian on disk regardless of the host.
pub type Endian = byteorder::LittleEndian;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    pub value: String,
    pub enum_name: &'static str,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Failed to parse \"{}\" as {}.",
            &self.value, &self.enum_name
        )
    }
}

impl Error for ParseEnumError {}

/// Mnemonic lookup for instruction and condition enums. Matching is
/// ASCII-case-insensitive since the source languages spell mnemonics freely.
pub trait EnumFromStr: Sized {
    fn from_str(s: &str) -> Result<Self, ParseEnumError>;
}

/// ASCII-fold equality, the comparison used by case-insensitive symbol tables.
#[inline]
pub fn eq_nocase(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
