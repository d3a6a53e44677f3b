use core::fmt;
use strum_macros::FromRepr;

/// Size of one bus operand or address, in bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, FromRepr)]
#[repr(u8)]
pub enum DataWidth {
    W8 = 1,
    W16 = 2,
    W32 = 4,
    W64 = 8,
}

impl DataWidth {
    pub const fn bytes(self) -> usize {
        self as usize
    }

    pub const fn bits(self) -> u32 {
        (self as u32) * 8
    }

    /// All-ones value covering exactly this many bytes.
    pub const fn value_mask(self) -> u64 {
        match self {
            DataWidth::W64 => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }

    /// Largest value that still fits into this many bytes, same as [DataWidth::value_mask].
    pub const fn max_value(self) -> u64 {
        self.value_mask()
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        u8::try_from(bytes).ok().and_then(DataWidth::from_repr)
    }

    pub const fn as_set(self) -> WidthSet {
        WidthSet(self as u8)
    }
}

impl fmt::Display for DataWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Set of operand sizes, one bit per size, where the bit value equals the size in bytes.
///
/// This is the same encoding Etherbone uses in the packet header and SDB uses in `bus_specific`,
/// so a set can be moved between them without translation.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct WidthSet(u8);

impl WidthSet {
    pub const EMPTY: WidthSet = WidthSet(0);
    pub const ALL: WidthSet = WidthSet(0x0F);

    /// Only the low nibble carries meaning, other bits are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        WidthSet(bits & 0x0F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, width: DataWidth) -> bool {
        self.0 & (width as u8) != 0
    }

    pub const fn intersect(self, other: WidthSet) -> WidthSet {
        WidthSet(self.0 & other.0)
    }

    pub const fn union(self, other: WidthSet) -> WidthSet {
        WidthSet(self.0 | other.0)
    }

    /// Every size smaller than or equal to `width`.
    ///
    /// A link with a given data width can carry any narrower operation through byte enables.
    pub const fn up_to(width: DataWidth) -> WidthSet {
        WidthSet(((width as u8) << 1).wrapping_sub(1) & 0x0F)
    }

    /// Every size strictly smaller than `width`.
    pub const fn below(width: DataWidth) -> WidthSet {
        WidthSet((width as u8).wrapping_sub(1) & 0x0F)
    }

    pub fn largest(self) -> Option<DataWidth> {
        if self.0 == 0 {
            return None;
        }
        let top = 1u8 << (7 - self.0.leading_zeros());
        DataWidth::from_repr(top)
    }

    pub fn smallest(self) -> Option<DataWidth> {
        if self.0 == 0 {
            return None;
        }
        DataWidth::from_repr(self.0 & self.0.wrapping_neg())
    }

    /// Smallest member that is at least `width` bytes wide.
    pub fn smallest_at_least(self, width: DataWidth) -> Option<DataWidth> {
        WidthSet(self.0 & !WidthSet::below(width).0).smallest()
    }

    pub fn iter(self) -> impl Iterator<Item = DataWidth> {
        [DataWidth::W8, DataWidth::W16, DataWidth::W32, DataWidth::W64]
            .into_iter()
            .filter(move |w| self.contains(*w))
    }
}

impl From<DataWidth> for WidthSet {
    fn from(width: DataWidth) -> Self {
        width.as_set()
    }
}

impl fmt::Debug for WidthSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|w| w.bytes())).finish()
    }
}

/// Byte order of a Wishbone slave. Unknown endianness is represented as `Option<Endianness>::None`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Endianness {
    Big,
    Little,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Big => f.write_str("big"),
            Endianness::Little => f.write_str("little"),
        }
    }
}
