use std::fmt;

/// Set of access fields a caller can supply.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct ParamFields(u8);

impl ParamFields {
    pub const MASK: ParamFields = ParamFields(0x10);
    pub const OFFSET: ParamFields = ParamFields(0x08);
    pub const VALUE: ParamFields = ParamFields(0x04);
    pub const NETADDRESS: ParamFields = ParamFields(0x02);
    pub const PORT: ParamFields = ParamFields(0x01);

    pub const fn empty() -> Self {
        ParamFields(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        ParamFields(bits & 0x1F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ParamFields) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: ParamFields) -> Self {
        ParamFields(self.0 | other.0)
    }

    pub fn insert(&mut self, other: ParamFields) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ParamFields) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ParamFields {
    type Output = ParamFields;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Debug for ParamFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ParamFields, &str); 5] = [
            (ParamFields::MASK, "MASK"),
            (ParamFields::OFFSET, "OFFSET"),
            (ParamFields::VALUE, "VALUE"),
            (ParamFields::NETADDRESS, "NETADDRESS"),
            (ParamFields::PORT, "PORT"),
        ];
        f.debug_set()
            .entries(
                NAMES
                    .iter()
                    .filter(|(field, _)| self.contains(*field))
                    .map(|(_, name)| name),
            )
            .finish()
    }
}

impl fmt::Display for ParamFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Fields an access needs from its caller, plus the admissible mask and offset choices.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParamConfig {
    pub required: ParamFields,
    pub masks: Vec<u64>,
    pub offsets: Vec<u64>,
}

impl ParamConfig {
    /// Nothing needed from the caller.
    pub fn none() -> Self {
        ParamConfig::default()
    }

    pub fn require(mut self, fields: ParamFields) -> Self {
        self.required.insert(fields);
        self
    }

    /// Caller picks one of `masks` by index.
    pub fn with_masks(mut self, masks: Vec<u64>) -> Self {
        self.required.insert(ParamFields::MASK);
        self.masks = masks;
        self
    }

    /// Caller picks one of `offsets` by index.
    pub fn with_offsets(mut self, offsets: Vec<u64>) -> Self {
        self.required.insert(ParamFields::OFFSET);
        self.offsets = offsets;
        self
    }
}

/// Values supplied by a caller for one access. Every setter marks its field as given.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParamAccess {
    given: ParamFields,
    net_address: String,
    port: u16,
    mask_index: usize,
    offset_index: usize,
    value: u64,
}

impl ParamAccess {
    pub fn new() -> Self {
        ParamAccess::default()
    }

    pub fn given(&self) -> ParamFields {
        self.given
    }

    /// `<proto>/<host>[/<port>]`.
    pub fn set_net_address(&mut self, address: impl Into<String>) -> &mut Self {
        self.net_address = address.into();
        self.given.insert(ParamFields::NETADDRESS);
        self
    }

    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self.given.insert(ParamFields::PORT);
        self
    }

    pub fn set_mask_index(&mut self, index: usize) -> &mut Self {
        self.mask_index = index;
        self.given.insert(ParamFields::MASK);
        self
    }

    pub fn set_offset_index(&mut self, index: usize) -> &mut Self {
        self.offset_index = index;
        self.given.insert(ParamFields::OFFSET);
        self
    }

    pub fn set_value(&mut self, value: u64) -> &mut Self {
        self.value = value;
        self.given.insert(ParamFields::VALUE);
        self
    }

    pub fn net_address(&self) -> &str {
        &self.net_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn mask_index(&self) -> usize {
        self.mask_index
    }

    pub fn offset_index(&self) -> usize {
        self.offset_index
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Forget which fields were given. The values stay so the instance can be refilled.
    pub fn reset(&mut self) {
        self.given = ParamFields::empty();
    }
}

/// Caller values for a whole operation, one entry per access, in order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParamOperation {
    accesses: Vec<ParamAccess>,
}

impl ParamOperation {
    pub fn new() -> Self {
        ParamOperation::default()
    }

    /// `len` empty entries.
    pub fn with_len(len: usize) -> Self {
        ParamOperation {
            accesses: vec![ParamAccess::default(); len],
        }
    }

    pub fn push(&mut self, access: ParamAccess) -> &mut Self {
        self.accesses.push(access);
        self
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ParamAccess> {
        self.accesses.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamAccess> {
        self.accesses.iter()
    }

    pub fn reset(&mut self) {
        self.accesses.iter_mut().for_each(ParamAccess::reset);
    }
}

impl FromIterator<ParamAccess> for ParamOperation {
    fn from_iter<T: IntoIterator<Item = ParamAccess>>(iter: T) -> Self {
        ParamOperation {
            accesses: iter.into_iter().collect(),
        }
    }
}
