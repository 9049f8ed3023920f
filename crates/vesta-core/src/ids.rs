use std::fmt;

/// Stable key of a record in the record store.
///
/// Id `0` is the header slot and never names a filesystem entry; id `1` is the root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u32);

impl RecordId {
    /// The header slot. Used as "no record" in parent and free-list fields.
    pub const NONE: RecordId = RecordId(0);
    pub const ROOT: RecordId = RecordId(1);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        RecordId(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn idx(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interned string id from the name table. `NameId::EMPTY` is the empty string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(u32);

impl NameId {
    pub const EMPTY: NameId = NameId(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        NameId(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameId({})", self.0)
    }
}

/// Key of a named attribute in a record's attribute chain.
///
/// Ids below [`AttributeId::FIRST_USER`] are reserved by the store itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(u32);

impl AttributeId {
    /// Tombstone marker for released attribute pages; never a valid key.
    pub const FREE: AttributeId = AttributeId(0);
    /// The children list of a directory record.
    pub const CHILDREN: AttributeId = AttributeId(1);
    pub const FIRST_USER: u32 = 16;

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        AttributeId(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Maps an interned attribute name to its key, past the reserved range.
    pub fn for_name(name: NameId) -> Self {
        AttributeId(
            name.to_raw()
                .checked_add(Self::FIRST_USER)
                .expect("attribute name id overflow"),
        )
    }
}

impl fmt::Debug for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeId({})", self.0)
    }
}

/// Identity of an attribute page: the byte offset of its header in the attributes file.
///
/// Offset `0` is the file header, so `PageId::NONE` doubles as "end of chain".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u32);

impl PageId {
    pub const NONE: PageId = PageId(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        PageId(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn offset(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({:#x})", self.0)
    }
}
