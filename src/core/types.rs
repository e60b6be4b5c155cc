//! Core value types shared by the parser, the graph store, and the loader

use std::fmt;

/// Machine address as found in instruction position columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Addr(pub u64);

impl Addr {
    /// Address shifted forward by a relative delta
    pub fn offset(self, delta: u64) -> Addr {
        Addr(self.0.wrapping_add(delta))
    }

    /// Address shifted backward by a relative delta, saturating at zero
    pub fn back(self, delta: u64) -> Addr {
        Addr(self.0.saturating_sub(delta))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value)
    }
}

/// The loader's running position: an address and/or line range.
///
/// `from` and `to` coincide for single positions; range forms widen `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub from_addr: Addr,
    pub to_addr: Addr,
    pub from_line: u64,
    pub to_line: u64,
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            /// Position of the entity in its arena
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

entity_id!(
    /// Handle of an interned binary object
    ObjectId
);
entity_id!(
    /// Handle of an interned source file
    FileId
);
entity_id!(
    /// Handle of an interned function
    FunctionId
);
entity_id!(
    /// Handle of a (function, file) source projection
    SourceRefId
);
entity_id!(
    /// Handle of a source line entity
    LineId
);
entity_id!(
    /// Handle of a machine instruction entity
    InstrId
);
entity_id!(
    /// Handle of a call edge
    CallId
);
entity_id!(
    /// Handle of a jump edge
    JumpId
);
entity_id!(
    /// Slot of an event type in the graph-wide registry
    EventTypeId
);
