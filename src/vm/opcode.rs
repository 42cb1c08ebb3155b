//! Opcode vocabulary for the serialization VM (spec §4.2).
//!
//! The wire-visible unit here is the packed *port data*, not the pack/unpack
//! program itself — node text and port buffers cross the wire, compiled
//! programs never do. The program is therefore represented as a typed
//! instruction tree (`crate::vm::program::Instr`) rather than a raw
//! bit-packed byte stream; this module keeps the opcode vocabulary the
//! instruction tree is built from, matching the five opcode families from
//! the spec one-to-one.

/// The five opcode families an instruction can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Read one element at the cursor, advance by its width.
    Unpack,
    /// Write one element at the cursor, advance by its width.
    Pack,
    /// Emit/consume an array length: fixed N, or a length-prefixed dynamic array.
    DataSize,
    /// Select a record field by name, or impose a numeric bound check.
    DataCtrl,
    /// Marks the end of a record field / array element during traversal.
    FlowCtrl,
}

/// Scalar variants addressable by `Op::Pack`/`Op::Unpack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    Byte,
    Char,
    Char8,
    Char16,
    Char32,
}

impl ScalarKind {
    /// Wire width in bytes, little-endian for all multi-byte widths (spec §4.2).
    pub fn width(self) -> usize {
        match self {
            ScalarKind::I8 | ScalarKind::U8 | ScalarKind::Bool | ScalarKind::Byte => 1,
            ScalarKind::I16 | ScalarKind::U16 | ScalarKind::Char16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::Char32 => 4,
            ScalarKind::I64 | ScalarKind::U64 => 8,
            ScalarKind::Char | ScalarKind::Char8 => 1,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, ScalarKind::I8 | ScalarKind::I16 | ScalarKind::I32 | ScalarKind::I64)
    }
}

impl From<&crate::model::element::ElementKind> for ScalarKind {
    fn from(kind: &crate::model::element::ElementKind) -> Self {
        use crate::model::element::ElementKind as K;
        match kind {
            K::I8 => ScalarKind::I8,
            K::I16 => ScalarKind::I16,
            K::I32 => ScalarKind::I32,
            K::I64 => ScalarKind::I64,
            K::U8 => ScalarKind::U8,
            K::U16 => ScalarKind::U16,
            K::U32 => ScalarKind::U32,
            K::U64 => ScalarKind::U64,
            K::Bool => ScalarKind::Bool,
            K::Byte => ScalarKind::Byte,
            K::Char => ScalarKind::Char,
            K::Char8 => ScalarKind::Char8,
            K::Char16 => ScalarKind::Char16,
            K::Char32 => ScalarKind::Char32,
            K::Record(_) | K::RefById(_) | K::RefByName(_) => {
                unreachable!("non-scalar element kind cannot convert to ScalarKind")
            }
        }
    }
}
