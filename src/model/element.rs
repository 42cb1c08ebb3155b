//! Data element tree: the typed shape of a value (scalar, record, or array
//! of those), per spec §3 and grounded on `apx_dataElement_t` in
//! `examples/original_source/apx/src/signature_parser.c`.

use crate::error::{ApxResult, ErrorKind};

/// Inclusive numeric range attached to an integer scalar element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    I32(i32, i32),
    U32(u32, u32),
    I64(i64, i64),
    U64(u64, u64),
}

impl Range {
    /// Check a signed value against the range, producing the closed error kind on failure.
    pub fn check_signed(&self, value: i64) -> ApxResult<()> {
        let (lo, hi) = match *self {
            Range::I32(lo, hi) => (lo as i64, hi as i64),
            Range::U32(lo, hi) => (lo as i64, hi as i64),
            Range::I64(lo, hi) => (lo, hi),
            Range::U64(lo, hi) => (lo as i64, hi as i64),
        };
        if value < lo || value > hi {
            return Err(ErrorKind::ValueRange { value, lo, hi });
        }
        Ok(())
    }

    /// Check an unsigned value against the range.
    pub fn check_unsigned(&self, value: u64) -> ApxResult<()> {
        let (lo, hi) = match *self {
            Range::I32(lo, hi) => (lo.max(0) as u64, hi as u64),
            Range::U32(lo, hi) => (lo as u64, hi as u64),
            Range::I64(lo, hi) => (lo.max(0) as u64, hi as u64),
            Range::U64(lo, hi) => (lo, hi),
        };
        if value < lo || value > hi {
            return Err(ErrorKind::ValueRange {
                value: value as i64,
                lo: lo as i64,
                hi: hi as i64,
            });
        }
        Ok(())
    }
}

/// A named field inside a record element.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub element: DataElement,
}

/// Array attribute on a data element: fixed length, or dynamic with a
/// declared maximum (actual length carried as a length-prefix on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayAttr {
    pub max_len: u32,
    pub is_dynamic: bool,
}

/// The shape of a typed value. A tree: scalars are leaves, records and
/// references-resolved carry children.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
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
    Record(Vec<RecordField>),
    /// Unresolved reference by numeric type-table id, pending `finalize()`.
    RefById(u32),
    /// Unresolved reference by type name, pending `finalize()`.
    RefByName(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    pub kind: ElementKind,
    pub range: Option<Range>,
    pub array: Option<ArrayAttr>,
}

impl DataElement {
    pub fn scalar(kind: ElementKind) -> Self {
        Self {
            kind,
            range: None,
            array: None,
        }
    }

    /// True if a range attribute is permitted on this kind (integers only).
    pub fn accepts_range(kind: &ElementKind) -> bool {
        matches!(
            kind,
            ElementKind::I8
                | ElementKind::I16
                | ElementKind::I32
                | ElementKind::I64
                | ElementKind::U8
                | ElementKind::U16
                | ElementKind::U32
                | ElementKind::U64
        )
    }

    /// Validate invariant: ranges forbidden on char/bool/byte/record (spec §3).
    pub fn validate_range_kind(kind: &ElementKind, range: Option<&Range>) -> ApxResult<()> {
        if range.is_some() && !Self::accepts_range(kind) {
            return Err(ErrorKind::InvalidArgument(
                "range attribute not permitted on this element kind".to_string(),
            ));
        }
        Ok(())
    }

    /// Packed byte width of a scalar kind, ignoring array multiplicity.
    pub fn scalar_width(kind: &ElementKind) -> Option<u32> {
        Some(match kind {
            ElementKind::I8 | ElementKind::U8 | ElementKind::Bool | ElementKind::Byte => 1,
            ElementKind::I16 | ElementKind::U16 | ElementKind::Char16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::Char32 => 4,
            ElementKind::I64 | ElementKind::U64 => 8,
            ElementKind::Char | ElementKind::Char8 => 1,
            ElementKind::Record(_) | ElementKind::RefById(_) | ElementKind::RefByName(_) => {
                return None
            }
        })
    }

    /// Packed size in bytes of this element including array multiplicity.
    /// For a dynamic array this is the *maximum* size (length prefix + max_len * item size).
    pub fn packed_size(&self) -> ApxResult<u32> {
        let item_size = match &self.kind {
            ElementKind::Record(fields) => {
                let mut total = 0u32;
                for f in fields {
                    total = total
                        .checked_add(f.element.packed_size()?)
                        .ok_or(ErrorKind::Memory)?;
                }
                total
            }
            ElementKind::RefById(id) => {
                return Err(ErrorKind::UnresolvedReference(format!("T[{}]", id)))
            }
            ElementKind::RefByName(name) => {
                return Err(ErrorKind::UnresolvedReference(name.clone()))
            }
            other => Self::scalar_width(other).expect("scalar width for non-record kind"),
        };

        match self.array {
            None => Ok(item_size),
            Some(attr) => {
                let elems_size = item_size
                    .checked_mul(attr.max_len)
                    .ok_or(ErrorKind::Memory)?;
                if attr.is_dynamic {
                    let prefix = dynamic_length_prefix_width(attr.max_len);
                    Ok(prefix as u32 + elems_size)
                } else {
                    Ok(elems_size)
                }
            }
        }
    }
}

impl DataElement {
    /// Canonical data-signature text for this (fully resolved) element.
    /// Two ports with equal `(name, signature)` are routing matches (spec §3/§4.4).
    pub fn to_signature_string(&self) -> ApxResult<String> {
        let mut out = String::new();
        self.write_signature(&mut out)?;
        Ok(out)
    }

    fn write_signature(&self, out: &mut String) -> ApxResult<()> {
        match &self.kind {
            ElementKind::I8 => out.push('c'),
            ElementKind::U8 => out.push('C'),
            ElementKind::I16 => out.push('s'),
            ElementKind::U16 => out.push('S'),
            ElementKind::I32 => out.push('l'),
            ElementKind::U32 => out.push('L'),
            ElementKind::I64 => out.push('q'),
            ElementKind::U64 => out.push('Q'),
            ElementKind::Char => out.push('a'),
            ElementKind::Char8 => out.push('A'),
            ElementKind::Bool => out.push('b'),
            ElementKind::Byte => out.push('B'),
            ElementKind::Char16 => out.push('u'),
            ElementKind::Char32 => out.push('U'),
            ElementKind::Record(fields) => {
                out.push('{');
                for f in fields {
                    out.push('"');
                    out.push_str(&f.name);
                    out.push('"');
                    f.element.write_signature(out)?;
                }
                out.push('}');
            }
            ElementKind::RefById(id) => {
                return Err(ErrorKind::UnresolvedReference(format!("T[{}]", id)))
            }
            ElementKind::RefByName(name) => {
                return Err(ErrorKind::UnresolvedReference(name.clone()))
            }
        }
        if let Some(range) = &self.range {
            match range {
                Range::I32(lo, hi) => out.push_str(&format!("({},{})", lo, hi)),
                Range::U32(lo, hi) => out.push_str(&format!("({},{})", lo, hi)),
                Range::I64(lo, hi) => out.push_str(&format!("({},{})", lo, hi)),
                Range::U64(lo, hi) => out.push_str(&format!("({},{})", lo, hi)),
            }
        }
        if let Some(attr) = &self.array {
            if attr.is_dynamic {
                out.push_str(&format!("[{}*]", attr.max_len));
            } else {
                out.push_str(&format!("[{}]", attr.max_len));
            }
        }
        Ok(())
    }
}

/// Width in bytes of the dynamic-array length prefix for a given declared max.
/// N <= 255 => u8, N <= 65535 => u16, else u32 (spec §4.2).
pub fn dynamic_length_prefix_width(max_len: u32) -> u8 {
    if max_len <= 255 {
        1
    } else if max_len <= 65535 {
        2
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_signed_boundary() {
        let r = Range::U32(0, 65535);
        assert!(r.check_unsigned(65535).is_ok());
        assert!(r.check_unsigned(65536).is_err());
    }

    #[test]
    fn packed_size_scalar() {
        let e = DataElement::scalar(ElementKind::U16);
        assert_eq!(e.packed_size().unwrap(), 2);
    }

    #[test]
    fn packed_size_record() {
        let e = DataElement {
            kind: ElementKind::Record(vec![
                RecordField {
                    name: "a".into(),
                    element: DataElement::scalar(ElementKind::U8),
                },
                RecordField {
                    name: "b".into(),
                    element: DataElement::scalar(ElementKind::U32),
                },
            ]),
            range: None,
            array: None,
        };
        assert_eq!(e.packed_size().unwrap(), 5);
    }

    #[test]
    fn packed_size_dynamic_array_prefix_width() {
        assert_eq!(dynamic_length_prefix_width(255), 1);
        assert_eq!(dynamic_length_prefix_width(256), 2);
        assert_eq!(dynamic_length_prefix_width(65536), 4);
    }

    #[test]
    fn range_forbidden_on_record() {
        let kind = ElementKind::Record(vec![]);
        assert!(DataElement::validate_range_kind(&kind, Some(&Range::I32(0, 1))).is_err());
    }

    #[test]
    fn signature_string_scalar_with_range() {
        let e = DataElement {
            kind: ElementKind::U16,
            range: Some(Range::U32(0, 65535)),
            array: None,
        };
        assert_eq!(e.to_signature_string().unwrap(), "S(0,65535)");
    }

    #[test]
    fn signature_string_record() {
        let e = DataElement {
            kind: ElementKind::Record(vec![
                RecordField {
                    name: "X".into(),
                    element: DataElement::scalar(ElementKind::U8),
                },
                RecordField {
                    name: "Y".into(),
                    element: DataElement::scalar(ElementKind::U8),
                },
            ]),
            range: None,
            array: None,
        };
        assert_eq!(e.to_signature_string().unwrap(), r#"{"X"C"Y"C}"#);
    }

    #[test]
    fn signature_string_dynamic_array() {
        let e = DataElement {
            kind: ElementKind::U8,
            range: None,
            array: Some(ArrayAttr {
                max_len: 255,
                is_dynamic: true,
            }),
        };
        assert_eq!(e.to_signature_string().unwrap(), "C[255*]");
    }
}
