//! Compiled pack/unpack programs (spec §4.2).
//!
//! `compile()` flattens a resolved `DataElement` into an `Instr` tree once,
//! at node-instance build time, so `exec::pack`/`exec::unpack` never walk
//! the element tree's `Option`s and reference-resolution branches on the
//! hot path. Each `Instr` variant corresponds to one opcode family from
//! `crate::vm::opcode::Op`.

use crate::error::{ApxResult, ErrorKind};
use crate::model::element::{DataElement, ElementKind, Range};
use crate::vm::opcode::ScalarKind;

/// One compiled instruction. A `Program` is a `Vec<Instr>` of length one at
/// the top level (the root element may itself be a record or array).
#[derive(Debug, Clone)]
pub enum Instr {
    /// Op::Pack / Op::Unpack on a scalar, with an optional Op::DataCtrl range check.
    Scalar { kind: ScalarKind, range: Option<Range> },
    /// Op::DataCtrl record-select: fields packed/unpacked in declaration order.
    /// Op::FlowCtrl marks the boundary between fields, implicit here as the
    /// end of each child's traversal.
    Record { fields: Vec<(String, Instr)>, size: u32 },
    /// Op::DataSize: fixed-length or length-prefixed dynamic array of `item`.
    Array {
        item: Box<Instr>,
        item_size: u32,
        max_len: u32,
        is_dynamic: bool,
    },
}

impl Instr {
    /// Packed size in bytes, computed once at compile time.
    pub fn size(&self) -> u32 {
        match self {
            Instr::Scalar { kind, .. } => kind.width() as u32,
            Instr::Record { size, .. } => *size,
            Instr::Array {
                item_size,
                max_len,
                is_dynamic,
                ..
            } => {
                let elems = item_size * max_len;
                if *is_dynamic {
                    crate::model::element::dynamic_length_prefix_width(*max_len) as u32 + elems
                } else {
                    elems
                }
            }
        }
    }
}

/// A compiled pack/unpack program for one root data element (one port).
#[derive(Debug, Clone)]
pub struct Program {
    pub root: Instr,
}

impl Program {
    pub fn packed_size(&self) -> u32 {
        self.root.size()
    }
}

/// Compile a resolved `DataElement` tree into a `Program`. Fails if the
/// element still carries an unresolved type reference.
pub fn compile(element: &DataElement) -> ApxResult<Program> {
    Ok(Program {
        root: compile_instr(element)?,
    })
}

fn compile_instr(element: &DataElement) -> ApxResult<Instr> {
    let base = match &element.kind {
        ElementKind::Record(fields) => {
            let mut compiled = Vec::with_capacity(fields.len());
            let mut size = 0u32;
            for f in fields {
                let instr = compile_instr(&f.element)?;
                size = size
                    .checked_add(instr.size())
                    .ok_or(ErrorKind::Memory)?;
                compiled.push((f.name.clone(), instr));
            }
            Instr::Record {
                fields: compiled,
                size,
            }
        }
        ElementKind::RefById(id) => {
            return Err(ErrorKind::UnresolvedReference(format!("T[{}]", id)))
        }
        ElementKind::RefByName(name) => return Err(ErrorKind::UnresolvedReference(name.clone())),
        other => Instr::Scalar {
            kind: ScalarKind::from(other),
            range: element.range,
        },
    };

    match element.array {
        None => Ok(base),
        Some(attr) => {
            let item_size = base.size();
            Ok(Instr::Array {
                item: Box::new(base),
                item_size,
                max_len: attr.max_len,
                is_dynamic: attr.is_dynamic,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::{ArrayAttr, RecordField};

    #[test]
    fn compile_scalar_with_range() {
        let e = DataElement {
            kind: ElementKind::U16,
            range: Some(Range::U32(0, 1000)),
            array: None,
        };
        let p = compile(&e).unwrap();
        assert_eq!(p.packed_size(), 2);
    }

    #[test]
    fn compile_record_sums_field_sizes() {
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
        let p = compile(&e).unwrap();
        assert_eq!(p.packed_size(), 5);
    }

    #[test]
    fn compile_dynamic_array_includes_prefix() {
        let e = DataElement {
            kind: ElementKind::U8,
            range: None,
            array: Some(ArrayAttr {
                max_len: 300,
                is_dynamic: true,
            }),
        };
        let p = compile(&e).unwrap();
        // 2-byte prefix (max_len > 255) + 300 items
        assert_eq!(p.packed_size(), 302);
    }

    #[test]
    fn compile_unresolved_reference_fails() {
        let e = DataElement::scalar(ElementKind::RefByName("SomeType".into()));
        assert!(compile(&e).is_err());
    }
}
