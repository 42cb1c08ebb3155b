//! VM execution: interpret a compiled `Program` against a byte buffer
//! (spec §4.2). `pack` writes a `Value` into the buffer; `unpack` reads a
//! `Value` back out. Both are pure functions over `&mut [u8]` / `&[u8]` —
//! no I/O, no locking; callers (NodeInstance) hold whatever lock guards the
//! buffer.

use crate::error::{ApxResult, ErrorKind};
use crate::model::element::dynamic_length_prefix_width;
use crate::model::value::Value;
use crate::vm::opcode::ScalarKind;
use crate::vm::program::{Instr, Program};

fn take<'a>(buf: &'a [u8], offset: usize, len: usize) -> ApxResult<&'a [u8]> {
    buf.get(offset..offset + len).ok_or(ErrorKind::UnexpectedEnd)
}

fn take_mut<'a>(buf: &'a mut [u8], offset: usize, len: usize) -> ApxResult<&'a mut [u8]> {
    buf.get_mut(offset..offset + len)
        .ok_or(ErrorKind::UnexpectedEnd)
}

fn pack_scalar(kind: ScalarKind, buf: &mut [u8], offset: usize, raw: u64) -> ApxResult<()> {
    let width = kind.width();
    let dst = take_mut(buf, offset, width)?;
    match width {
        1 => dst[0] = raw as u8,
        2 => dst.copy_from_slice(&(raw as u16).to_le_bytes()),
        4 => dst.copy_from_slice(&(raw as u32).to_le_bytes()),
        8 => dst.copy_from_slice(&raw.to_le_bytes()),
        _ => unreachable!("scalar width is always 1, 2, 4 or 8"),
    }
    Ok(())
}

fn unpack_scalar_raw(kind: ScalarKind, buf: &[u8], offset: usize) -> ApxResult<u64> {
    let width = kind.width();
    let src = take(buf, offset, width)?;
    Ok(match width {
        1 => src[0] as u64,
        2 => u16::from_le_bytes(src.try_into().unwrap()) as u64,
        4 => u32::from_le_bytes(src.try_into().unwrap()) as u64,
        8 => u64::from_le_bytes(src.try_into().unwrap()),
        _ => unreachable!("scalar width is always 1, 2, 4 or 8"),
    })
}

/// Sign-extend a raw little-endian scalar read according to its declared width.
fn sign_extend(kind: ScalarKind, raw: u64) -> i64 {
    match kind.width() {
        1 => raw as u8 as i8 as i64,
        2 => raw as u16 as i16 as i64,
        4 => raw as u32 as i32 as i64,
        8 => raw as i64,
        _ => unreachable!(),
    }
}

fn pack_instr(instr: &Instr, buf: &mut [u8], offset: usize, value: &Value) -> ApxResult<()> {
    match instr {
        Instr::Scalar { kind, range } => {
            let raw = match kind {
                ScalarKind::Bool => value
                    .as_bool()
                    .ok_or_else(|| ErrorKind::InvalidArgument("expected bool value".into()))?
                    as u64,
                _ if kind.is_signed() => {
                    let v = value
                        .as_i64()
                        .ok_or_else(|| ErrorKind::InvalidArgument("expected integer value".into()))?;
                    if let Some(r) = range {
                        r.check_signed(v)?;
                    }
                    v as u64
                }
                _ => {
                    let v = value
                        .as_u64()
                        .ok_or_else(|| ErrorKind::InvalidArgument("expected integer value".into()))?;
                    if let Some(r) = range {
                        r.check_unsigned(v)?;
                    }
                    v
                }
            };
            pack_scalar(*kind, buf, offset, raw)
        }
        Instr::Record { fields, .. } => {
            let hash = match value {
                Value::Hash(h) => h,
                _ => return Err(ErrorKind::InvalidArgument("expected record value".into())),
            };
            let mut cursor = offset;
            for (name, field) in fields {
                let field_value = hash
                    .get(name)
                    .ok_or_else(|| ErrorKind::NotFound(format!("record field '{}'", name)))?;
                pack_instr(field, buf, cursor, field_value)?;
                cursor += field.size() as usize;
            }
            Ok(())
        }
        Instr::Array {
            item,
            item_size,
            max_len,
            is_dynamic,
        } => {
            let items = value
                .as_array()
                .ok_or_else(|| ErrorKind::InvalidArgument("expected array value".into()))?;
            let mut cursor = offset;
            if *is_dynamic {
                let len = items.len() as u32;
                if len > *max_len {
                    return Err(ErrorKind::ArrayLength {
                        actual: len,
                        max: *max_len,
                    });
                }
                let prefix_width = dynamic_length_prefix_width(*max_len) as usize;
                let dst = take_mut(buf, cursor, prefix_width)?;
                match prefix_width {
                    1 => dst[0] = len as u8,
                    2 => dst.copy_from_slice(&(len as u16).to_le_bytes()),
                    4 => dst.copy_from_slice(&len.to_le_bytes()),
                    _ => unreachable!(),
                }
                cursor += prefix_width;
            } else if items.len() as u32 != *max_len {
                return Err(ErrorKind::ArrayLength {
                    actual: items.len() as u32,
                    max: *max_len,
                });
            }
            for v in items {
                pack_instr(item, buf, cursor, v)?;
                cursor += *item_size as usize;
            }
            if *is_dynamic {
                let written = items.len() as u32;
                for pad in written..*max_len {
                    let pad_offset = cursor + ((pad - written) as usize) * (*item_size as usize);
                    take_mut(buf, pad_offset, *item_size as usize)?.fill(0);
                }
            }
            Ok(())
        }
    }
}

fn unpack_instr(instr: &Instr, buf: &[u8], offset: usize) -> ApxResult<Value> {
    match instr {
        Instr::Scalar { kind, range } => {
            let raw = unpack_scalar_raw(*kind, buf, offset)?;
            if *kind == ScalarKind::Bool {
                return Ok(Value::Bool(raw != 0));
            }
            if kind.is_signed() {
                let v = sign_extend(*kind, raw);
                if let Some(r) = range {
                    r.check_signed(v)?;
                }
                Ok(Value::I64(v))
            } else {
                if let Some(r) = range {
                    r.check_unsigned(raw)?;
                }
                Ok(Value::U64(raw))
            }
        }
        Instr::Record { fields, .. } => {
            let mut hash = indexmap::IndexMap::with_capacity(fields.len());
            let mut cursor = offset;
            for (name, field) in fields {
                hash.insert(name.clone(), unpack_instr(field, buf, cursor)?);
                cursor += field.size() as usize;
            }
            Ok(Value::Hash(hash))
        }
        Instr::Array {
            item,
            item_size,
            max_len,
            is_dynamic,
        } => {
            let mut cursor = offset;
            let len = if *is_dynamic {
                let prefix_width = dynamic_length_prefix_width(*max_len) as usize;
                let src = take(buf, cursor, prefix_width)?;
                let len = match prefix_width {
                    1 => src[0] as u32,
                    2 => u16::from_le_bytes(src.try_into().unwrap()) as u32,
                    4 => u32::from_le_bytes(src.try_into().unwrap()),
                    _ => unreachable!(),
                };
                cursor += prefix_width;
                if len > *max_len {
                    return Err(ErrorKind::ArrayLength {
                        actual: len,
                        max: *max_len,
                    });
                }
                len
            } else {
                *max_len
            };
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item_offset = cursor + (i as usize) * (*item_size as usize);
                items.push(unpack_instr(item, buf, item_offset)?);
            }
            Ok(Value::Array(items))
        }
    }
}

/// Write `value` into `buf` starting at byte 0, per `program`. Packs into a
/// scratch buffer first and copies into `buf` only once every field/element
/// has packed successfully, so a failed pack (a range check or array-length
/// check tripping partway through a record or array) never leaves `buf`
/// partially overwritten. Callers such as `NodeInstance::write_provide_port`
/// pass a live slice of the real port buffer, not a scratch copy of their own.
pub fn pack(program: &Program, buf: &mut [u8], value: &Value) -> ApxResult<()> {
    let mut scratch = vec![0u8; buf.len()];
    pack_instr(&program.root, &mut scratch, 0, value)?;
    buf.copy_from_slice(&scratch);
    Ok(())
}

/// Read a `Value` out of `buf` starting at byte 0, per `program`.
pub fn unpack(program: &Program, buf: &[u8]) -> ApxResult<Value> {
    unpack_instr(&program.root, buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::{ArrayAttr, DataElement, ElementKind, Range, RecordField};
    use crate::vm::program::compile;
    use indexmap::IndexMap;

    #[test]
    fn scalar_round_trip_u16() {
        let e = DataElement::scalar(ElementKind::U16);
        let p = compile(&e).unwrap();
        let mut buf = vec![0u8; p.packed_size() as usize];
        pack(&p, &mut buf, &Value::U64(4242)).unwrap();
        assert_eq!(unpack(&p, &buf).unwrap(), Value::U64(4242));
    }

    #[test]
    fn scalar_range_rejects_out_of_bounds() {
        let e = DataElement {
            kind: ElementKind::U16,
            range: Some(Range::U32(0, 100)),
            array: None,
        };
        let p = compile(&e).unwrap();
        let mut buf = vec![0u8; p.packed_size() as usize];
        assert!(pack(&p, &mut buf, &Value::U64(101)).is_err());
    }

    #[test]
    fn signed_scalar_round_trip_negative() {
        let e = DataElement::scalar(ElementKind::I32);
        let p = compile(&e).unwrap();
        let mut buf = vec![0u8; p.packed_size() as usize];
        pack(&p, &mut buf, &Value::I64(-12345)).unwrap();
        assert_eq!(unpack(&p, &buf).unwrap(), Value::I64(-12345));
    }

    #[test]
    fn record_round_trip() {
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
        let mut buf = vec![0u8; p.packed_size() as usize];
        let mut h = IndexMap::new();
        h.insert("a".to_string(), Value::U64(7));
        h.insert("b".to_string(), Value::U64(99999));
        let v = Value::Hash(h);
        pack(&p, &mut buf, &v).unwrap();
        assert_eq!(unpack(&p, &buf).unwrap(), v);
    }

    #[test]
    fn dynamic_array_round_trip_partial_length() {
        let e = DataElement {
            kind: ElementKind::U8,
            range: None,
            array: Some(ArrayAttr {
                max_len: 10,
                is_dynamic: true,
            }),
        };
        let p = compile(&e).unwrap();
        let mut buf = vec![0xFFu8; p.packed_size() as usize];
        let v = Value::Array(vec![Value::U64(1), Value::U64(2), Value::U64(3)]);
        pack(&p, &mut buf, &v).unwrap();
        assert_eq!(unpack(&p, &buf).unwrap(), v);
        // prefix byte holds the actual length
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn dynamic_array_rejects_over_max() {
        let e = DataElement {
            kind: ElementKind::U8,
            range: None,
            array: Some(ArrayAttr {
                max_len: 2,
                is_dynamic: true,
            }),
        };
        let p = compile(&e).unwrap();
        let mut buf = vec![0u8; p.packed_size() as usize];
        let v = Value::Array(vec![Value::U64(1), Value::U64(2), Value::U64(3)]);
        assert!(pack(&p, &mut buf, &v).is_err());
    }

    #[test]
    fn fixed_array_requires_exact_length() {
        let e = DataElement {
            kind: ElementKind::U8,
            range: None,
            array: Some(ArrayAttr {
                max_len: 3,
                is_dynamic: false,
            }),
        };
        let p = compile(&e).unwrap();
        let mut buf = vec![0u8; p.packed_size() as usize];
        let v = Value::Array(vec![Value::U64(1), Value::U64(2)]);
        assert!(pack(&p, &mut buf, &v).is_err());
    }

    #[test]
    fn bool_round_trip() {
        let e = DataElement::scalar(ElementKind::Bool);
        let p = compile(&e).unwrap();
        let mut buf = vec![0u8; p.packed_size() as usize];
        pack(&p, &mut buf, &Value::Bool(true)).unwrap();
        assert_eq!(unpack(&p, &buf).unwrap(), Value::Bool(true));
    }

    #[test]
    fn unpack_truncated_buffer_errors() {
        let e = DataElement::scalar(ElementKind::U32);
        let p = compile(&e).unwrap();
        let buf = vec![0u8; 2];
        assert!(unpack(&p, &buf).is_err());
    }

    #[test]
    fn failed_record_pack_leaves_buffer_untouched() {
        let e = DataElement {
            kind: ElementKind::Record(vec![
                RecordField {
                    name: "a".into(),
                    element: DataElement::scalar(ElementKind::U8),
                },
                RecordField {
                    name: "b".into(),
                    element: DataElement {
                        kind: ElementKind::U8,
                        range: Some(Range::U32(0, 10)),
                        array: None,
                    },
                },
            ]),
            range: None,
            array: None,
        };
        let p = compile(&e).unwrap();
        let mut buf = vec![0xABu8; p.packed_size() as usize];
        let mut h = IndexMap::new();
        h.insert("a".to_string(), Value::U64(7));
        h.insert("b".to_string(), Value::U64(200)); // out of range, fails after "a" would pack
        let v = Value::Hash(h);
        assert!(pack(&p, &mut buf, &v).is_err());
        assert_eq!(buf, vec![0xABu8; p.packed_size() as usize]);
    }
}
