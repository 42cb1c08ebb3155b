//! Recursive-descent parser for the APX data-signature grammar (spec §4.1),
//! grounded on `apx/src/signature_parser.c`'s character-class switch.

use crate::error::{ApxResult, ErrorKind};
use crate::model::element::{ArrayAttr, DataElement, ElementKind, Range, RecordField};

fn parse_err(message: impl Into<String>) -> ErrorKind {
    // Line number is filled in by the document-level caller, which knows
    // which logical line this signature text came from.
    ErrorKind::Parse { line: 0, message: message.into() }
}

/// Parse a complete data-signature string into a `DataElement`. Fails with
/// `StrayCharacters` if trailing bytes remain after a well-formed element.
pub fn parse(text: &str) -> ApxResult<DataElement> {
    let (element, consumed) = parse_prefix(text)?;
    if consumed != text.as_bytes().len() {
        return Err(ErrorKind::StrayCharacters(0));
    }
    Ok(element)
}

/// Parse a data-signature occupying a *prefix* of `text`, returning the
/// element and the number of bytes consumed. Used by the document parser,
/// where a signature is immediately followed by `:<attributes>`.
pub fn parse_prefix(text: &str) -> ApxResult<(DataElement, usize)> {
    let bytes = text.as_bytes();
    let mut pos = 0usize;
    let element = parse_element(bytes, &mut pos)?;
    Ok((element, pos))
}

/// Parse one `"field-name"data-signature` pair, used inside a record body.
fn parse_named_field(bytes: &[u8], pos: &mut usize) -> ApxResult<RecordField> {
    expect(bytes, pos, b'"')?;
    let name_start = *pos;
    while *pos < bytes.len() && bytes[*pos] != b'"' {
        *pos += 1;
    }
    if *pos >= bytes.len() {
        return Err(parse_err("unterminated field name"));
    }
    let name = String::from_utf8(bytes[name_start..*pos].to_vec())
        .map_err(|_| parse_err("field name is not valid UTF-8"))?;
    *pos += 1; // closing quote
    let element = parse_element(bytes, pos)?;
    Ok(RecordField { name, element })
}

fn expect(bytes: &[u8], pos: &mut usize, ch: u8) -> ApxResult<()> {
    if bytes.get(*pos) == Some(&ch) {
        *pos += 1;
        Ok(())
    } else {
        Err(parse_err(format!("expected '{}'", ch as char)))
    }
}

fn peek(bytes: &[u8], pos: usize) -> Option<u8> {
    bytes.get(pos).copied()
}

fn parse_element(bytes: &[u8], pos: &mut usize) -> ApxResult<DataElement> {
    let c = peek(bytes, *pos).ok_or_else(|| parse_err("unexpected end of signature"))?;
    *pos += 1;

    let kind = match c {
        b'c' => ElementKind::I8,
        b'C' => ElementKind::U8,
        b's' => ElementKind::I16,
        b'S' => ElementKind::U16,
        b'l' => ElementKind::I32,
        b'L' => ElementKind::U32,
        b'q' => ElementKind::I64,
        b'Q' => ElementKind::U64,
        b'a' => ElementKind::Char,
        b'A' => ElementKind::Char8,
        b'b' => ElementKind::Bool,
        b'B' => ElementKind::Byte,
        b'u' => ElementKind::Char16,
        b'U' => ElementKind::Char32,
        b'{' => {
            let mut fields = Vec::new();
            loop {
                if *pos >= bytes.len() {
                    return Err(parse_err("unterminated record"));
                }
                if bytes[*pos] == b'}' {
                    *pos += 1;
                    break;
                }
                fields.push(parse_named_field(bytes, pos)?);
            }
            ElementKind::Record(fields)
        }
        b'T' => return parse_type_reference(bytes, pos),
        other => return Err(parse_err(format!("unrecognized data-signature character '{}'", other as char))),
    };

    let range = if DataElement::accepts_range(&kind) {
        parse_range(bytes, pos, &kind)?
    } else {
        None
    };
    let array = parse_array_suffix(bytes, pos)?;

    Ok(DataElement { kind, range, array })
}

fn parse_type_reference(bytes: &[u8], pos: &mut usize) -> ApxResult<DataElement> {
    expect(bytes, pos, b'[')?;
    let kind = if peek(bytes, *pos) == Some(b'"') {
        *pos += 1;
        let start = *pos;
        while *pos < bytes.len() && bytes[*pos] != b'"' {
            *pos += 1;
        }
        if *pos >= bytes.len() {
            return Err(parse_err("unterminated type reference name"));
        }
        let name = String::from_utf8(bytes[start..*pos].to_vec())
            .map_err(|_| parse_err("type reference name is not valid UTF-8"))?;
        *pos += 1;
        ElementKind::RefByName(name)
    } else {
        let start = *pos;
        while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
            *pos += 1;
        }
        if *pos == start {
            return Err(parse_err("expected type reference id"));
        }
        let id: u32 = std::str::from_utf8(&bytes[start..*pos])
            .unwrap()
            .parse()
            .map_err(|_| parse_err("type reference id out of range"))?;
        ElementKind::RefById(id)
    };
    expect(bytes, pos, b']')?;
    let array = parse_array_suffix(bytes, pos)?;
    Ok(DataElement { kind, range: None, array })
}

fn parse_uint(bytes: &[u8], pos: &mut usize) -> ApxResult<u64> {
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == start {
        return Err(parse_err("expected digit"));
    }
    std::str::from_utf8(&bytes[start..*pos])
        .unwrap()
        .parse()
        .map_err(|_| parse_err("integer literal out of range"))
}

fn parse_int(bytes: &[u8], pos: &mut usize) -> ApxResult<i64> {
    let negative = peek(bytes, *pos) == Some(b'-');
    if negative {
        *pos += 1;
    }
    let magnitude = parse_uint(bytes, pos)?;
    Ok(if negative { -(magnitude as i64) } else { magnitude as i64 })
}

fn parse_range(bytes: &[u8], pos: &mut usize, kind: &ElementKind) -> ApxResult<Option<Range>> {
    if peek(bytes, *pos) != Some(b'(') {
        return Ok(None);
    }
    *pos += 1;
    let is_signed = matches!(kind, ElementKind::I8 | ElementKind::I16 | ElementKind::I32 | ElementKind::I64);
    let is_64 = matches!(kind, ElementKind::I64 | ElementKind::U64);

    let range = if is_64 {
        if is_signed {
            let lo = parse_int(bytes, pos)?;
            expect(bytes, pos, b',')?;
            let hi = parse_int(bytes, pos)?;
            Range::I64(lo, hi)
        } else {
            let lo = parse_uint(bytes, pos)?;
            expect(bytes, pos, b',')?;
            let hi = parse_uint(bytes, pos)?;
            Range::U64(lo, hi)
        }
    } else if is_signed {
        let lo = parse_int(bytes, pos)?;
        expect(bytes, pos, b',')?;
        let hi = parse_int(bytes, pos)?;
        Range::I32(lo as i32, hi as i32)
    } else {
        let lo = parse_uint(bytes, pos)?;
        expect(bytes, pos, b',')?;
        let hi = parse_uint(bytes, pos)?;
        Range::U32(lo as u32, hi as u32)
    };
    expect(bytes, pos, b')')?;
    Ok(Some(range))
}

fn parse_array_suffix(bytes: &[u8], pos: &mut usize) -> ApxResult<Option<ArrayAttr>> {
    if peek(bytes, *pos) != Some(b'[') {
        return Ok(None);
    }
    *pos += 1;
    let max_len = parse_uint(bytes, pos)? as u32;
    let is_dynamic = if peek(bytes, *pos) == Some(b'*') {
        *pos += 1;
        true
    } else {
        false
    };
    expect(bytes, pos, b']')?;
    Ok(Some(ArrayAttr { max_len, is_dynamic }))
}
