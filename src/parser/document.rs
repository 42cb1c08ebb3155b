//! Document parser: the line-section state machine that turns APX
//! definition text into a `Node` (spec §4.1), grounded on the top-level
//! line dispatch in `apx/src/parser.c`.

use crate::error::{ApxResult, ErrorKind};
use crate::model::node::{Node, TypeTableEntry};
use crate::model::port::{Port, PortDirection};
use crate::model::value::Value;
use crate::parser::lexer::{split_logical_lines, LogicalLine};
use crate::parser::signature;

fn parse_error(line: u32, message: impl Into<String>) -> ErrorKind {
    ErrorKind::Parse { line, message: message.into() }
}

/// Re-tag an error produced by a line-agnostic sub-parser with the logical
/// line it came from, so callers always see a correctly-numbered error.
fn with_line(err: ErrorKind, line: u32) -> ErrorKind {
    match err {
        ErrorKind::Parse { message, .. } => ErrorKind::Parse { line, message },
        ErrorKind::StrayCharacters(_) => ErrorKind::StrayCharacters(line),
        other => parse_error(line, other.to_string()),
    }
}

/// Parse a complete APX definition text into an unresolved `Node`.
/// Call `Node::finalize()` afterwards to resolve type references and
/// compile pack/unpack programs.
pub fn parse_document(text: &str) -> ApxResult<Node> {
    let lines = split_logical_lines(text);
    let mut iter = lines.iter();

    let version_line = iter.next().ok_or_else(|| parse_error(0, "empty document, expected version line"))?;
    parse_version_line(version_line)?;

    let node_line = iter.next().ok_or_else(|| parse_error(version_line.number, "expected node declaration"))?;
    let name = parse_quoted_decl(node_line, b'N')?;
    let mut node = Node::new(name);

    let mut in_type_section = true;

    for line in iter {
        let bytes = line.text.as_bytes();
        match bytes.first().copied() {
            Some(b'T') => {
                if !in_type_section {
                    return Err(parse_error(line.number, "type declaration after port section"));
                }
                let (name, element, attrs) = parse_named_line(line, b'T')?;
                if attrs.is_parameter || attrs.queue_len.is_some() {
                    return Err(parse_error(line.number, "parameter/queue attributes are port-only"));
                }
                node.types.push(TypeTableEntry { name: Some(name), element });
            }
            Some(b'P') => {
                in_type_section = false;
                let (name, element, attrs) = parse_named_line(line, b'P')?;
                node.provide_ports.push(build_port(name, PortDirection::Provide, element, attrs));
            }
            Some(b'R') => {
                in_type_section = false;
                let (name, element, attrs) = parse_named_line(line, b'R')?;
                node.require_ports.push(build_port(name, PortDirection::Require, element, attrs));
            }
            _ => return Err(parse_error(line.number, "expected 'T', 'P' or 'R' declaration")),
        }
    }

    if node.provide_ports.is_empty() && node.require_ports.is_empty() {
        return Err(parse_error(0, "node declares no ports"));
    }

    Ok(node)
}

fn build_port(
    name: String,
    direction: PortDirection,
    element: crate::model::element::DataElement,
    attrs: Attributes,
) -> Port {
    let mut port = Port::new(name, direction, element);
    port.init = attrs.init;
    port.queue_len = attrs.queue_len;
    port.is_parameter = attrs.is_parameter;
    port
}

fn parse_version_line(line: &LogicalLine) -> ApxResult<(u32, u32)> {
    let text = line.text.strip_prefix("APX/").ok_or_else(|| parse_error(line.number, "expected 'APX/<major>.<minor>'"))?;
    let (major, minor) = text
        .split_once('.')
        .ok_or_else(|| parse_error(line.number, "malformed version line"))?;
    let major: u32 = major.parse().map_err(|_| parse_error(line.number, "malformed major version"))?;
    let minor: u32 = minor.parse().map_err(|_| parse_error(line.number, "malformed minor version"))?;
    Ok((major, minor))
}

/// Parse `<prefix>"<name>"` with nothing else on the line (used for the
/// node declaration, which carries no signature or attributes).
fn parse_quoted_decl(line: &LogicalLine, prefix: u8) -> ApxResult<String> {
    let bytes = line.text.as_bytes();
    if bytes.first() != Some(&prefix) {
        return Err(parse_error(line.number, format!("expected '{}' declaration", prefix as char)));
    }
    let (name, rest) = parse_quoted_name(bytes, 1, line.number)?;
    if rest != bytes.len() {
        return Err(ErrorKind::StrayCharacters(line.number));
    }
    Ok(name)
}

fn parse_quoted_name(bytes: &[u8], start: usize, line_no: u32) -> ApxResult<(String, usize)> {
    if bytes.get(start) != Some(&b'"') {
        return Err(parse_error(line_no, "expected opening quote"));
    }
    let name_start = start + 1;
    let mut pos = name_start;
    while pos < bytes.len() && bytes[pos] != b'"' {
        pos += 1;
    }
    if pos >= bytes.len() {
        return Err(parse_error(line_no, "unterminated name"));
    }
    let name = String::from_utf8(bytes[name_start..pos].to_vec())
        .map_err(|_| parse_error(line_no, "name is not valid UTF-8"))?;
    if name.as_bytes().len() > 256 {
        return Err(ErrorKind::NameTooLong(name));
    }
    Ok((name, pos + 1))
}

/// Parse `<prefix>"<name>"<data-signature>[:<attributes>]`.
fn parse_named_line(
    line: &LogicalLine,
    prefix: u8,
) -> ApxResult<(String, crate::model::element::DataElement, Attributes)> {
    let bytes = line.text.as_bytes();
    if bytes.first() != Some(&prefix) {
        return Err(parse_error(line.number, format!("expected '{}' declaration", prefix as char)));
    }
    let (name, after_name) = parse_quoted_name(bytes, 1, line.number)?;
    let remainder = &line.text[after_name..];
    let (element, consumed) = signature::parse_prefix(remainder).map_err(|e| with_line(e, line.number))?;

    let after_sig = &remainder[consumed..];
    let attrs = if let Some(attr_text) = after_sig.strip_prefix(':') {
        parse_attributes(attr_text).map_err(|e| with_line(e, line.number))?
    } else if after_sig.is_empty() {
        Attributes::default()
    } else {
        return Err(ErrorKind::StrayCharacters(line.number));
    };

    Ok((name, element, attrs))
}

#[derive(Debug, Default)]
struct Attributes {
    init: Option<Value>,
    is_parameter: bool,
    queue_len: Option<u32>,
}

fn parse_attributes(text: &str) -> ApxResult<Attributes> {
    let bytes = text.as_bytes();
    let mut pos = 0usize;
    let mut attrs = Attributes::default();

    loop {
        skip_ws(bytes, &mut pos);
        if pos >= bytes.len() {
            break;
        }
        match bytes[pos] {
            b'=' => {
                pos += 1;
                let (value, next) = parse_literal(bytes, pos)?;
                attrs.init = Some(value);
                pos = next;
            }
            b'P' => {
                attrs.is_parameter = true;
                pos += 1;
            }
            b'Q' => {
                pos += 1;
                if bytes.get(pos) != Some(&b'[') {
                    return Err(parse_error(0, "expected '[' after 'Q'"));
                }
                pos += 1;
                let start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                if pos == start {
                    return Err(parse_error(0, "expected queue length"));
                }
                let n: u32 = std::str::from_utf8(&bytes[start..pos])
                    .unwrap()
                    .parse()
                    .map_err(|_| parse_error(0, "queue length out of range"))?;
                if bytes.get(pos) != Some(&b']') {
                    return Err(parse_error(0, "expected ']' after queue length"));
                }
                pos += 1;
                attrs.queue_len = Some(n);
            }
            _ => return Err(parse_error(0, "unrecognized attribute")),
        }
        skip_ws(bytes, &mut pos);
        if bytes.get(pos) == Some(&b',') {
            pos += 1;
            continue;
        }
        break;
    }

    if pos != bytes.len() {
        return Err(ErrorKind::StrayCharacters(0));
    }
    Ok(attrs)
}

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while matches!(bytes.get(*pos), Some(b' ') | Some(b'\t')) {
        *pos += 1;
    }
}

fn parse_literal(bytes: &[u8], pos: usize) -> ApxResult<(Value, usize)> {
    let mut pos = pos;
    skip_ws(bytes, &mut pos);
    match bytes.get(pos) {
        Some(b'"') => parse_string_literal(bytes, pos),
        Some(b'{') => parse_array_literal(bytes, pos),
        Some(b'-') | Some(b'0'..=b'9') => parse_number_literal(bytes, pos),
        _ => Err(parse_error(0, "expected a literal")),
    }
}

fn parse_string_literal(bytes: &[u8], pos: usize) -> ApxResult<(Value, usize)> {
    let mut pos = pos + 1; // opening quote
    let mut out = String::new();
    loop {
        match bytes.get(pos) {
            None => return Err(parse_error(0, "unterminated string literal")),
            Some(b'"') => {
                pos += 1;
                break;
            }
            Some(b'\\') => {
                pos += 1;
                match bytes.get(pos) {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(&other) => out.push(other as char),
                    None => return Err(parse_error(0, "unterminated escape sequence")),
                }
                pos += 1;
            }
            Some(&b) => {
                out.push(b as char);
                pos += 1;
            }
        }
    }
    Ok((Value::String(out), pos))
}

fn parse_array_literal(bytes: &[u8], pos: usize) -> ApxResult<(Value, usize)> {
    let mut pos = pos + 1; // opening brace
    let mut items = Vec::new();
    loop {
        skip_ws(bytes, &mut pos);
        if bytes.get(pos) == Some(&b'}') {
            pos += 1;
            break;
        }
        let (value, next) = parse_literal(bytes, pos)?;
        items.push(value);
        pos = next;
        skip_ws(bytes, &mut pos);
        if bytes.get(pos) == Some(&b',') {
            pos += 1;
            continue;
        }
    }
    Ok((Value::Array(items), pos))
}

fn parse_number_literal(bytes: &[u8], pos: usize) -> ApxResult<(Value, usize)> {
    let mut pos = pos;
    let negative = bytes.get(pos) == Some(&b'-');
    if negative {
        pos += 1;
    }
    let is_hex = bytes.get(pos) == Some(&b'0') && matches!(bytes.get(pos + 1), Some(b'x') | Some(b'X'));
    if is_hex {
        pos += 2;
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_hexdigit() {
            pos += 1;
        }
        if pos == start {
            return Err(parse_error(0, "expected hex digits"));
        }
        let magnitude = u64::from_str_radix(std::str::from_utf8(&bytes[start..pos]).unwrap(), 16)
            .map_err(|_| parse_error(0, "hex literal out of range"))?;
        let value = if negative { Value::I64(-(magnitude as i64)) } else { int_value(magnitude) };
        return Ok((value, pos));
    }
    let start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos == start {
        return Err(parse_error(0, "expected digits"));
    }
    let magnitude: u64 = std::str::from_utf8(&bytes[start..pos])
        .unwrap()
        .parse()
        .map_err(|_| parse_error(0, "integer literal out of range"))?;
    let value = if negative { Value::I64(-(magnitude as i64)) } else { int_value(magnitude) };
    Ok((value, pos))
}

fn int_value(magnitude: u64) -> Value {
    if magnitude <= i64::MAX as u64 {
        Value::I64(magnitude as i64)
    } else {
        Value::U64(magnitude)
    }
}
