//! Logical-line accumulator for APX definition text (spec §4.1).
//! Splits on `\n`, tolerates a trailing `\r` (CRLF), and skips empty lines
//! while preserving the original 1-based line number for error reporting.

/// One non-empty physical line of APX text, with its original line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub number: u32,
    pub text: String,
}

/// Split `input` into logical lines.
pub fn split_logical_lines(input: &str) -> Vec<LogicalLine> {
    input
        .split('\n')
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = raw.strip_suffix('\r').unwrap_or(raw);
            if text.is_empty() {
                None
            } else {
                Some(LogicalLine {
                    number: (i + 1) as u32,
                    text: text.to_string(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_lines_but_keeps_line_numbers() {
        let lines = split_logical_lines("APX/1.2\n\nN\"X\"\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[1].number, 3);
    }

    #[test]
    fn tolerates_crlf() {
        let lines = split_logical_lines("APX/1.2\r\nN\"X\"\r\n");
        assert_eq!(lines[0].text, "APX/1.2");
        assert_eq!(lines[1].text, "N\"X\"");
    }
}
