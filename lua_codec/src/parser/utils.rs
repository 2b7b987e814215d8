use super::ParseError;

/// Resolve the escape sequences of a quoted string body (quotes already stripped).
///
/// Covers what `%q` and hand-written literals produce, including the
/// backslash-newline form `%q` uses for embedded line breaks.
pub(crate) fn unescape(s: &str) -> Result<String, ParseError> {
    let mut bytes: Vec<u8> = Vec::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') | Some('\n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('a') => bytes.push(0x07),
            Some('b') => bytes.push(0x08),
            Some('f') => bytes.push(0x0c),
            Some('v') => bytes.push(0x0b),
            Some('\\') => bytes.push(b'\\'),
            Some('"') => bytes.push(b'"'),
            Some('\'') => bytes.push(b'\''),
            Some('\r') => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                bytes.push(b'\n');
            }
            Some('z') => {
                while chars.peek().map_or(false, |c| c.is_whitespace()) {
                    chars.next();
                }
            }
            Some('x') => {
                let hex: String = (0..2).filter_map(|_| chars.next()).collect();
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| ParseError::InvalidEscape {
                    sequence: format!("\\x{}", hex),
                })?;
                bytes.push(byte);
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = d.to_string();
                while digits.len() < 3 && chars.peek().map_or(false, |c| c.is_ascii_digit()) {
                    if let Some(next) = chars.next() {
                        digits.push(next);
                    }
                }
                let code: u32 = digits.parse().unwrap_or(256);
                let byte = u8::try_from(code).map_err(|_| ParseError::InvalidEscape {
                    sequence: format!("\\{}", digits),
                })?;
                bytes.push(byte);
            }
            Some(other) => {
                return Err(ParseError::InvalidEscape {
                    sequence: format!("\\{}", other),
                })
            }
            None => {
                return Err(ParseError::InvalidEscape {
                    sequence: "\\ at end of string".to_string(),
                })
            }
        }
    }
    // Escapes may produce raw bytes; keep what is valid text
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_escapes() {
        assert_eq!(unescape(r#"a\"b\\c\nd"#).unwrap(), "a\"b\\c\nd");
        assert_eq!(unescape(r"\065\066").unwrap(), "AB");
        assert_eq!(unescape(r"\x41").unwrap(), "A");
    }

    #[test]
    fn test_percent_q_line_continuation() {
        assert_eq!(unescape("line1\\\nline2").unwrap(), "line1\nline2");
    }

    #[test]
    fn test_unknown_escape_is_an_error() {
        assert!(matches!(
            unescape(r"\q"),
            Err(ParseError::InvalidEscape { .. })
        ));
    }
}
