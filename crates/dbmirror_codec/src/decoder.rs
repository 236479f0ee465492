//! Sectioned INI decoder.

use crate::error::{CodecError, CodecResult};
use crate::escape::{restore_key, unescape_text};
use crate::value::Value;
use std::collections::BTreeMap;

/// Decode INI text into a document (map of sections to field maps).
///
/// Accepts both `\n` and `\r\n` line endings. Blank lines and lines
/// starting with `;` are ignored.
///
/// # Errors
///
/// Returns an error if a line is malformed, a value appears outside a
/// section, a string is unterminated, or a section or key is duplicated.
pub fn from_ini(input: &str) -> CodecResult<Value> {
    IniDecoder::new(input).decode()
}

/// One field of a section while it is being assembled.
enum Slot {
    Scalar(Value),
    List(BTreeMap<usize, Value>),
}

/// A sectioned INI decoder.
pub struct IniDecoder<'a> {
    input: &'a str,
}

impl<'a> IniDecoder<'a> {
    /// Create a new decoder for the given text.
    pub fn new(input: &'a str) -> Self {
        Self { input }
    }

    /// Decode the whole input.
    pub fn decode(&self) -> CodecResult<Value> {
        let mut sections: BTreeMap<String, Value> = BTreeMap::new();
        let mut current: Option<(String, BTreeMap<String, Slot>)> = None;

        for (index, raw) in self.input.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            if line.trim().is_empty() || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                let name = line
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .ok_or_else(|| CodecError::malformed_line(line_no, "unclosed section header"))?;
                if let Some((name, slots)) = current.take() {
                    finish_section(&mut sections, name, slots)?;
                }
                let name = restore_key(name);
                if sections.contains_key(&name) {
                    return Err(CodecError::DuplicateSection { section: name });
                }
                current = Some((name, BTreeMap::new()));
                continue;
            }

            let Some((section, slots)) = current.as_mut() else {
                return Err(CodecError::ValueOutsideSection { line: line_no });
            };

            let eq = line
                .find('=')
                .ok_or_else(|| CodecError::malformed_line(line_no, "expected `key = value`"))?;
            let raw_key = line[..eq].strip_suffix(' ').unwrap_or(&line[..eq]);
            let raw_value = line[eq + 1..].strip_prefix(' ').unwrap_or(&line[eq + 1..]);

            if raw_key.is_empty() {
                return Err(CodecError::malformed_line(line_no, "empty key"));
            }

            let value = parse_value(raw_value, line_no)?;
            let (key, index) = split_index(raw_key, line_no)?;
            let key = restore_key(key);

            match index {
                None => {
                    if slots.contains_key(&key) {
                        return Err(CodecError::DuplicateKey {
                            section: section.clone(),
                            key,
                        });
                    }
                    slots.insert(key, Slot::Scalar(value));
                }
                Some(index) => {
                    let slot = slots
                        .entry(key.clone())
                        .or_insert_with(|| Slot::List(BTreeMap::new()));
                    let Slot::List(items) = slot else {
                        return Err(CodecError::DuplicateKey {
                            section: section.clone(),
                            key,
                        });
                    };
                    if let Some(index) = index {
                        if items.insert(index, value).is_some() {
                            return Err(CodecError::DuplicateKey {
                                section: section.clone(),
                                key: format!("{key}[{index}]"),
                            });
                        }
                    } else if !value.is_null() {
                        return Err(CodecError::malformed_line(
                            line_no,
                            "empty list marker cannot carry a value",
                        ));
                    }
                }
            }
        }

        if let Some((name, slots)) = current.take() {
            finish_section(&mut sections, name, slots)?;
        }

        Ok(Value::Map(sections))
    }
}

fn finish_section(
    sections: &mut BTreeMap<String, Value>,
    name: String,
    slots: BTreeMap<String, Slot>,
) -> CodecResult<()> {
    if slots.is_empty() {
        return Err(CodecError::empty_section(name));
    }
    let fields = slots
        .into_iter()
        .map(|(key, slot)| {
            let value = match slot {
                Slot::Scalar(value) => value,
                Slot::List(items) => Value::List(items.into_values().collect()),
            };
            (key, value)
        })
        .collect();
    sections.insert(name, Value::Map(fields));
    Ok(())
}

/// Splits `key[3]` into (`key`, Some(Some(3))) and `key[]` into
/// (`key`, Some(None)). Keys on disk never contain a raw `[` because the
/// encoder replaces it with a placeholder.
fn split_index(raw_key: &str, line_no: usize) -> CodecResult<(&str, Option<Option<usize>>)> {
    let Some(open) = raw_key.find('[') else {
        return Ok((raw_key, None));
    };
    let inner = raw_key[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| CodecError::malformed_line(line_no, "unclosed list index"))?;
    if inner.is_empty() {
        return Ok((&raw_key[..open], Some(None)));
    }
    let index = inner
        .parse::<usize>()
        .map_err(|_| CodecError::malformed_line(line_no, format!("invalid list index {inner:?}")))?;
    Ok((&raw_key[..open], Some(Some(index))))
}

fn parse_value(raw: &str, line_no: usize) -> CodecResult<Value> {
    if let Some(rest) = raw.strip_prefix('"') {
        let inner = rest
            .strip_suffix('"')
            .ok_or(CodecError::UnterminatedString { line: line_no })?;
        return Ok(Value::Text(unescape_text(inner)));
    }

    let token = raw.trim();
    if token.is_empty() {
        return Ok(Value::Null);
    }
    match token.parse::<i64>() {
        Ok(n) => Ok(Value::Integer(n)),
        // Hand-edited unquoted words are kept verbatim.
        Err(_) => Ok(Value::Text(token.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'v>(doc: &'v Value, section: &str, key: &str) -> &'v Value {
        &doc.as_map().unwrap()[section].as_map().unwrap()[key]
    }

    #[test]
    fn decodes_typed_values() {
        let doc = from_ini("[abc]\ncount = 3\nparent =\ntitle = \"Hello\"\n").unwrap();
        assert_eq!(field(&doc, "abc", "count"), &Value::Integer(3));
        assert_eq!(field(&doc, "abc", "parent"), &Value::Null);
        assert_eq!(field(&doc, "abc", "title"), &Value::text("Hello"));
    }

    #[test]
    fn decodes_crlf() {
        let doc = from_ini("[abc]\r\nn = -12\r\n\r\n").unwrap();
        assert_eq!(field(&doc, "abc", "n"), &Value::Integer(-12));
    }

    #[test]
    fn decodes_lists_in_index_order() {
        let doc = from_ini("[abc]\nt[1] = \"b\"\nt[0] = \"a\"\ne[] =\n").unwrap();
        assert_eq!(
            field(&doc, "abc", "t"),
            &Value::List(vec![Value::text("a"), Value::text("b")])
        );
        assert_eq!(field(&doc, "abc", "e"), &Value::List(vec![]));
    }

    #[test]
    fn restores_placeholders() {
        let doc = from_ini("[a<<<eq>>>b]\nk<<<lbrac>>>x<<<rbrac>>> = \"l1<<<[EOL-LF]>>>l2 \\\"q\\\"\"\n")
            .unwrap();
        assert_eq!(field(&doc, "a=b", "k[x]"), &Value::text("l1\nl2 \"q\""));
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let doc = from_ini("[abc]\nexpr = \"a = b\"\n").unwrap();
        assert_eq!(field(&doc, "abc", "expr"), &Value::text("a = b"));
    }

    #[test]
    fn ignores_comments() {
        let doc = from_ini("; generated\n[abc]\n; note\nx = 1\n").unwrap();
        assert_eq!(field(&doc, "abc", "x"), &Value::Integer(1));
    }

    #[test]
    fn unquoted_words_stay_text() {
        let doc = from_ini("[abc]\nratio = 1.5\n").unwrap();
        assert_eq!(field(&doc, "abc", "ratio"), &Value::text("1.5"));
    }

    #[test]
    fn empty_input_is_empty_document() {
        assert_eq!(from_ini("").unwrap(), Value::Map(BTreeMap::new()));
    }

    #[test]
    fn errors() {
        assert_eq!(
            from_ini("x = 1\n"),
            Err(CodecError::ValueOutsideSection { line: 1 })
        );
        assert_eq!(
            from_ini("[abc]\nx = \"open\n"),
            Err(CodecError::UnterminatedString { line: 2 })
        );
        assert_eq!(
            from_ini("[abc]\n[def]\nx = 1\n"),
            Err(CodecError::empty_section("abc"))
        );
        assert!(matches!(
            from_ini("[abc]\nx = 1\nx = 2\n"),
            Err(CodecError::DuplicateKey { .. })
        ));
        assert!(matches!(
            from_ini("[abc]\nx = 1\n[abc]\ny = 1\n"),
            Err(CodecError::DuplicateSection { .. })
        ));
        assert!(matches!(
            from_ini("[abc]\njust words\n"),
            Err(CodecError::MalformedLine { line: 2, .. })
        ));
        assert!(matches!(
            from_ini("[abc\nx = 1\n"),
            Err(CodecError::MalformedLine { line: 1, .. })
        ));
    }
}
