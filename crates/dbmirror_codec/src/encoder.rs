//! Sectioned INI encoder.

use crate::error::{CodecError, CodecResult};
use crate::escape::{escape_text, sanitize_key};
use crate::value::Value;
use std::collections::BTreeMap;

/// Line terminator used between encoded lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineEnding {
    /// Returns the terminator string.
    pub const fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Encode a document to INI text with `\n` line endings.
///
/// The document must be a map of section names to non-empty maps of
/// fields. Field values are scalars or lists of scalars.
///
/// # Errors
///
/// Returns an error for non-sectioned input, empty sections, nested
/// lists/maps inside a section, or keys containing line breaks.
pub fn to_ini(document: &Value) -> CodecResult<String> {
    to_ini_with(document, LineEnding::Lf)
}

/// Encode a document to INI text with the given line endings.
///
/// # Errors
///
/// See [`to_ini`].
pub fn to_ini_with(document: &Value, line_ending: LineEnding) -> CodecResult<String> {
    let mut encoder = IniEncoder::new(line_ending);
    encoder.encode(document)?;
    Ok(encoder.into_string())
}

/// A sectioned INI encoder.
///
/// Output is deterministic: sections and fields are written in key order.
pub struct IniEncoder {
    lines: Vec<String>,
    line_ending: LineEnding,
}

impl IniEncoder {
    /// Create a new encoder.
    pub fn new(line_ending: LineEnding) -> Self {
        Self {
            lines: Vec::new(),
            line_ending,
        }
    }

    /// Encode a whole document.
    pub fn encode(&mut self, document: &Value) -> CodecResult<()> {
        let sections = document.as_map().ok_or(CodecError::NotSectioned)?;
        for (name, section) in sections {
            let fields = section.as_map().ok_or(CodecError::NotSectioned)?;
            self.encode_section(name, fields)?;
        }
        Ok(())
    }

    /// Encode a single section.
    pub fn encode_section(
        &mut self,
        name: &str,
        fields: &BTreeMap<String, Value>,
    ) -> CodecResult<()> {
        check_key(name)?;
        let header = format!("[{}]", sanitize_key(name));

        let mut body = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if key.is_empty() {
                return Err(CodecError::invalid_key(key.as_str(), "keys cannot be empty"));
            }
            check_key(key)?;
            let key_out = sanitize_key(key);
            match value {
                Value::List(items) if items.is_empty() => {
                    body.push(format!("{key_out}[] ="));
                }
                Value::List(items) => {
                    for (index, item) in items.iter().enumerate() {
                        if !item.is_scalar() {
                            return Err(CodecError::unsupported_value(
                                key.as_str(),
                                "lists may only contain scalars",
                            ));
                        }
                        body.push(key_value_line(&format!("{key_out}[{index}]"), item));
                    }
                }
                Value::Map(_) => {
                    return Err(CodecError::unsupported_value(
                        key.as_str(),
                        "nested maps cannot be encoded",
                    ));
                }
                scalar => body.push(key_value_line(&key_out, scalar)),
            }
        }

        if body.is_empty() {
            return Err(CodecError::empty_section(name));
        }

        self.lines.push(header);
        self.lines.extend(body);
        self.lines.push(String::new());
        Ok(())
    }

    /// Consume the encoder and return the text.
    pub fn into_string(self) -> String {
        let eol = self.line_ending.as_str();
        let mut out = self.lines.join(eol);
        if !out.is_empty() {
            out.push_str(eol);
        }
        out
    }
}

fn check_key(key: &str) -> CodecResult<()> {
    if key.contains('\n') || key.contains('\r') {
        return Err(CodecError::invalid_key(key, "keys cannot contain line breaks"));
    }
    Ok(())
}

fn key_value_line(key: &str, value: &Value) -> String {
    match value {
        Value::Null => format!("{key} ="),
        Value::Integer(n) => format!("{key} = {n}"),
        Value::Text(s) => format!("{key} = \"{}\"", escape_text(s)),
        // Callers only pass scalars.
        other => format!("{key} = \"{}\"", escape_text(&other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(fields: Vec<(&str, Value)>) -> Value {
        Value::map(vec![("abc", Value::map(fields))])
    }

    #[test]
    fn encodes_scalars() {
        let doc = section(vec![
            ("title", Value::text("Hello")),
            ("count", Value::Integer(3)),
            ("parent", Value::Null),
        ]);
        let text = to_ini(&doc).unwrap();
        assert_eq!(
            text,
            "[abc]\ncount = 3\nparent =\ntitle = \"Hello\"\n\n"
        );
    }

    #[test]
    fn encodes_lists_with_indices() {
        let doc = section(vec![(
            "tags",
            Value::List(vec![Value::text("a"), Value::Integer(2)]),
        )]);
        let text = to_ini(&doc).unwrap();
        assert!(text.contains("tags[0] = \"a\"\n"));
        assert!(text.contains("tags[1] = 2\n"));
    }

    #[test]
    fn empty_list_marker() {
        let doc = section(vec![("tags", Value::List(vec![]))]);
        assert!(to_ini(&doc).unwrap().contains("tags[] =\n"));
    }

    #[test]
    fn numeric_text_is_quoted() {
        let doc = section(vec![("zip", Value::text("01234"))]);
        assert!(to_ini(&doc).unwrap().contains("zip = \"01234\""));
    }

    #[test]
    fn crlf_line_endings() {
        let doc = section(vec![("a", Value::Integer(1))]);
        assert_eq!(
            to_ini_with(&doc, LineEnding::CrLf).unwrap(),
            "[abc]\r\na = 1\r\n\r\n"
        );
    }

    #[test]
    fn rejects_non_sectioned() {
        assert_eq!(to_ini(&Value::Integer(1)), Err(CodecError::NotSectioned));
        let doc = Value::map(vec![("abc", Value::text("flat"))]);
        assert_eq!(to_ini(&doc), Err(CodecError::NotSectioned));
    }

    #[test]
    fn rejects_empty_section() {
        let doc = Value::map(vec![("abc", Value::Map(BTreeMap::new()))]);
        assert_eq!(to_ini(&doc), Err(CodecError::empty_section("abc")));

    }

    #[test]
    fn rejects_empty_keys() {
        let doc = section(vec![("", Value::Integer(1)), ("a", Value::Integer(2))]);
        assert!(matches!(
            to_ini(&doc),
            Err(CodecError::InvalidKey { key, .. }) if key.is_empty()
        ));
    }

    #[test]
    fn rejects_nested_values() {
        let doc = section(vec![(
            "nested",
            Value::List(vec![Value::List(vec![Value::Integer(1)])]),
        )]);
        assert!(matches!(
            to_ini(&doc),
            Err(CodecError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn sanitizes_keys_and_sections() {
        let doc = Value::map(vec![(
            "opt[1]",
            Value::map(vec![("a=b", Value::Integer(1))]),
        )]);
        let text = to_ini(&doc).unwrap();
        assert!(text.starts_with("[opt<<<lbrac>>>1<<<rbrac>>>]\n"));
        assert!(text.contains("a<<<eq>>>b = 1"));
    }

    #[test]
    fn escapes_newlines_in_values() {
        let doc = section(vec![("body", Value::text("a\nb"))]);
        let text = to_ini(&doc).unwrap();
        assert!(text.contains("body = \"a<<<[EOL-LF]>>>b\""));
    }
}
