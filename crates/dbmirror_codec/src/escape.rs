//! Placeholder substitution for characters the line format cannot carry.

/// Characters that collide with the section/key syntax, and their
/// placeholders. Applied to keys and section names only. `<` is replaced
/// too, so a key that spells out a placeholder is not mistaken for one.
const KEY_PLACEHOLDERS: [(char, &str); 18] = [
    ('<', "<<<lt>>>"),
    ('[', "<<<lbrac>>>"),
    (']', "<<<rbrac>>>"),
    ('"', "<<<dblquot>>>"),
    ('\'', "<<<quot>>>"),
    (';', "<<<semicol>>>"),
    ('$', "<<<string>>>"),
    ('&', "<<<amp>>>"),
    ('~', "<<<tilde>>>"),
    ('^', "<<<power>>>"),
    ('!', "<<<exclmark>>>"),
    ('(', "<<<lparent>>>"),
    (')', "<<<rparent>>>"),
    ('{', "<<<lcurly>>>"),
    ('}', "<<<rcurly>>>"),
    ('|', "<<<pipe>>>"),
    ('\t', "<<<tab>>>"),
    ('=', "<<<eq>>>"),
];

const EOL_LF: &str = "<<<[EOL-LF]>>>";
const EOL_CR: &str = "<<<[EOL-CR]>>>";

/// Replaces structural characters in a key or section name.
pub(crate) fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match KEY_PLACEHOLDERS.iter().find(|(ch, _)| *ch == c) {
            Some((_, placeholder)) => out.push_str(placeholder),
            None => out.push(c),
        }
    }
    out
}

/// Restores a key or section name written by [`sanitize_key`].
pub(crate) fn restore_key(key: &str) -> String {
    if !key.contains("<<<") {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len());
    let mut rest = key;
    'outer: while !rest.is_empty() {
        if rest.starts_with("<<<") {
            for (c, placeholder) in KEY_PLACEHOLDERS {
                if let Some(tail) = rest.strip_prefix(placeholder) {
                    out.push(c);
                    rest = tail;
                    continue 'outer;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Escapes a text value for the quoted form: line breaks become
/// placeholders and the quote character is backslash-escaped.
///
/// Text that already contains an EOL placeholder reads back as a line
/// break. Values keep `<` as is so that markup stays readable on disk.
pub(crate) fn escape_text(text: &str) -> String {
    text.replace('\n', EOL_LF)
        .replace('\r', EOL_CR)
        .replace('"', "\\\"")
}

/// Inverse of [`escape_text`] for the inside of a quoted value.
pub(crate) fn unescape_text(text: &str) -> String {
    text.replace("\\\"", "\"")
        .replace(EOL_LF, "\n")
        .replace(EOL_CR, "\r")
}
