//! Property-based test generators using proptest.
//!
//! Strategies produce rows and snapshots that a real site could hold:
//! column names are plain identifiers and text stays on printable
//! characters plus line breaks.

use dbmirror_codec::{Fields, Value};
use dbmirror_core::StableId;
use proptest::prelude::*;

/// Strategy for generating stable ids.
pub fn stable_id_strategy() -> impl Strategy<Value = StableId> {
    prop::array::uniform16(any::<u8>()).prop_map(StableId::from)
}

/// Strategy for generating column names.
pub fn column_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating option names, including characters that need
/// escaping in file names.
pub fn option_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_.:/ -]{1,24}").expect("Invalid regex")
}

/// Strategy for generating text column values.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 .,;:=\"'\\[\\]\r\n\t-]{0,64}").expect("Invalid regex")
}

/// Strategy for generating a single scalar column value.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        2 => any::<i64>().prop_map(Value::Integer),
        4 => text_strategy().prop_map(Value::Text),
    ]
}

/// Strategy for generating snapshot fields.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(column_name_strategy(), scalar_strategy(), 1..12)
}

/// Strategy for generating post rows without keys.
pub fn post_row_strategy() -> impl Strategy<Value = Fields> {
    (
        text_strategy(),
        text_strategy(),
        prop::sample::select(vec!["publish", "draft", "pending", "private"]),
        0i64..100,
    )
        .prop_map(|(title, content, status, order)| {
            let mut fields = Fields::new();
            fields.insert("post_title".to_string(), Value::Text(title));
            fields.insert("post_content".to_string(), Value::Text(content));
            fields.insert("post_status".to_string(), Value::text(status));
            fields.insert("post_type".to_string(), Value::text("post"));
            fields.insert("menu_order".to_string(), Value::Integer(order));
            fields
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmirror_core::{decode_snapshot, encode_snapshot, escape_file_name};
    use dbmirror_codec::LineEnding;

    proptest! {
        #[test]
        fn snapshots_survive_the_file_format(id in stable_id_strategy(), fields in fields_strategy()) {
            let text = encode_snapshot(&id.to_hex(), &fields, LineEnding::Lf).unwrap();
            prop_assert_eq!(decode_snapshot("x.ini", text.as_bytes()).unwrap(), fields);
        }

        #[test]
        fn escaped_option_names_are_safe_file_names(name in option_name_strategy()) {
            let escaped = escape_file_name(&name);
            prop_assert!(escaped
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '%')));
        }

        #[test]
        fn post_rows_are_complete(fields in post_row_strategy()) {
            prop_assert_eq!(fields.len(), 5);
            prop_assert!(fields.contains_key("post_title"));
        }
    }
}
