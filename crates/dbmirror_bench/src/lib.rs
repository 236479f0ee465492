//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use dbmirror_codec::{Fields, LineEnding, Value};
use dbmirror_core::{encode_snapshot, StableId, VP_ID};
use dbmirror_storage::StorageBackend;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate random text of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a post snapshot with a body of `content_len` characters.
pub fn post_fields(id: &StableId, content_len: usize) -> Fields {
    let mut fields = Fields::new();
    fields.insert(VP_ID.to_string(), Value::text(id.to_hex()));
    fields.insert("post_title".to_string(), Value::text(random_text(24)));
    let content = format!("{}\n{}", random_text(content_len / 2), random_text(content_len / 2));
    fields.insert("post_content".to_string(), Value::text(content));
    fields.insert("post_status".to_string(), Value::text("publish"));
    fields.insert("post_type".to_string(), Value::text("post"));
    fields.insert("menu_order".to_string(), Value::Integer(0));
    let comments = rand::thread_rng().gen_range(0..100);
    fields.insert("comment_count".to_string(), Value::Integer(comments));
    fields
}

/// Write `count` post snapshots straight into a mirror, bypassing the
/// database. Returns their ids.
pub fn seed_posts(backend: &dyn StorageBackend, count: usize, content_len: usize) -> Vec<StableId> {
    (0..count)
        .map(|_| {
            let id = StableId::new();
            let text = encode_snapshot(&id.to_hex(), &post_fields(&id, content_len), LineEnding::Lf)
                .expect("post snapshot encodes");
            backend
                .write(&format!("posts/{id}.ini"), text.as_bytes())
                .expect("mirror write");
            id
        })
        .collect()
}
