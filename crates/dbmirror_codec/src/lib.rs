//! # DbMirror Codec
//!
//! Sectioned INI encoding/decoding for entity snapshots.
//!
//! Every entity is stored as one section whose fields are scalars or lists
//! of scalars. The encoding is deterministic:
//! - Sections and fields are written in key order
//! - Integers are written bare, text is always quoted
//! - Line breaks inside text become `<<<[EOL-LF]>>>` / `<<<[EOL-CR]>>>`
//! - Only `"` is backslash-escaped inside quoted text
//! - Structural characters in keys become named placeholders
//!
//! ## Usage
//!
//! ```
//! use dbmirror_codec::{from_ini, to_ini, Value};
//!
//! let doc = Value::map(vec![(
//!     "0a1b2c",
//!     Value::map(vec![("post_title", Value::text("Hello"))]),
//! )]);
//! let text = to_ini(&doc).unwrap();
//! assert_eq!(text, "[0a1b2c]\npost_title = \"Hello\"\n\n");
//! assert_eq!(from_ini(&text).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod escape;
mod value;

pub use decoder::{from_ini, IniDecoder};
pub use encoder::{to_ini, to_ini_with, IniEncoder, LineEnding};
pub use error::{CodecError, CodecResult};
pub use value::{Fields, Value};
