//! Control module - batch input and line output for the client binary.
//!
//! The data plane is the TCP connection. The control plane is stdio: the
//! client reads the messages to send as JSON from stdin and writes every
//! response it receives to stdout, one JSON line each. Logs go to stderr.
//!
//! # Example
//!
//! ```
//! use tagwire::control::parse_descriptors;
//!
//! let batch = parse_descriptors(r#"[{"category": "REQUEST", "payload": {"text": "hi"}}]"#).unwrap();
//! assert_eq!(batch[0].category, "REQUEST");
//! ```

mod input;
mod stdio;

pub use input::{parse_descriptors, read_descriptors, MessageDescriptor};
pub use stdio::{message_line, write_stdout_line};
