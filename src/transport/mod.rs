//! Transport module - TCP sockets for both endpoint roles.
//!
//! The server owns a [`Listener`]; clients open one stream with [`connect`].

mod tcp;

pub use tcp::{connect, Listener};
