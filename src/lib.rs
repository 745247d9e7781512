//! # tagwire
//!
//! Point-to-point messaging over TCP with length-prefixed MsgPack frames.
//!
//! Every frame is a 4-byte big-endian length followed by that many payload
//! bytes. A payload is a MsgPack map `{category, payload}` where the category
//! is one of a configured set of tags (`REQUEST`, `RESPONSE`, and optionally
//! `ACKNOWLEDGE`, `INDICATION`, `PUBLISH`).
//!
//! ## Architecture
//!
//! - **Server**: accept loop, one connection handler per accepted socket,
//!   handlers registered per category and run on a shared bounded dispatcher
//! - **Client**: one connection, sends run on a dispatcher, REQUESTs can wait
//!   for their RESPONSE
//! - **Writer task**: the only writer on each socket, so frames never interleave
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use tagwire::{ClientBuilder, ServerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> tagwire::Result<()> {
//!     let server = ServerBuilder::new()
//!         .port(0)
//!         .auto_reply(json!({"text": "thanks"}))
//!         .bind()
//!         .await?;
//!     let port = server.local_addr().port();
//!     tokio::spawn(server.run());
//!
//!     let client = ClientBuilder::new().port(port).connect().await?;
//!     let reply = client.request(json!({"text": "hi"})).await?;
//!     println!("{}", reply.payload());
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;
mod server;

pub use client::{Client, ClientBuilder, SendReport};
pub use config::{EndpointConfig, Role};
pub use control::MessageDescriptor;
pub use error::{EndpointError, Result};
pub use handler::{HandlerContext, HandlerResult};
pub use message::{Category, CategorySet, Message, MessageFactory};
pub use server::{Server, ServerBuilder};
