//! Handler module - per-category message handling.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps categories to handlers
//! - [`HandlerContext`] - lets a handler reply on the connection it came from
//! - [`auto_reply`] - the stock REQUEST → RESPONSE handler
//!
//! # Example
//!
//! ```
//! use tagwire::handler::{auto_reply, HandlerRegistry};
//! use tagwire::message::Category;
//! use serde_json::json;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Category::Request, auto_reply(json!({"text": "thanks"})));
//! registry.register(Category::Response, |msg, ctx| async move {
//!     tracing::info!(peer = %ctx.peer(), payload = %msg.payload(), "response");
//!     Ok(())
//! });
//! assert!(registry.contains(Category::Request));
//! ```

mod context;
mod registry;

pub use context::HandlerContext;
pub use registry::{auto_reply, BoxFuture, FnHandler, Handler, HandlerRegistry, HandlerResult, TypedHandler};
