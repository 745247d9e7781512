//! Handler registry for dispatching messages by category.
//!
//! Each category has at most one handler; registering again replaces it.
//! Auto-reply is just another registered handler, not transport behavior.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::HandlerContext;
use crate::error::{EndpointError, Result};
use crate::message::{Category, Message};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for message handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one decoded message.
    fn call(&self, message: Message, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult>;
}

/// Handler over the whole [`Message`].
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: Message, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(message, ctx))
    }
}

/// Wrapper that deserializes the payload into `T` before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: Message, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(message.into_payload()) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(EndpointError::Json(e)) }),
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}

/// Handler that answers every message with a RESPONSE carrying `payload`.
///
/// Registered for [`Category::Request`] this gives the request/response
/// exchange clients rendezvous on.
pub fn auto_reply(
    payload: Value,
) -> impl Fn(Message, HandlerContext) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static {
    move |_message: Message, ctx: HandlerContext| -> BoxFuture<'static, HandlerResult> {
        let payload = payload.clone();
        Box::pin(async move { ctx.respond(payload).await })
    }
}

/// Registry mapping categories to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Category, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler taking the full message.
    pub fn register<F, Fut>(&mut self, category: Category, handler: F)
    where
        F: Fn(Message, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(category, FnHandler::new(handler));
    }

    /// Register a handler taking the payload deserialized into `T`.
    pub fn register_typed<F, T, Fut>(&mut self, category: Category, handler: F)
    where
        F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(category, TypedHandler::new(handler));
    }

    pub fn register_handler(&mut self, category: Category, handler: impl Handler) {
        if self.handlers.insert(category, Box::new(handler)).is_some() {
            tracing::debug!(%category, "replaced handler");
        }
    }

    pub fn get(&self, category: Category) -> Option<&dyn Handler> {
        self.handlers.get(&category).map(|h| h.as_ref())
    }

    pub fn contains(&self, category: Category) -> bool {
        self.handlers.contains_key(&category)
    }

    /// Categories that have a handler.
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.handlers.keys().copied()
    }

    /// Dispatch a message to its category's handler.
    pub async fn dispatch(&self, message: Message, ctx: HandlerContext) -> Result<()> {
        let category = message.category();
        let handler = self
            .get(category)
            .ok_or(EndpointError::HandlerNotFound(category))?;

        handler.call(message, ctx).await
    }
}
