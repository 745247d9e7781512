//! Server role: builder and accept loop.
//!
//! The [`ServerBuilder`] registers handlers per category and sets limits. The
//! [`Server`] owns the listening socket and spawns one
//! [`ConnectionHandler`](crate::connection::ConnectionHandler) per accepted
//! connection. All connections share one dispatcher.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use tagwire::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> tagwire::Result<()> {
//!     let server = ServerBuilder::new()
//!         .port(9001)
//!         .auto_reply(json!({"text": "thanks"}))
//!         .handle_typed(Category::Indication, |note: Note, ctx| async move {
//!             tracing::info!(peer = %ctx.peer(), ?note, "indication");
//!             Ok(())
//!         })
//!         .bind()
//!         .await?;
//!
//!     server.run().await
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{EndpointConfig, DEFAULT_BACKLOG, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::connection::{ConnectionConfig, ConnectionHandler};
use crate::dispatcher::{default_workers, Dispatcher};
use crate::error::Result;
use crate::handler::{auto_reply, HandlerContext, HandlerRegistry, HandlerResult};
use crate::message::{Category, CategorySet, Message, MessageFactory};
use crate::transport::Listener;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Builder for configuring and binding a server.
pub struct ServerBuilder {
    registry: HandlerRegistry,
    categories: CategorySet,
    host: String,
    port: u16,
    backlog: u32,
    workers: usize,
    connection: ConnectionConfig,
    shutdown_timeout: Duration,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            categories: CategorySet::minimal(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            workers: default_workers(),
            connection: ConnectionConfig::default(),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }

    /// Seed every setting from a configuration section, including an
    /// auto-reply handler answering REQUESTs with `config.reply`.
    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::new()
            .host(&config.host)
            .port(config.port)
            .backlog(config.backlog)
            .workers(config.workers)
            .categories(config.category_set()?)
            .max_payload_size(config.max_payload_size)
            .shutdown_timeout(config.shutdown_timeout())
            .auto_reply(config.reply.clone());
        builder.connection.read_timeout = config.read_timeout();
        builder.connection.writer.write_timeout = config.write_timeout();
        Ok(builder)
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Port to listen on; 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Pending-connection queue length passed to `listen`.
    ///
    /// Default: 128
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Size of the shared dispatcher.
    ///
    /// Default: host parallelism
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Registered category set; frames outside it are dropped as unknown.
    pub fn categories(mut self, categories: CategorySet) -> Self {
        self.categories = categories;
        self
    }

    /// Default: 16 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.connection.max_payload_size = size;
        self
    }

    /// Deadline for each socket read; unset by default.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.connection.read_timeout = Some(timeout);
        self
    }

    /// Deadline for each socket write; unset by default.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.connection.writer.write_timeout = Some(timeout);
        self
    }

    /// Replies a connection may have queued or in progress before it stops
    /// reading from its peer.
    pub fn max_pending_frames(mut self, frames: usize) -> Self {
        self.connection.writer.max_pending_frames = frames;
        self
    }

    /// How long [`Server::run_until`] waits for in-flight handlers.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register a handler receiving the whole message.
    pub fn handle<F, Fut>(mut self, category: Category, handler: F) -> Self
    where
        F: Fn(Message, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(category, handler);
        self
    }

    /// Register a handler receiving the payload deserialized into `T`.
    pub fn handle_typed<F, T, Fut>(mut self, category: Category, handler: F) -> Self
    where
        F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_typed(category, handler);
        self
    }

    /// Answer every REQUEST with a RESPONSE carrying `payload`.
    pub fn auto_reply(mut self, payload: Value) -> Self {
        self.registry.register(Category::Request, auto_reply(payload));
        self
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> Result<Server> {
        for category in self.registry.categories() {
            if !self.categories.contains(category) {
                tracing::warn!(%category, "handler registered for a category outside the set");
            }
        }

        let listener = Listener::bind(&self.host, self.port, self.backlog).await?;
        let dispatcher = Dispatcher::new(self.workers);
        tracing::info!(
            addr = %listener.local_addr(),
            workers = dispatcher.workers(),
            "server listening"
        );

        Ok(Server {
            listener,
            shared: Arc::new(Shared {
                registry: Arc::new(self.registry),
                factory: Arc::new(MessageFactory::new(self.categories)),
                dispatcher,
                connection: self.connection,
            }),
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    registry: Arc<HandlerRegistry>,
    factory: Arc<MessageFactory>,
    dispatcher: Dispatcher,
    connection: ConnectionConfig,
}

/// A bound server.
pub struct Server {
    listener: Listener,
    shared: Arc<Shared>,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// The dispatcher shared by all connections.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Accept connections forever.
    ///
    /// A failing connection is logged with its peer address and affects
    /// nothing else; accept errors are logged and retried.
    pub async fn run(self) -> Result<()> {
        loop {
            self.accept_one().await;
        }
    }

    /// Accept connections until `signal` resolves, then stop accepting and
    /// wait for in-flight handlers to drain.
    ///
    /// # Errors
    ///
    /// `Timeout` if handlers are still running after the shutdown timeout.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => break,
                _ = self.accept_one() => {}
            }
        }

        tracing::info!(
            outstanding = self.shared.dispatcher.outstanding(),
            "server shutting down"
        );
        self.shared.dispatcher.shutdown(self.shutdown_timeout).await
    }

    async fn accept_one(&self) {
        let (stream, peer) = match self.listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                return;
            }
        };

        tracing::debug!(peer = %peer, "accepted connection");

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let handler = ConnectionHandler::new(
                peer,
                shared.registry.clone(),
                shared.factory.clone(),
                shared.dispatcher.clone(),
                shared.connection.clone(),
            );
            let (reader, writer) = stream.into_split();

            if let Err(e) = handler.run(reader, writer).await {
                tracing::warn!(peer = %peer, error = %e, "connection failed");
            }
        });
    }
}
