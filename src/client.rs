//! Client role: builder, sends and the request/response rendezvous.
//!
//! A [`Client`] connects once. Each send is a dispatcher task; the frame goes
//! through the connection's single writer task, so concurrent sends never
//! interleave on the wire.
//!
//! Responses carry no request ID and are matched by position: the next frame
//! read after a REQUEST is its RESPONSE. To keep that sound with sends running
//! concurrently, a REQUEST that awaits its response holds the connection's
//! rendezvous lock from before its frame is queued until the response has been
//! read. At most one request is outstanding per connection.
//!
//! A request whose response never arrives (deadline, socket error or close)
//! leaves the pairing unknown, so the connection is marked broken and every
//! later send fails with `ConnectionClosed`.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use tagwire::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> tagwire::Result<()> {
//!     let client = ClientBuilder::new().port(9001).connect().await?;
//!
//!     let reply = client.request(json!({"text": "hi"})).await?;
//!     assert_eq!(reply.payload()["text"], "thanks");
//!
//!     client.close().await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{EndpointConfig, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::control::MessageDescriptor;
use crate::dispatcher::{default_workers, Dispatcher, TaskHandle};
use crate::error::{EndpointError, Result};
use crate::message::{Category, CategorySet, Message, MessageFactory};
use crate::protocol::{FrameReader, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::transport;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    host: String,
    port: u16,
    workers: usize,
    categories: CategorySet,
    await_responses: bool,
    max_payload_size: u32,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    writer_config: WriterConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: default_workers(),
            categories: CategorySet::minimal(),
            await_responses: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            connect_timeout: None,
            read_timeout: None,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            writer_config: WriterConfig::default(),
        }
    }

    /// Seed every setting from a configuration section.
    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::new()
            .host(&config.host)
            .port(config.port)
            .workers(config.workers)
            .categories(config.category_set()?)
            .await_responses(config.await_responses)
            .max_payload_size(config.max_payload_size)
            .shutdown_timeout(config.shutdown_timeout());
        builder.connect_timeout = config.connect_timeout();
        builder.read_timeout = config.read_timeout();
        builder.writer_config.write_timeout = config.write_timeout();
        Ok(builder)
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Size of the send dispatcher.
    ///
    /// Default: host parallelism
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn categories(mut self, categories: CategorySet) -> Self {
        self.categories = categories;
        self
    }

    /// Whether REQUEST sends wait for their RESPONSE.
    ///
    /// Default: true
    pub fn await_responses(mut self, enabled: bool) -> Self {
        self.await_responses = enabled;
        self
    }

    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Deadline for a response once its request is queued.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.write_timeout = Some(timeout);
        self
    }

    /// How long [`Client::close`] waits for outstanding sends.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Connect to the configured server.
    pub async fn connect(self) -> Result<Client> {
        let stream = transport::connect(&self.host, self.port, self.connect_timeout).await?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, self.writer_config);

        tracing::info!(peer = %peer, "connected");

        Ok(Client {
            target: format!("{}:{}", self.host, self.port),
            peer,
            factory: Arc::new(MessageFactory::new(self.categories)),
            dispatcher: Dispatcher::new(self.workers),
            connection: Arc::new(Connection {
                writer,
                responses: Mutex::new(FrameReader::with_max_payload(
                    read_half,
                    self.max_payload_size,
                )),
                read_timeout: self.read_timeout,
                broken: AtomicBool::new(false),
            }),
            await_responses: self.await_responses,
            shutdown_timeout: self.shutdown_timeout,
            writer_task,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one message from [`Client::send_all`].
#[derive(Debug)]
pub struct SendReport {
    /// Position in the input batch.
    pub index: usize,
    pub total: usize,
    pub target: String,
    /// The RESPONSE for awaited requests, `None` for everything else.
    pub outcome: Result<Option<Message>>,
}

impl SendReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// State shared by every send task on the connection.
struct Connection {
    writer: WriterHandle,
    /// Read half, locked for the whole request → response rendezvous.
    responses: Mutex<FrameReader<OwnedReadHalf>>,
    read_timeout: Option<Duration>,
    /// Set once a response went missing; the next frame can't be paired.
    broken: AtomicBool,
}

impl Connection {
    async fn send(
        &self,
        factory: &MessageFactory,
        message: Message,
        await_response: bool,
    ) -> Result<Option<Message>> {
        let bytes = message.encode()?;
        self.check_usable()?;

        if !(await_response && message.is_request()) {
            self.writer.send_payload(bytes)?;
            return Ok(None);
        }

        let mut responses = self.responses.lock().await;
        // the previous holder may have lost its response
        self.check_usable()?;
        self.writer.send_payload(bytes)?;

        let frame = match self.next_response(&mut responses).await {
            Ok(frame) => frame,
            Err(e) => {
                self.broken.store(true, Ordering::Release);
                tracing::warn!(error = %e, "response lost, connection unusable");
                return Err(e);
            }
        };
        drop(responses);

        let reply = factory.decode(&frame)?;
        if reply.category() != Category::Response {
            return Err(EndpointError::UnexpectedCategory(reply.category()));
        }
        Ok(Some(reply))
    }

    fn check_usable(&self) -> Result<()> {
        if self.broken.load(Ordering::Acquire) {
            return Err(EndpointError::ConnectionClosed);
        }
        Ok(())
    }

    async fn next_response(&self, responses: &mut FrameReader<OwnedReadHalf>) -> Result<Bytes> {
        let next = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, responses.next_frame())
                .await
                .map_err(|_| EndpointError::Timeout("response"))?,
            None => responses.next_frame().await,
        };
        next?.ok_or(EndpointError::ConnectionClosed)
    }
}

/// A connected client.
pub struct Client {
    target: String,
    peer: SocketAddr,
    factory: Arc<MessageFactory>,
    dispatcher: Dispatcher,
    connection: Arc<Connection>,
    await_responses: bool,
    shutdown_timeout: Duration,
    writer_task: JoinHandle<Result<()>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// `host:port` as configured, used in error reports.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    /// Submit one send task.
    ///
    /// With `await_responses` a REQUEST's handle resolves to its RESPONSE;
    /// every other send resolves to `None` once the frame is queued.
    pub fn send(&self, message: Message) -> TaskHandle<Option<Message>> {
        self.submit(message, self.await_responses)
    }

    /// Send one REQUEST and wait for its RESPONSE, regardless of the
    /// `await_responses` setting.
    pub async fn request(&self, payload: Value) -> Result<Message> {
        let message = self.factory.message(Category::Request, payload)?;
        self.submit(message, true)
            .join()
            .await?
            .ok_or(EndpointError::ConnectionClosed)
    }

    /// Construct and send a batch, reporting every message in input order.
    ///
    /// Descriptors whose category is not registered are reported as failures
    /// and never reach the wire; the rest of the batch still goes out.
    pub async fn send_all(&self, descriptors: &[MessageDescriptor]) -> Vec<SendReport> {
        let total = descriptors.len();

        let pending: Vec<_> = descriptors
            .iter()
            .map(|d| {
                self.factory
                    .construct(&d.category, d.payload.clone())
                    .map(|message| self.send(message))
            })
            .collect();

        let mut reports = Vec::with_capacity(total);
        for (index, pending) in pending.into_iter().enumerate() {
            let outcome = match pending {
                Ok(handle) => handle.join().await,
                Err(e) => Err(e),
            };

            let outcome = outcome.map_err(|source| {
                let err = EndpointError::Send {
                    index,
                    total,
                    target: self.target.clone(),
                    source: Box::new(source),
                };
                tracing::debug!(error = %err, "send failed");
                err
            });

            reports.push(SendReport {
                index,
                total,
                target: self.target.clone(),
                outcome,
            });
        }

        reports
    }

    /// Wait for outstanding sends, flush queued frames and close the
    /// connection.
    ///
    /// # Errors
    ///
    /// `Timeout` if sends do not finish within the shutdown timeout, or the
    /// writer's error if a queued frame could not be written.
    pub async fn close(self) -> Result<()> {
        self.dispatcher.shutdown(self.shutdown_timeout).await?;

        // last handle on the writer; dropping it ends the writer task
        drop(self.connection);

        match self.writer_task.await {
            Ok(result) => result,
            Err(e) => Err(EndpointError::Task(e.to_string())),
        }
    }

    fn submit(&self, message: Message, await_response: bool) -> TaskHandle<Option<Message>> {
        let connection = self.connection.clone();
        let factory = self.factory.clone();

        self.dispatcher.submit(async move {
            let category = message.category();
            let result = connection.send(&factory, message, await_response).await;
            tracing::debug!(%category, ok = result.is_ok(), "send finished");
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::write_frame;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.host, "127.0.0.1");
        assert_eq!(builder.port, 9001);
        assert!(builder.await_responses);
        assert_eq!(builder.categories, CategorySet::minimal());
        assert_eq!(builder.connect_timeout, None);
    }

    #[test]
    fn test_from_config() {
        let config = EndpointConfig {
            port: 7002,
            await_responses: false,
            connect_timeout_ms: Some(100),
            workers: 2,
            ..EndpointConfig::default()
        };

        let builder = ClientBuilder::from_config(&config).unwrap();

        assert_eq!(builder.port, 7002);
        assert!(!builder.await_responses);
        assert_eq!(builder.workers, 2);
        assert_eq!(builder.connect_timeout, Some(Duration::from_millis(100)));
    }

    /// Accept one connection and answer every frame with `reply`.
    async fn scripted_server(reply: Message) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut frames = FrameReader::new(read_half);
            let bytes = reply.encode().unwrap();
            while let Ok(Some(_)) = frames.next_frame().await {
                write_frame(&mut write_half, &bytes).await.unwrap();
            }
        });

        port
    }

    #[tokio::test]
    async fn test_request_receives_response() {
        let factory = MessageFactory::default();
        let reply = factory.message(Category::Response, json!({"text": "thanks"})).unwrap();
        let port = scripted_server(reply.clone()).await;

        let client = Client::builder().port(port).workers(2).connect().await.unwrap();
        let received = client.request(json!({"text": "hi"})).await.unwrap();

        assert_eq!(received, reply);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_response_reply_is_unexpected() {
        let factory = MessageFactory::new(CategorySet::extended());
        let reply = factory.message(Category::Publish, json!({})).unwrap();
        let port = scripted_server(reply).await;

        let client = Client::builder()
            .port(port)
            .categories(CategorySet::extended())
            .connect()
            .await
            .unwrap();
        let result = client.request(json!({})).await;

        assert!(matches!(
            result,
            Err(EndpointError::UnexpectedCategory(Category::Publish))
        ));
    }

    #[tokio::test]
    async fn test_send_all_reports_each_message() {
        let factory = MessageFactory::default();
        let reply = factory.message(Category::Response, json!({"n": 0})).unwrap();
        let port = scripted_server(reply).await;

        let client = Client::builder().port(port).workers(4).connect().await.unwrap();
        let batch = vec![
            MessageDescriptor::request(json!({"n": 1})),
            MessageDescriptor::new("BOGUS", json!({})),
            MessageDescriptor::request(json!({"n": 2})),
        ];

        let reports = client.send_all(&batch).await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_ok());
        assert!(reports[2].is_ok());
        match &reports[1].outcome {
            Err(EndpointError::Send {
                index,
                total,
                source,
                ..
            }) => {
                assert_eq!((*index, *total), (1, 3));
                assert!(matches!(**source, EndpointError::UnknownCategory(_)));
            }
            other => panic!("expected Send error, got {:?}", other),
        }

        let err = reports[1].outcome.as_ref().unwrap_err().to_string();
        assert!(err.starts_with(&format!("message 2/3 to 127.0.0.1:{} failed", port)));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sends_without_await_complete_on_enqueue() {
        let factory = MessageFactory::default();
        let reply = factory.message(Category::Response, json!({})).unwrap();
        let port = scripted_server(reply).await;

        let client = Client::builder()
            .port(port)
            .await_responses(false)
            .connect()
            .await
            .unwrap();
        let message = client.factory().message(Category::Request, json!({})).unwrap();

        assert_eq!(client.send(message).join().await.unwrap(), None);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_response_timeout_makes_connection_unusable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // echoes `n`, answering the first request only after the client gave up
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut frames = FrameReader::new(read_half);
            let factory = MessageFactory::default();
            while let Ok(Some(frame)) = frames.next_frame().await {
                let n = factory.decode(&frame).unwrap().payload()["n"].clone();
                if n == json!(1) {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                let reply = factory.message(Category::Response, json!({ "echo": n })).unwrap();
                write_frame(&mut write_half, &reply.encode().unwrap()).await.unwrap();
            }
        });

        let client = Client::builder()
            .port(port)
            .read_timeout(Duration::from_millis(50))
            .connect()
            .await
            .unwrap();

        let first = client.request(json!({"n": 1})).await;
        assert!(matches!(first, Err(EndpointError::Timeout("response"))));

        // the late `{"echo": 1}` must never be taken as this request's reply
        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = client.request(json!({"n": 2})).await;
        assert!(matches!(second, Err(EndpointError::ConnectionClosed)));

        let message = client.factory().message(Category::Request, json!({"n": 3})).unwrap();
        let third = client.submit(message, false).join().await;
        assert!(matches!(third, Err(EndpointError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let result = Client::builder().port(port).connect().await;
        assert!(matches!(result, Err(EndpointError::Io(_))));
    }
}
