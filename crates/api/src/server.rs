//! Serving a [`Router`] over HTTP/1.1.
//!
//! The server accepts connections on a tokio [`TcpListener`] and serves each one on
//! its own task with hyper. Requests are handed to the [`Dispatcher`], which runs the
//! handlers; the accept loop itself never waits on a handler.
//!
//! ```no_run
//! # use micro_api::{HandlerResult, RequestContext, Server, handler_fn};
//! # use micro_api::router::{Router, get};
//! # use http::StatusCode;
//! async fn hello(ctx: &mut RequestContext) -> HandlerResult {
//!     ctx.respond_text(StatusCode::OK, "hello")?;
//!     Ok(())
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::builder().route("/", get(handler_fn(hello))).build()?;
//! let server = Server::builder().address("127.0.0.1:8080").router(router).build()?;
//! server.run(async { tokio::signal::ctrl_c().await.unwrap_or_default() }).await?;
//! # Ok(())
//! # }
//! ```

use crate::body::request_body;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::router::Router;
use http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct ServerBuilder {
    router: Option<Router>,
    config: ServerConfig,
    address_error: Option<io::Error>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { router: None, config: ServerConfig::default(), address_error: None }
    }

    /// Sets the address to bind. An address that cannot be resolved fails [`build`](Self::build).
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        match address.to_socket_addrs() {
            Ok(addresses) => {
                self.config.address = addresses.collect();
                self.address_error = None;
            }
            Err(e) => self.address_error = Some(e),
        }
        self
    }

    /// Keeps the configured host and binds `port` instead.
    pub fn port(mut self, port: u16) -> Self {
        self.config.address.iter_mut().for_each(|address| address.set_port(port));
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn max_concurrent_requests(mut self, max_concurrent_requests: usize) -> Self {
        self.config.max_concurrent_requests = max_concurrent_requests;
        self
    }

    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.max_body_size = max_body_size;
        self
    }

    /// Replaces every setting made so far except the router.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self.address_error = None;
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        if let Some(e) = self.address_error {
            return Err(ServerError::InvalidAddress(e));
        }
        let router = self.router.ok_or(ServerError::MissingRouter)?;
        if self.config.address.is_empty() {
            return Err(ServerError::MissingAddress);
        }
        if self.config.max_concurrent_requests == 0 {
            return Err(ServerError::ZeroConcurrency);
        }

        Ok(Server { dispatcher: Dispatcher::new(router, &self.config), config: self.config })
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("router must be set")]
    MissingRouter,
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(#[source] io::Error),
    #[error("max concurrent requests must be greater than zero")]
    ZeroConcurrency,
    #[error("failed to bind {address:?}: {source}")]
    Bind {
        address: Vec<SocketAddr>,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct Server {
    dispatcher: Dispatcher,
    config: ServerConfig,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the listener and starts accepting connections in the background.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let bind_error = |source| ServerError::Bind { address: self.config.address.clone(), source };
        let listener = TcpListener::bind(self.config.address.as_slice()).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!(address = %local_addr, "start listening");

        let dispatcher = Arc::new(self.dispatcher);
        let shutdown = CancellationToken::new();
        let connections = TaskTracker::new();

        let acceptor = tokio::spawn(accept(
            listener,
            Arc::clone(&dispatcher),
            shutdown.clone(),
            connections.clone(),
        ));

        Ok(ServerHandle { local_addr, dispatcher, shutdown, connections, acceptor })
    }

    /// Serves until `signal` completes, then stops gracefully.
    pub async fn run(self, signal: impl Future<Output = ()>) -> Result<(), ServerError> {
        let handle = self.start().await?;
        signal.await;
        handle.stop().await;
        Ok(())
    }
}

/// Controls a started [`Server`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    connections: TaskTracker,
    acceptor: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is bound to, with the real port when port 0 was configured.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the open ones to finish.
    ///
    /// Requests already being handled run to completion and get their response; idle
    /// connections are closed. Handler tasks whose client went away are waited for too.
    pub async fn stop(self) {
        info!(address = %self.local_addr, "stopping server");
        self.shutdown.cancel();

        if let Err(e) = self.acceptor.await {
            error!(cause = %e, "accept loop failed");
        }

        self.connections.close();
        self.connections.wait().await;
        self.dispatcher.close();
        self.dispatcher.wait().await;
        info!(address = %self.local_addr, "server stopped");
    }
}

async fn accept(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken, connections: TaskTracker) {
    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        connections.spawn(serve(tcp_stream, remote_addr, Arc::clone(&dispatcher), shutdown.clone()));
    }

    info!("stop accepting connections");
}

async fn serve(tcp_stream: TcpStream, remote_addr: SocketAddr, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
    debug!(%remote_addr, "connection accepted");

    let service = service_fn(move |request: Request<Incoming>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { Ok::<_, Infallible>(dispatcher.dispatch(request.map(request_body)).await) }
    });

    let mut connection = pin!(http1::Builder::new().serve_connection(TokioIo::new(tcp_stream), service));
    let mut draining = false;

    let result = loop {
        tokio::select! {
            result = connection.as_mut() => break result,
            _ = shutdown.cancelled(), if !draining => {
                connection.as_mut().graceful_shutdown();
                draining = true;
            }
        }
    };

    match result {
        Ok(()) => debug!(%remote_addr, "connection closed"),
        Err(e) => warn!(%remote_addr, cause = %e, "connection closed with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::{Server, ServerError};
    use crate::config::ServerConfig;
    use crate::handler::{HandlerResult, handler_fn};
    use crate::router::{Router, get, post};
    use crate::RequestContext;
    use http::StatusCode;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_user(ctx: &mut RequestContext) -> HandlerResult {
        let id = ctx.path_param("id").unwrap_or_default().to_owned();
        ctx.respond(StatusCode::OK, &json!({ "id": id }))?;
        Ok(())
    }

    async fn upload(ctx: &mut RequestContext) -> HandlerResult {
        let file = ctx.form_field("file").ok_or("file field is missing")?;
        let body = json!({ "fileName": file.file_name, "contentType": file.content_type });
        ctx.respond(StatusCode::OK, &body)?;
        Ok(())
    }

    async fn slow(ctx: &mut RequestContext) -> HandlerResult {
        tokio::time::sleep(Duration::from_millis(200)).await;
        ctx.respond_text(StatusCode::OK, "finally")?;
        Ok(())
    }

    async fn crawl(ctx: &mut RequestContext) -> HandlerResult {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ctx.respond_text(StatusCode::OK, "crawled")?;
        Ok(())
    }

    async fn boom(_ctx: &mut RequestContext) -> HandlerResult {
        panic!("boom")
    }

    fn router() -> Router {
        Router::builder()
            .route("/users/{id}", get(handler_fn(get_user)))
            .route("/upload", post(handler_fn(upload)))
            .route("/slow", get(handler_fn(slow)))
            .route("/crawl", get(handler_fn(crawl)))
            .route("/boom", get(handler_fn(boom)))
            .build()
            .unwrap()
    }

    async fn start() -> super::ServerHandle {
        Server::builder().address("127.0.0.1:0").router(router()).build().unwrap().start().await.unwrap()
    }

    async fn send(address: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_build_errors() {
        assert!(matches!(Server::builder().build(), Err(ServerError::MissingRouter)));
        assert!(matches!(
            Server::builder().router(router()).max_concurrent_requests(0).build(),
            Err(ServerError::ZeroConcurrency)
        ));
        assert!(matches!(
            Server::builder().address("not an address").router(router()).build(),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_builder_settings() {
        let server = Server::builder().router(router()).port(9090).max_body_size(16).build().unwrap();
        assert_eq!(server.config().address[0].port(), 9090);
        assert_eq!(server.config().max_body_size, 16);

        let config = ServerConfig { max_concurrent_requests: 4, ..ServerConfig::with_port(0) };
        let server = Server::builder().router(router()).config(config.clone()).build().unwrap();
        assert_eq!(server.config(), &config);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_path_params() {
        let handle = start().await;

        let response = send(handle.local_addr(), "GET /users/42 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("content-type: application/json"), "{response}");
        assert!(response.ends_with(r#"{"id":"42"}"#), "{response}");
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_not_found_and_method_not_allowed() {
        let handle = start().await;

        let response = send(handle.local_addr(), "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
        assert!(response.ends_with(r#"{"error":"Not Found"}"#), "{response}");

        let response =
            send(handle.local_addr(), "DELETE /users/1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{response}");
        assert!(response.contains("allow: GET"), "{response}");
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_multipart_upload() {
        let handle = start().await;

        let body = "--B\r\n\
                    Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    hello\r\n\
                    --B--\r\n";
        let raw = format!(
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
             Content-Type: multipart/form-data; boundary=B\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let response = send(handle.local_addr(), &raw).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        let json_start = response.find('{').unwrap();
        let json: serde_json::Value = serde_json::from_str(&response[json_start..]).unwrap();
        assert_eq!(json, json!({"fileName": "a.txt", "contentType": "text/plain"}));
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_requests() {
        let handle = start().await;
        let address = handle.local_addr();

        let in_flight = tokio::spawn(async move {
            send(address, "GET /slow HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.stop().await;

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("finally"), "{response}");

        assert!(TcpStream::connect(address).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requests_do_not_block_each_other() {
        let handle = start().await;
        let address = handle.local_addr();
        let started = Instant::now();

        let crawling = tokio::spawn(async move {
            let response = send(address, "GET /crawl HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
            (response, started.elapsed())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let response = send(address, "GET /boom HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{response}");

        let response = send(address, "GET /users/7 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
        let fast_elapsed = started.elapsed();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(fast_elapsed < Duration::from_millis(400), "{fast_elapsed:?}");

        let (response, crawl_elapsed) = crawling.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("crawled"), "{response}");
        assert!(fast_elapsed < crawl_elapsed, "{fast_elapsed:?} vs {crawl_elapsed:?}");
        handle.stop().await;
    }
}
