//! # HTTP Server
//!
//! Hyper/Tokio front end for a [`Dispatcher`].
//!
//! ## Key Features
//!
//! - One task per connection, HTTP/1.1 keep-alive
//! - Body size limit enforced before dispatch
//! - Graceful shutdown on Ctrl-C: idle keep-alive connections close at once,
//!   in-flight requests finish within the drain limit

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{Cors, Response};
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Connection drain limit on shutdown
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            address: config.address(),
            shutdown_timeout: config.shutdown_timeout(),
            max_body_size: config.max_body_size,
        }
    }
}

/// HTTP server
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Serve `dispatcher` with `config`
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Listener settings
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The request pipeline
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accept connections until Ctrl-C, then drain
    ///
    /// # Errors
    ///
    /// `Error::Io` when the socket cannot be bound or accepting fails.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.address;

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(not(windows))]
        {
            socket.set_reuseport(true)?;
        }
        socket.bind(addr)?;

        Ok(socket.listen(1024)?)
    }

    /// Accept connections on `listener` until `signal` completes, then drain
    ///
    /// Idle connections are closed immediately; requests in flight get up to
    /// `shutdown_timeout` to finish.
    ///
    /// # Errors
    ///
    /// `Error::Io` when accepting fails.
    pub async fn serve_with_shutdown(
        &self,
        listener: TcpListener,
        signal: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(address = %listener.local_addr()?, "Server listening");

        let graceful = GracefulShutdown::new();
        let max_body_size = self.config.max_body_size;
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let dispatcher = self.dispatcher.clone();

                    let service = service_fn(move |req| {
                        let dispatcher = dispatcher.clone();
                        async move {
                            let response =
                                handle(req, &dispatcher, Some(remote_addr), max_body_size).await;
                            Ok::<_, Infallible>(response.into_hyper())
                        }
                    });
                    let connection = graceful.watch(http1::Builder::new().serve_connection(io, service));

                    tokio::task::spawn(async move {
                        if let Err(err) = connection.await {
                            debug!(peer = %remote_addr, error = %err, "Connection closed with error");
                        }
                    });
                }
                () = &mut signal => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let open = graceful.count();
        if tokio::time::timeout(self.config.shutdown_timeout, graceful.shutdown())
            .await
            .is_err()
        {
            warn!(open, "Shutdown timeout reached with open connections");
        }
        Ok(())
    }

    /// Execute a request directly without the network stack
    ///
    /// The body limit and body parsing apply exactly as for socket traffic.
    pub async fn test_request(&self, request: hyper::Request<Full<Bytes>>) -> Response {
        handle(request, &self.dispatcher, None, self.config.max_body_size).await
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

/// Body read and dispatch (network agnostic)
async fn handle<B>(
    req: hyper::Request<B>,
    dispatcher: &Dispatcher,
    remote_addr: Option<SocketAddr>,
    max_body_size: usize,
) -> Response
where
    B: Body<Data = Bytes>,
    B::Error: fmt::Display,
{
    let path = req.uri().path().to_string();
    match Request::from_hyper(req, max_body_size, remote_addr).await {
        Ok(request) => dispatcher.dispatch(request).await,
        Err(err) => {
            if matches!(err, Error::PayloadTooLarge { .. }) {
                warn!(path = %path, error = %err, "Request body rejected");
            } else {
                error!(path = %path, error = %err, "Failed to read request");
            }
            let mut response = Response::from_error(&err);
            Cors.apply(&mut response);
            response
        }
    }
}
