//! File-transfer sessions
//!
//! The backup retriever talks to mixers through [`TransferConnector`] and
//! [`TransferSession`] so the pipeline can run against an in-memory fake.
//! The production implementation is FTP via `suppaftp`. Its client is
//! blocking, so every call runs on tokio's blocking pool with the stream
//! moved in and back out. A stream that timed out or lost its connection is
//! not handed back; the session then reports itself closed and the caller
//! opens a new one.

use async_trait::async_trait;
use mxgui_common::config::TransferConfig;
use std::net::ToSocketAddrs;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use thiserror::Error;

use crate::services::prober::service_target;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("login failed: {0}")]
    Login(String),

    #[error("listing {dir} failed: {reason}")]
    List { dir: String, reason: String },

    #[error("retrieving {path} failed: {reason}")]
    Retrieve { path: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    /// The session lost its connection in an earlier operation
    #[error("session closed")]
    Closed,

    #[error("transfer worker failed: {0}")]
    Worker(String),
}

/// Opens sessions to mixers
#[async_trait]
pub trait TransferConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn TransferSession>, TransferError>;
}

/// An authenticated session with one mixer
#[async_trait]
pub trait TransferSession: Send {
    /// Entry names in `dir`; servers may return bare names or full paths
    async fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError>;

    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError>;

    /// Whether the session can still carry commands
    ///
    /// Turns false after a timed-out or broken operation.
    fn is_open(&self) -> bool;

    /// Best effort; errors are ignored
    async fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// FTP connector using fixed credentials
#[derive(Debug, Clone)]
pub struct FtpConnector {
    port: u16,
    credentials: Credentials,
    connect_timeout: Duration,
}

impl FtpConnector {
    pub fn new(port: u16, credentials: Credentials, connect_timeout: Duration) -> Self {
        Self {
            port,
            credentials,
            connect_timeout,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.port,
            Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            config.timeout(),
        )
    }

    /// Socket address dialed for `address`, always on the transfer port
    pub fn target(&self, address: &str) -> String {
        service_target(address, self.port)
    }
}

#[async_trait]
impl TransferConnector for FtpConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn TransferSession>, TransferError> {
        let target = self.target(address);
        let credentials = self.credentials.clone();
        let timeout = self.connect_timeout;

        let stream = tokio::task::spawn_blocking(move || open_ftp(&target, &credentials, timeout))
            .await
            .map_err(|e| TransferError::Worker(e.to_string()))??;

        Ok(Box::new(FtpSession {
            stream: Some(stream),
        }))
    }
}

fn open_ftp(
    target: &str,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<FtpStream, TransferError> {
    let connect_error = |reason: String| TransferError::Connect {
        address: target.to_string(),
        reason,
    };

    let socket_addr = target
        .to_socket_addrs()
        .map_err(|e| connect_error(e.to_string()))?
        .next()
        .ok_or_else(|| connect_error("address did not resolve".to_string()))?;

    let mut stream =
        FtpStream::connect_timeout(socket_addr, timeout).map_err(|e| connect_error(e.to_string()))?;

    // A stalled server must fail the blocking call instead of holding the
    // worker past the caller's own timeout.
    let socket = stream.get_ref();
    socket
        .set_read_timeout(Some(timeout))
        .and_then(|()| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| connect_error(e.to_string()))?;

    stream
        .login(credentials.username.as_str(), credentials.password.as_str())
        .map_err(|e| TransferError::Login(e.to_string()))?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| connect_error(e.to_string()))?;

    Ok(stream)
}

struct FtpSession {
    stream: Option<FtpStream>,
}

impl FtpSession {
    /// Run `op` against the stream on the blocking pool
    ///
    /// The stream is put back only if `op` left the connection usable. If
    /// the caller gives up (timeout, cancellation) while `op` runs, the
    /// stream stays with the worker. Either way the session is closed
    /// afterwards.
    async fn with_stream<T, F, E>(&mut self, op: F, error: E) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T, FtpError> + Send + 'static,
        E: FnOnce(String) -> TransferError,
    {
        let mut stream = self.stream.take().ok_or(TransferError::Closed)?;
        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream);
            (stream, result)
        })
        .await
        .map_err(|e| TransferError::Worker(e.to_string()))?;

        match result {
            Ok(value) => {
                self.stream = Some(stream);
                Ok(value)
            }
            Err(FtpError::ConnectionError(e)) => Err(error(e.to_string())),
            Err(e) => {
                self.stream = Some(stream);
                Err(error(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl TransferSession for FtpSession {
    async fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let owned = dir.to_string();
        self.with_stream(
            move |stream| stream.nlst(Some(owned.as_str())),
            |reason| TransferError::List {
                dir: dir.to_string(),
                reason,
            },
        )
        .await
    }

    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let owned = path.to_string();
        self.with_stream(
            move |stream| {
                stream
                    .retr_as_buffer(owned.as_str())
                    .map(|cursor| cursor.into_inner())
            },
            |reason| TransferError::Retrieve {
                path: path.to_string(),
                reason,
            },
        )
        .await
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::task::spawn_blocking(move || stream.quit()).await;
        }
    }
}
