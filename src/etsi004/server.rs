//! Node side of the ETSI 004 socket protocol.
//!
//! [`StreamServer`] accepts TCP connections, reads request frames, hands
//! them to any [`StreamBackend`] and writes the response frames back. One
//! task per connection; requests on a connection are served in order.
//!
//! Streams opened over a connection and not closed on it are abandoned on
//! the backend when the peer goes away. The simulator frees a stream no peer
//! joined at once; a joined stream keeps serving the other end until its TTL.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use qkd_etsi_api::etsi004::{SimulatedStreamBackend, StreamServer};
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:25575").await?;
//! let server = StreamServer::new(Arc::new(SimulatedStreamBackend::new()));
//! server.serve(listener).await
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use super::{Ksid, Metadata, Role, StreamBackend, StreamStatus};
use crate::error::{StreamError, WireError, WireResult};
use crate::protocol::{
    read_frame_opt, write_frame, CloseRequest, CloseResponse, Frame, GetKeyRequest,
    GetKeyResponse, Message, OpenConnectRequest, OpenConnectResponse, ServiceType,
    DEFAULT_MAX_PAYLOAD_SIZE,
};

/// Serves ETSI 004 frames from a backend.
#[derive(Clone)]
pub struct StreamServer {
    backend: Arc<dyn StreamBackend>,
    max_payload_size: u32,
}

impl StreamServer {
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        Self {
            backend,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Largest request payload accepted.
    ///
    /// Default: 16 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
            }
            tracing::debug!(peer = %peer, "peer connected");

            let server = server.clone();
            tokio::spawn(async move {
                match server.handle_connection(stream).await {
                    Ok(()) => tracing::debug!(peer = %peer, "peer disconnected"),
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "connection closed on error")
                    }
                }
            });
        }
    }

    /// Serve one connection until the peer disconnects.
    ///
    /// Whether the connection ends cleanly or on error, every stream it
    /// opened and did not close is handed to [`StreamBackend::abandon`].
    pub async fn handle_connection<S>(&self, mut stream: S) -> WireResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut opened = HashSet::new();
        let result = self.serve_frames(&mut stream, &mut opened).await;
        for ksid in opened {
            match self.backend.abandon(ksid).await {
                Ok(()) => tracing::debug!(ksid = %ksid, "abandoned stream left open by peer"),
                Err(e) => log_failure("abandon", &e),
            }
        }
        result
    }

    async fn serve_frames<S>(&self, stream: &mut S, opened: &mut HashSet<Ksid>) -> WireResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(frame) = read_frame_opt(stream, self.max_payload_size).await? {
            let (response, change) = self.answer(&frame).await?;
            match change {
                Some(SessionChange::Opened(ksid)) => {
                    opened.insert(ksid);
                }
                Some(SessionChange::Closed(ksid)) => {
                    opened.remove(&ksid);
                }
                None => {}
            }
            write_frame(stream, &response).await?;
        }
        Ok(())
    }

    /// Answer a single request frame.
    pub async fn dispatch(&self, frame: &Frame) -> WireResult<Frame> {
        self.answer(frame).await.map(|(response, _)| response)
    }

    async fn answer(&self, frame: &Frame) -> WireResult<(Frame, Option<SessionChange>)> {
        match frame.service_type()? {
            ServiceType::OpenConnectRequest => {
                let request = OpenConnectRequest::from_frame(frame)?;
                let response = self.open(request).await;
                let open = StreamStatus::from_code(response.status)
                    .is_some_and(StreamStatus::is_open);
                let change = response
                    .granted
                    .as_ref()
                    .filter(|_| open)
                    .map(|(_, ksid)| SessionChange::Opened(*ksid));
                Ok((response.to_frame(), change))
            }
            ServiceType::GetKeyRequest => {
                let request = GetKeyRequest::from_frame(frame)?;
                Ok((self.get_key(request).await.to_frame(), None))
            }
            ServiceType::CloseRequest => {
                let request = CloseRequest::from_frame(frame)?;
                let ksid = request.ksid;
                let response = self.close(request).await;
                let change = (response.status == StreamStatus::Success.code())
                    .then_some(SessionChange::Closed(ksid));
                Ok((response.to_frame(), change))
            }
            other => {
                tracing::warn!(service_type = other.as_i8(), "response frame sent to server");
                Err(WireError::Malformed(format!(
                    "service type {:#04x} is not a request",
                    other.as_i8()
                )))
            }
        }
    }

    async fn open(&self, request: OpenConnectRequest) -> OpenConnectResponse {
        let role = Role::from_wire(request.ksid);
        let result = self
            .backend
            .open(&request.source, &request.destination, &request.qos, role)
            .await;
        match result {
            Ok(outcome) => OpenConnectResponse {
                status: outcome.status.code(),
                granted: Some((outcome.qos, outcome.ksid)),
            },
            Err(e) => {
                log_failure("open", &e);
                let granted = (e.status() == StreamStatus::QosNotMet)
                    .then(|| (request.qos.clone(), request.ksid));
                OpenConnectResponse {
                    status: e.status().code(),
                    granted,
                }
            }
        }
    }

    async fn get_key(&self, request: GetKeyRequest) -> GetKeyResponse {
        // A zero capacity means the client did not ask for metadata.
        let mut metadata = (request.metadata_capacity > 0)
            .then(|| Metadata::with_capacity(request.metadata_capacity));
        let result = self
            .backend
            .get_key(request.ksid, request.index, metadata.as_mut())
            .await;
        match result {
            Ok(chunk) => GetKeyResponse {
                status: StreamStatus::Success.code(),
                index: chunk.index(),
                key: chunk.key().to_vec(),
                metadata: metadata.map(|m| m.as_bytes().to_vec()).unwrap_or_default(),
            },
            Err(e) => {
                log_failure("get_key", &e);
                GetKeyResponse::failure(e.status())
            }
        }
    }

    async fn close(&self, request: CloseRequest) -> CloseResponse {
        match self.backend.close(request.ksid).await {
            Ok(()) => CloseResponse {
                status: StreamStatus::Success.code(),
            },
            Err(e) => {
                log_failure("close", &e);
                CloseResponse {
                    status: e.status().code(),
                }
            }
        }
    }
}

/// Effect of one request on the set of streams a connection owns.
enum SessionChange {
    Opened(Ksid),
    Closed(Ksid),
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("backend", &self.backend.name())
            .field("max_payload_size", &self.max_payload_size)
            .finish()
    }
}

fn log_failure(operation: &str, err: &StreamError) {
    match err {
        StreamError::Wire(_) | StreamError::Unsupported { .. } => {
            tracing::error!(operation, error = %err, "backend failure")
        }
        _ => tracing::debug!(operation, status = %err.status(), "request refused"),
    }
}
