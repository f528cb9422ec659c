//! ETSI 004 backend that talks to a remote node over TCP.
//!
//! Each opened stream owns one connection to the node named by its
//! `server://host[:port]` destination. Requests and responses are single
//! frames exchanged in lockstep on that connection. Every exchange is
//! bounded by the stream's QoS timeout and never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{KeyChunk, Ksid, Metadata, OpenOutcome, Qos, Role, StreamBackend, StreamStatus};
use crate::config::SocketConfig;
use crate::error::{StreamError, StreamResult, WireError};
use crate::protocol::{
    read_frame, write_frame, CloseRequest, CloseResponse, GetKeyRequest, GetKeyResponse, Message,
    OpenConnectRequest, OpenConnectResponse,
};
use crate::registry::BoxFuture;

/// One stream's connection to the node.
#[derive(Debug)]
struct Connection {
    stream: Mutex<TcpStream>,
    timeout: Option<Duration>,
}

/// Remote socket backend.
#[derive(Debug)]
pub struct SocketStreamBackend {
    config: SocketConfig,
    connections: Mutex<HashMap<Ksid, Arc<Connection>>>,
}

impl SocketStreamBackend {
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    pub fn with_config(config: SocketConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Number of streams with an open connection.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    async fn connect(&self, destination: &str) -> StreamResult<TcpStream> {
        let addr = self.config.resolve_destination(destination)?;
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                // Frames are small and strictly request/response.
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(addr = %addr, error = %e, "set_nodelay failed");
                }
                Ok(stream)
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %addr, error = %e, "connect failed");
                Err(StreamError::NoConnection(format!("connect to {}: {}", addr, e)))
            }
            Err(_) => Err(StreamError::Timeout(millis(timeout))),
        }
    }

    async fn lookup(&self, ksid: &Ksid) -> StreamResult<Arc<Connection>> {
        self.connections
            .lock()
            .await
            .get(ksid)
            .cloned()
            .ok_or(StreamError::PeerNotConnected(*ksid))
    }

    async fn forget(&self, ksid: &Ksid) {
        if self.connections.lock().await.remove(ksid).is_some() {
            tracing::debug!(ksid = %ksid, "connection dropped");
        }
    }

    /// Forget the connection when the error means it is no longer usable.
    async fn on_error(&self, ksid: &Ksid, err: &StreamError) {
        if matches!(
            err,
            StreamError::Wire(_) | StreamError::Timeout(_) | StreamError::PeerNotConnected(_)
        ) {
            self.forget(ksid).await;
        }
    }

    async fn open_stream(
        &self,
        source: &str,
        destination: &str,
        qos: &Qos,
        role: Role,
    ) -> StreamResult<OpenOutcome> {
        let mut stream = self.connect(destination).await?;
        let request = OpenConnectRequest {
            source: source.to_string(),
            destination: destination.to_string(),
            qos: qos.clone(),
            ksid: role.wire_ksid(),
        };
        let response: OpenConnectResponse = exchange(
            &mut stream,
            &request,
            self.config.max_payload_size,
            qos.timeout_duration(),
        )
        .await?;

        let status = StreamStatus::from_code(response.status)
            .ok_or(StreamError::UnknownStatus(response.status))?;
        if !status.is_open() {
            return Err(StreamError::from_peer_status(status, role.wire_ksid()));
        }
        // A bare PeerDisconnected leaves the requested QoS and KSID in force.
        let (agreed, ksid) = match response.granted {
            Some(granted) => granted,
            None if !role.wire_ksid().is_nil() => (qos.clone(), role.wire_ksid()),
            None => {
                return Err(StreamError::Wire(WireError::Malformed(
                    "open response without a KSID".to_string(),
                )))
            }
        };

        let connection = Arc::new(Connection {
            stream: Mutex::new(stream),
            timeout: agreed.timeout_duration(),
        });
        let previous = self.connections.lock().await.insert(ksid, connection);
        if previous.is_some() {
            tracing::warn!(ksid = %ksid, "replaced existing connection");
        }

        tracing::debug!(ksid = %ksid, destination, status = %status, "remote stream opened");
        Ok(OpenOutcome {
            status,
            ksid,
            qos: agreed,
        })
    }

    async fn fetch_key(
        &self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&mut Metadata>,
    ) -> StreamResult<KeyChunk> {
        let result = self.fetch_key_inner(ksid, index, metadata).await;
        if let Err(e) = &result {
            self.on_error(&ksid, e).await;
        }
        result
    }

    async fn fetch_key_inner(
        &self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&mut Metadata>,
    ) -> StreamResult<KeyChunk> {
        let connection = self.lookup(&ksid).await?;
        let metadata_capacity = metadata.as_ref().map_or(0, |m| m.capacity());
        let request = GetKeyRequest {
            ksid,
            index,
            metadata_capacity,
        };

        let mut response: GetKeyResponse = {
            let mut stream = connection.stream.lock().await;
            exchange(
                &mut *stream,
                &request,
                self.config.max_payload_size,
                connection.timeout,
            )
            .await?
        };

        match StreamStatus::from_code(response.status) {
            Some(StreamStatus::Success) => {}
            Some(StreamStatus::InsufficientKey) => {
                return Err(StreamError::InsufficientKey { index, horizon: 0 })
            }
            // The wire carries no required size; report what was offered.
            Some(StreamStatus::MetadataSizeError) => {
                return Err(StreamError::MetadataSize {
                    required: 0,
                    capacity: metadata_capacity,
                })
            }
            Some(status) => return Err(StreamError::from_peer_status(status, ksid)),
            None => return Err(StreamError::UnknownStatus(response.status)),
        }

        if let Some(md) = metadata {
            md.fill(&response.metadata)?;
        }
        let key = std::mem::take(&mut response.key);
        Ok(KeyChunk::new(response.index, key))
    }

    async fn close_stream(&self, ksid: Ksid) -> StreamResult<()> {
        let result = self.close_inner(ksid).await;
        if let Err(e) = &result {
            self.on_error(&ksid, e).await;
        }
        result
    }

    async fn close_inner(&self, ksid: Ksid) -> StreamResult<()> {
        let connection = self.lookup(&ksid).await?;
        let response: CloseResponse = {
            let mut stream = connection.stream.lock().await;
            exchange(
                &mut *stream,
                &CloseRequest { ksid },
                self.config.max_payload_size,
                connection.timeout,
            )
            .await?
        };

        match StreamStatus::from_code(response.status) {
            // The node may still hold the stream until its TTL runs out,
            // so the connection stays open for further requests.
            Some(StreamStatus::Success) => Ok(()),
            Some(status) => Err(StreamError::from_peer_status(status, ksid)),
            None => Err(StreamError::UnknownStatus(response.status)),
        }
    }
}

impl Default for SocketStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBackend for SocketStreamBackend {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn open<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
        qos: &'a Qos,
        role: Role,
    ) -> BoxFuture<'a, StreamResult<OpenOutcome>> {
        Box::pin(self.open_stream(source, destination, qos, role))
    }

    fn get_key<'a>(
        &'a self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&'a mut Metadata>,
    ) -> BoxFuture<'a, StreamResult<KeyChunk>> {
        Box::pin(self.fetch_key(ksid, index, metadata))
    }

    fn close(&self, ksid: Ksid) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(self.close_stream(ksid))
    }
}

/// Send one request frame and read the matching response frame.
async fn exchange<Req, Resp>(
    stream: &mut TcpStream,
    request: &Req,
    max_payload_size: u32,
    deadline: Option<Duration>,
) -> StreamResult<Resp>
where
    Req: Message,
    Resp: Message,
{
    let round_trip = async {
        write_frame(stream, &request.to_frame()).await?;
        let frame = read_frame(stream, max_payload_size).await?;
        Resp::from_frame(&frame)
    };

    let response = match deadline {
        Some(limit) => tokio::time::timeout(limit, round_trip)
            .await
            .map_err(|_| StreamError::Timeout(millis(limit)))?,
        None => round_trip.await,
    };
    Ok(response?)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
