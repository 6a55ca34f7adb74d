use crate::credentials::TransportSecurity;
use crate::metrics::ChannelMetrics;
use batch_worker_core::{EndpointDescriptor, Result, WorkerError};
use batch_worker_metrics::MetricsRegistry;
use batch_worker_protocol::{HeartbeatRequest, Message, MessageCodec};

use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info};

trait ChannelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ChannelIo for T {}

type Connection = Framed<Box<dyn ChannelIo>, MessageCodec>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// TLS server name; defaults to the host part of the target address
    pub server_name: Option<String>,
    /// Bound on TCP connect plus TLS handshake
    pub connect_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            server_name: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Outbound connection descriptor to the orchestration service.
///
/// Construction proves the target is reachable and answers a heartbeat
/// (with a security context, that the server accepted our identity). Every
/// call then runs on its own connection so concurrent long-polls do not
/// queue behind each other.
pub struct SecureChannel {
    target_address: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    connect_timeout: Duration,
    metrics: ChannelMetrics,
}

impl SecureChannel {
    pub async fn connect(
        endpoint: &EndpointDescriptor,
        security: Option<TransportSecurity>,
        options: ChannelOptions,
        registry: &MetricsRegistry,
    ) -> Result<Self> {
        let metrics = ChannelMetrics::register(registry)?;

        let tls = match security {
            Some(security) => {
                let name = options
                    .server_name
                    .clone()
                    .unwrap_or_else(|| endpoint.host().to_string());
                let server_name = ServerName::try_from(name.clone()).map_err(|e| {
                    WorkerError::configuration(format!("invalid TLS server name {}: {}", name, e))
                })?;
                Some((TlsConnector::from(security.client_config()), server_name))
            }
            None => None,
        };

        let channel = SecureChannel {
            target_address: endpoint.target_address().to_string(),
            tls,
            connect_timeout: options.connect_timeout,
            metrics,
        };

        let connection = channel.open().await?;
        channel.confirm(connection, endpoint.namespace()).await?;
        info!(
            "Connected to {} ({})",
            channel.target_address,
            if channel.is_secure() { "tls" } else { "cleartext" }
        );

        Ok(channel)
    }

    pub fn target_address(&self) -> &str {
        &self.target_address
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Send one request and wait for its response, recording call metrics.
    ///
    /// A `Nack` from the server, or no answer within `deadline`, is returned
    /// as a `Transport` error and counted as a failure.
    pub async fn call(
        &self,
        method: &'static str,
        request: Message,
        deadline: Option<Duration>,
    ) -> Result<Message> {
        self.metrics.requests.with_label_values(&[method]).inc();
        let timer = self.metrics.latency.with_label_values(&[method]).start_timer();

        let result = match deadline {
            Some(deadline) => timeout(deadline, self.exchange(request))
                .await
                .unwrap_or_else(|_| {
                    Err(WorkerError::transport(format!(
                        "{} got no answer from {} within {:?}",
                        method, self.target_address, deadline
                    )))
                }),
            None => self.exchange(request).await,
        };

        timer.observe_duration();
        if let Err(e) = &result {
            debug!("{} failed: {}", method, e);
            self.metrics.failures.with_label_values(&[method]).inc();
        }
        result
    }

    async fn exchange(&self, request: Message) -> Result<Message> {
        let mut connection = self.open().await?;

        connection
            .send(request)
            .await
            .map_err(|e| WorkerError::transport(format!("send failed: {}", e)))?;

        match connection.next().await {
            Some(Ok(Message::Nack(nack))) => Err(WorkerError::transport(format!(
                "request rejected: {}",
                nack.error
            ))),
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(WorkerError::transport(format!("protocol error: {}", e))),
            None => Err(WorkerError::transport(format!(
                "connection to {} closed before a response arrived",
                self.target_address
            ))),
        }
    }

    /// Round-trip a heartbeat on a freshly opened connection.
    ///
    /// A TLS 1.3 client completes its handshake before the server has checked
    /// the client certificate, so a rejected identity only surfaces here.
    async fn confirm(&self, mut connection: Connection, namespace: &str) -> Result<()> {
        let heartbeat = Message::Heartbeat(HeartbeatRequest {
            namespace: namespace.to_string(),
        });

        let reply = timeout(self.connect_timeout, async {
            connection.send(heartbeat).await?;
            connection.next().await.transpose()
        })
        .await
        .map_err(|_| {
            WorkerError::transport(format!(
                "{} did not answer a heartbeat within {:?}",
                self.target_address, self.connect_timeout
            ))
        })?;

        match reply {
            Ok(Some(Message::Ack(_))) => Ok(()),
            Ok(Some(Message::Nack(nack))) => Err(WorkerError::transport(format!(
                "session with {} rejected: {}",
                self.target_address, nack.error
            ))),
            Ok(Some(other)) => Err(WorkerError::transport(format!(
                "unexpected heartbeat reply from {}: {:?}",
                self.target_address,
                other.message_type()
            ))),
            Ok(None) => Err(WorkerError::transport(format!(
                "session with {} closed during heartbeat",
                self.target_address
            ))),
            Err(e) => Err(WorkerError::transport(format!(
                "session with {} rejected: {}",
                self.target_address, e
            ))),
        }
    }

    async fn open(&self) -> Result<Connection> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.target_address))
            .await
            .map_err(|_| {
                WorkerError::transport(format!(
                    "connect to {} timed out after {:?}",
                    self.target_address, self.connect_timeout
                ))
            })?
            .map_err(|e| {
                WorkerError::transport(format!("connect to {} failed: {}", self.target_address, e))
            })?;
        let _ = stream.set_nodelay(true);

        let io: Box<dyn ChannelIo> = match &self.tls {
            Some((connector, server_name)) => {
                let stream = timeout(
                    self.connect_timeout,
                    connector.connect(server_name.clone(), stream),
                )
                .await
                .map_err(|_| {
                    WorkerError::transport(format!(
                        "TLS handshake with {} timed out",
                        self.target_address
                    ))
                })?
                .map_err(|e| {
                    WorkerError::transport(format!(
                        "TLS handshake with {} failed: {}",
                        self.target_address, e
                    ))
                })?;
                Box::new(stream)
            }
            None => Box::new(stream),
        };

        Ok(Framed::new(io, MessageCodec))
    }
}
