use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// An event produced by the transport layer. The transport moves raw bytes;
/// framing happens above it.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    DataReceived(Bytes),
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes raw bytes to the peer.
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it along with its event stream.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type TlsWriteHalf = WriteHalf<TlsStream<TcpStream>>;
type TlsReadHalf = ReadHalf<TlsStream<TcpStream>>;

const READ_CHUNK_SIZE: usize = 8192;
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// TLS-over-TCP transport for the production endpoint.
pub struct TlsTransport {
    writer: Arc<Mutex<Option<TlsWriteHalf>>>,
}

#[async_trait]
impl Transport for TlsTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;
        writer.write_all(data).await?;
        writer.flush().await?;
        trace!("--> wrote {} bytes", data.len());
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Dials `host:port`, upgrades to TLS and spawns a read pump that forwards
/// received chunks as `TransportEvent::DataReceived`.
pub struct TlsTransportFactory {
    host: String,
    port: u16,
}

impl TlsTransportFactory {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn tls_connector() -> Result<TlsConnector, anyhow::Error> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            // Skip certificates the trust store itself refuses to parse.
            let _ = roots.add(cert);
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }
}

#[async_trait]
impl TransportFactory for TlsTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
            debug!("rustls crypto provider install: {e:?}");
        }

        info!("Dialing {}:{}", self.host, self.port);
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;

        let connector = Self::tls_connector()?;
        let server_name = ServerName::try_from(self.host.clone())?;
        let stream = connector.connect(server_name, tcp).await?;
        debug!("TLS established with {}", self.host);

        let (read_half, write_half) = tokio::io::split(stream);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let transport = Arc::new(TlsTransport {
            writer: Arc::new(Mutex::new(Some(write_half))),
        });

        tokio::task::spawn(read_pump(read_half, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut reader: TlsReadHalf, event_tx: mpsc::Sender<TransportEvent>) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                trace!("Transport stream ended");
                break;
            }
            Ok(n) => {
                trace!("<-- read {n} bytes");
                if event_tx
                    .send(TransportEvent::DataReceived(Bytes::copy_from_slice(
                        &chunk[..n],
                    )))
                    .await
                    .is_err()
                {
                    debug!("Event receiver dropped, closing read pump");
                    return;
                }
            }
            Err(e) => {
                error!("Error reading from socket: {e}");
                break;
            }
        }
    }
    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
