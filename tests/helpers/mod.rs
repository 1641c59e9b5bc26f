#![allow(dead_code)] // Test helpers appear unused when compiled independently

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use logtail::{LogRecord, MessageType};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use tokio_util::either::Either;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// What the aggregator saw in the upgrade request.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub authorization: Option<String>,
}

/// Single-connection WebSocket peer standing in for the log aggregator.
///
/// Sends its frames right after the upgrade, then holds the connection open
/// until `close()` (or `stop()`) is called.
pub struct FakeAggregator {
    pub endpoint: String,
    handshake_rx: Option<oneshot::Receiver<Handshake>>,
    received: mpsc::UnboundedReceiver<Message>,
    close_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl FakeAggregator {
    pub async fn handshake(&mut self) -> Handshake {
        let rx = self
            .handshake_rx
            .take()
            .expect("handshake already consumed");
        within(rx)
            .await
            .expect("aggregator task ended before the handshake")
    }

    /// Next message written by the client, if one arrives in time.
    pub async fn next_received(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send a close frame to the client.
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Close and wait briefly for the server task; abort it if the client
    /// never connected.
    pub async fn stop(mut self) {
        self.close();
        if tokio::time::timeout(Duration::from_millis(500), &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
    }
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// A loopback address nothing is listening on.
pub async fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

pub async fn spawn_fake_aggregator(frames: Vec<Vec<u8>>) -> FakeAggregator {
    spawn_aggregator(frames, None).await
}

/// Same as [`spawn_fake_aggregator`] but behind TLS with a self-signed
/// `localhost` certificate.
pub async fn spawn_tls_fake_aggregator(frames: Vec<Vec<u8>>) -> FakeAggregator {
    spawn_aggregator(frames, Some(tls_acceptor())).await
}

fn tls_acceptor() -> TlsAcceptor {
    let cert = CertificateDer::from(include_bytes!("../fixtures/localhost.cert.der").to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        include_bytes!("../fixtures/localhost.key.der").to_vec(),
    ));
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .expect("fixture certificate");
    TlsAcceptor::from(Arc::new(config))
}

async fn spawn_aggregator(frames: Vec<Vec<u8>>, tls: Option<TlsAcceptor>) -> FakeAggregator {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind fake aggregator");
    let endpoint = listener.local_addr().unwrap().to_string();

    let (handshake_tx, handshake_rx) = oneshot::channel();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let stream = match &tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => Either::Right(stream),
                Err(e) => {
                    eprintln!("fake aggregator tls accept failed: {}", e);
                    return;
                }
            },
            None => Either::Left(stream),
        };
        serve(stream, frames, handshake_tx, received_tx, close_rx).await;
    });

    FakeAggregator {
        endpoint,
        handshake_rx: Some(handshake_rx),
        received,
        close_tx: Some(close_tx),
        handle,
    }
}

async fn serve<S>(
    stream: S,
    frames: Vec<Vec<u8>>,
    handshake_tx: oneshot::Sender<Handshake>,
    received_tx: mpsc::UnboundedSender<Message>,
    close_rx: oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let _ = handshake_tx.send(Handshake {
            uri: req.uri().to_string(),
            authorization,
        });
        Ok(resp)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("fake aggregator handshake failed: {}", e);
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            let done = msg.is_close();
            let _ = received_tx.send(msg);
            if done {
                break;
            }
        }
    });

    for frame in frames {
        if sink.send(Message::Binary(frame)).await.is_err() {
            return;
        }
    }

    let _ = close_rx.await;
    let _ = sink.close().await;
    let _ = tokio::time::timeout(WAIT, reader).await;
}

/// Aggregator that upgrades, sends `frames`, then drops the TCP connection
/// without a close frame. Returns its endpoint.
pub async fn spawn_vanishing_aggregator(frames: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind vanishing aggregator");
    let endpoint = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        for frame in frames {
            if ws.send(Message::Binary(frame)).await.is_err() {
                return;
            }
        }
        drop(ws);
    });

    endpoint
}

/// HTTP CONNECT proxy that tunnels to whatever target it is asked for.
pub struct FakeProxy {
    pub address: String,
    targets: mpsc::UnboundedReceiver<String>,
    handle: JoinHandle<()>,
}

impl FakeProxy {
    /// Target authority of the next CONNECT request.
    pub async fn next_target(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.targets.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Spawn a CONNECT proxy. With `allow = false` every request gets a 403.
pub async fn spawn_fake_proxy(allow: bool) -> FakeProxy {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind fake proxy");
    let address = listener.local_addr().unwrap().to_string();
    let (targets_tx, targets) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        while let Ok((client, _)) = listener.accept().await {
            let targets_tx = targets_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = tunnel(client, allow, targets_tx).await {
                    eprintln!("fake proxy error: {}", e);
                }
            });
        }
    });

    FakeProxy {
        address,
        targets,
        handle,
    }
}

async fn tunnel(
    mut client: TcpStream,
    allow: bool,
    targets_tx: mpsc::UnboundedSender<String>,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(client.read_u8().await?);
    }
    let head = String::from_utf8_lossy(&head);
    let target = head
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("CONNECT "))
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    let _ = targets_tx.send(target.clone());

    if !allow {
        client
            .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
            .await?;
        return Ok(());
    }

    let mut upstream = TcpStream::connect(target.as_str()).await?;
    client
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

/// Encode a well-formed frame carrying `payload`.
pub fn log_frame(payload: &str) -> Vec<u8> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64;
    LogRecord {
        payload: Bytes::from(payload.to_string()),
        app_id: "my-app-guid".to_string(),
        message_type: MessageType::Out,
        source_name: "DEA".to_string(),
        source_id: None,
        timestamp,
    }
    .to_frame()
}

/// Await `fut`, panicking if it takes longer than [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}
