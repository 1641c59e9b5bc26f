//! Connection lifecycle: dial, run the pumps, tear down exactly once.
//!
//! A [`Connection`] moves `Unopened -> Open -> Closed` and never back. `tail`
//! hands out the two output sequences immediately and does the dial on a
//! spawned task. Whatever ends the connection first (explicit `close`, the peer
//! closing, a transport failure) flips the state to `Closed` under a mutex and
//! cancels both pumps; the sequences close once both pumps have stopped.

mod config;
mod dial;
mod pump;

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

pub use config::{
    ConnectionConfig, ProxyConfig, TlsConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ERROR_BUFFER,
    DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_RECORD_BUFFER,
};
pub use pump::KEEPALIVE_FRAME;

use crate::error::{ConnectError, ConsumerError};
use crate::message::LogRecord;
use pump::{report, ReadOutcome};

/// Bound on the close handshake sent after an explicit close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Decoded records, in frame arrival order.
pub type Records = mpsc::Receiver<LogRecord>;
/// Decode failures and at most one terminal error.
pub type Errors = mpsc::Receiver<ConsumerError>;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    /// Dialing or streaming.
    Open,
    Closed,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Unopened,
    Open(CancellationToken),
    Closed,
}

/// The only state shared between `close()` and the pumps.
#[derive(Debug, Default)]
struct Lifecycle {
    state: Mutex<State>,
}

impl Lifecycle {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Unopened -> Open`. Returns the token that cancels this session.
    fn open(&self) -> Option<CancellationToken> {
        let mut state = self.lock();
        match *state {
            State::Unopened => {
                let token = CancellationToken::new();
                *state = State::Open(token.clone());
                Some(token)
            }
            _ => None,
        }
    }

    /// `Open -> Closed`. True only for the caller that performed the transition.
    fn teardown(&self) -> bool {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, State::Closed) {
            State::Open(token) => {
                token.cancel();
                true
            }
            previous => {
                *state = previous;
                false
            }
        }
    }

    fn current(&self) -> ConnectionState {
        match *self.lock() {
            State::Unopened => ConnectionState::Unopened,
            State::Open(_) => ConnectionState::Open,
            State::Closed => ConnectionState::Closed,
        }
    }
}

/// A single-use tail connection to a log aggregator.
///
/// ```no_run
/// # async fn run() {
/// use logtail::Connection;
///
/// let connection = Connection::new("logs.example.com:4443", None, None);
/// let (mut records, mut errors) = connection.tail("app-guid", "bearer token");
/// while let Some(record) = records.recv().await {
///     println!("{}", record.payload_lossy());
/// }
/// while let Some(err) = errors.recv().await {
///     eprintln!("{}", err);
/// }
/// # }
/// ```
pub struct Connection {
    endpoint: String,
    tls: Option<TlsConfig>,
    proxy: Option<ProxyConfig>,
    config: ConnectionConfig,
    lifecycle: Arc<Lifecycle>,
}

impl Connection {
    /// Unopened connection with the production defaults.
    pub fn new(
        endpoint: impl Into<String>,
        tls: Option<TlsConfig>,
        proxy: Option<ProxyConfig>,
    ) -> Self {
        Self::with_config(endpoint, tls, proxy, ConnectionConfig::default())
    }

    pub fn with_config(
        endpoint: impl Into<String>,
        tls: Option<TlsConfig>,
        proxy: Option<ProxyConfig>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls,
            proxy,
            config,
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.current()
    }

    /// Start streaming records for `app_id`.
    ///
    /// Both receivers are returned at once and filled asynchronously. A dial
    /// failure arrives as a single error, after which both close. Must be
    /// called from within a Tokio runtime. Dropping the records receiver ends
    /// the connection.
    pub fn tail(&self, app_id: &str, auth_token: &str) -> (Records, Errors) {
        let (records_tx, records_rx) = mpsc::channel(self.config.record_buffer.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(self.config.error_buffer.max(1));

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "tail called outside a Tokio runtime");
                report(&errors_tx, ConnectError::NoRuntime.into());
                return (records_rx, errors_rx);
            }
        };

        let Some(cancel) = self.lifecycle.open() else {
            warn!(endpoint = %self.endpoint, "tail called on a connection that was already used");
            report(&errors_tx, ConsumerError::AlreadyStarted);
            return (records_rx, errors_rx);
        };

        let request = match dial::build_request(
            &self.endpoint,
            self.tls.is_some(),
            app_id,
            auth_token,
        ) {
            Ok(request) => request,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "invalid tail request");
                self.lifecycle.teardown();
                report(&errors_tx, e.into());
                return (records_rx, errors_rx);
            }
        };

        let session = Session {
            tls: self.tls.clone(),
            proxy: self.proxy.clone(),
            config: self.config.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
            cancel,
            records: records_tx,
            errors: errors_tx,
        };
        let span = info_span!("tail", app_id = %app_id, endpoint = %self.endpoint);
        runtime.spawn(session.run(request).instrument(span));

        (records_rx, errors_rx)
    }

    /// Tear down the transport, stopping both pumps and closing both sequences.
    ///
    /// Returns [`ConsumerError::NotOpen`] when there is no active transport,
    /// including after the connection has already ended.
    pub fn close(&self) -> Result<(), ConsumerError> {
        if self.lifecycle.teardown() {
            debug!(endpoint = %self.endpoint, "connection closed by caller");
            Ok(())
        } else {
            Err(ConsumerError::NotOpen)
        }
    }
}

/// Everything the spawned connection task owns. Dropping it closes both
/// output sequences.
struct Session {
    tls: Option<TlsConfig>,
    proxy: Option<ProxyConfig>,
    config: ConnectionConfig,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    records: mpsc::Sender<LogRecord>,
    errors: mpsc::Sender<ConsumerError>,
}

impl Session {
    async fn run(self, request: Request) {
        let url = request.uri().to_string();
        let connect_timeout = self.config.connect_timeout;
        debug!(%url, "dialing");

        let dialed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("closed while dialing");
                return;
            }
            dialed = timeout(
                connect_timeout,
                dial::dial(request, self.tls.as_ref(), self.proxy.as_ref()),
            ) => dialed,
        };

        let transport = match dialed {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return self.fail_connect(e),
            Err(_) => return self.fail_connect(ConnectError::Timeout(connect_timeout)),
        };
        info!(%url, "connected");

        let (sink, stream) = transport.split();
        self.pump(sink, stream).await;
    }

    /// Run both pumps over an established transport until teardown.
    async fn pump<Si, St>(self, sink: Si, stream: St)
    where
        Si: Sink<Message, Error = tungstenite::Error> + Send + Unpin + 'static,
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let keepalive = {
            let lifecycle = Arc::clone(&self.lifecycle);
            let cancel = self.cancel.clone();
            let period = self.config.keepalive_interval;
            tokio::spawn(
                async move {
                    let result = pump::keepalive_pump(sink, period, cancel).await;
                    if let Err(e) = &result {
                        warn!(error = %e, "keepalive write failed");
                        lifecycle.teardown();
                    }
                    result
                }
                .in_current_span(),
            )
        };

        let outcome = pump::read_pump(stream, &self.records, &self.errors, &self.cancel).await;
        self.lifecycle.teardown();

        match keepalive.await {
            Ok(Ok(mut sink)) => match outcome {
                ReadOutcome::Cancelled | ReadOutcome::ConsumerGone => {
                    match timeout(CLOSE_TIMEOUT, sink.close()).await {
                        Ok(Ok(())) => debug!("close frame sent"),
                        Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
                        Err(_) => debug!("close handshake timed out"),
                    }
                }
                // Push out the queued reply to the peer's close frame.
                ReadOutcome::PeerClosed => match timeout(CLOSE_TIMEOUT, sink.flush()).await {
                    Ok(Ok(())) => debug!("close reply flushed"),
                    Ok(Err(e)) => debug!(error = %e, "close reply not delivered"),
                    Err(_) => debug!("close reply flush timed out"),
                },
                ReadOutcome::TransportFailed => {}
            },
            Ok(Err(e)) => {
                if outcome == ReadOutcome::Cancelled {
                    report(&self.errors, ConsumerError::Transport(e));
                }
            }
            Err(e) => warn!(error = %e, "keepalive task failed"),
        }

        info!(?outcome, "tail finished");
    }

    fn fail_connect(self, err: ConnectError) {
        warn!(error = %err, "failed to connect");
        if self.lifecycle.teardown() {
            report(&self.errors, err.into());
        }
    }
}
