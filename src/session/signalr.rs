//! SignalR hub client over websockets.
//!
//! [`HubConnection`] is a thin handle around a background connection task. The task opens the
//! connection, forwards hub invocations, keeps the connection alive and reconnects on its own
//! when the transport drops. Everything it observes reaches the session controller as a
//! [`ChannelSignal`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use serde::Deserialize;
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use crate::SalesRaceError;

use super::{
    channel::{ChannelSignal, PushChannel},
    protocol::{self, HubMessage, RecordBuffer},
};

pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2000, 10000, 30000];
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 15000;
pub const DEFAULT_SERVER_TIMEOUT_MS: u64 = 30000;
const MIN_KEEP_ALIVE: Duration = Duration::from_millis(100);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub hub_url: Url,
    /// Wait before each reconnect attempt. The connection gives up once every delay was used.
    pub reconnect_delays: Vec<Duration>,
    pub keep_alive_interval: Duration,
    /// Silence from the server longer than this counts as a dropped transport.
    pub server_timeout: Duration,
    /// Connect the websocket straight away instead of negotiating a connection token first.
    pub skip_negotiation: bool,
}

impl HubConfig {
    pub fn new(hub_url: &str) -> Result<Self, SalesRaceError> {
        let url = Url::parse(hub_url).map_err(|e| SalesRaceError::InvalidHubUrl {
            url: hub_url.to_string(),
            reason: e.to_string(),
        })?;
        // fail early on schemes the websocket transport cannot use
        websocket_url(&url, None)?;

        Ok(Self {
            hub_url: url,
            reconnect_delays: DEFAULT_RECONNECT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            keep_alive_interval: Duration::from_millis(DEFAULT_KEEP_ALIVE_MS),
            server_timeout: Duration::from_millis(DEFAULT_SERVER_TIMEOUT_MS),
            skip_negotiation: false,
        })
    }

    pub fn with_reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays = delays;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval.max(MIN_KEEP_ALIVE);
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn with_skip_negotiation(mut self, skip_negotiation: bool) -> Self {
        self.skip_negotiation = skip_negotiation;
        self
    }
}

pub struct HubConnection {
    config: HubConfig,
    http: reqwest::Client,
    signals: Option<UnboundedReceiver<ChannelSignal>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HubConnection {
    pub fn new(config: HubConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            signals: None,
            shutdown: None,
            task: None,
        }
    }
}

impl PushChannel for HubConnection {
    fn start(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.task = Some(tokio::spawn(connection_loop(
            self.config.clone(),
            self.http.clone(),
            signal_tx,
            shutdown_rx,
        )));
        self.signals = Some(signal_rx);
        self.shutdown = Some(shutdown_tx);
    }

    async fn next_signal(&mut self) -> ChannelSignal {
        if let Some(signals) = self.signals.as_mut() {
            if let Some(signal) = signals.recv().await {
                return signal;
            }
            // the connection task is gone, nothing else will arrive
            self.signals = None;
        }
        std::future::pending().await
    }

    async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        // no signal may be observed once stop returns
        self.signals = None;

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!("Hub connection task failed: {}", join_err),
                Err(_) => {
                    warn!("Hub connection did not close within {:?}, aborting", SHUTDOWN_TIMEOUT);
                    task.abort();
                }
            }
        }
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct TransportEnd {
    reason: Option<String>,
    allow_reconnect: bool,
}

impl TransportEnd {
    fn dropped(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            allow_reconnect: true,
        }
    }
}

async fn connection_loop(
    config: HubConfig,
    http: reqwest::Client,
    signals: UnboundedSender<ChannelSignal>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        _ = &mut shutdown => return,
        opened = HubTransport::open(&config, &http) => opened,
    };
    let mut transport = match opened {
        Ok(transport) => {
            info!(
                "Connected to hub {} (connection id {:?})",
                config.hub_url, transport.connection_id
            );
            let _ = signals.send(ChannelSignal::Opened {
                connection_id: transport.connection_id.clone(),
            });
            transport
        }
        Err(e) => {
            let _ = signals.send(ChannelSignal::OpenFailed {
                reason: e.to_string(),
            });
            return;
        }
    };

    loop {
        let ended = tokio::select! {
            _ = &mut shutdown => {
                transport.close().await;
                return;
            }
            ended = transport.pump(&config, &signals) => ended,
        };

        warn!("Hub transport lost: {:?}", ended.reason);
        let _ = signals.send(ChannelSignal::Dropped {
            reason: ended.reason.clone(),
        });
        if !ended.allow_reconnect {
            let _ = signals.send(ChannelSignal::GaveUp {
                reason: ended.reason,
            });
            return;
        }

        match reconnect(&config, &http, &mut shutdown).await {
            Some(Ok(restored)) => {
                info!(
                    "Reconnected to hub (connection id {:?})",
                    restored.connection_id
                );
                let _ = signals.send(ChannelSignal::Restored {
                    connection_id: restored.connection_id.clone(),
                });
                transport = restored;
            }
            Some(Err(reason)) => {
                let _ = signals.send(ChannelSignal::GaveUp {
                    reason: Some(reason),
                });
                return;
            }
            None => return,
        }
    }
}

/// Run through the reconnect delays. `None` means shutdown was requested meanwhile.
async fn reconnect(
    config: &HubConfig,
    http: &reqwest::Client,
    shutdown: &mut oneshot::Receiver<()>,
) -> Option<Result<HubTransport, String>> {
    let mut last_error = None;
    for (attempt, delay) in config.reconnect_delays.iter().enumerate() {
        tokio::select! {
            _ = &mut *shutdown => return None,
            _ = tokio::time::sleep(*delay) => {}
        }

        debug!(
            "Hub reconnect attempt {} of {}",
            attempt + 1,
            config.reconnect_delays.len()
        );
        let opened = tokio::select! {
            _ = &mut *shutdown => return None,
            opened = HubTransport::open(config, http) => opened,
        };
        match opened {
            Ok(transport) => return Some(Ok(transport)),
            Err(e) => {
                warn!("Hub reconnect attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e.to_string());
            }
        }
    }
    Some(Err(last_error
        .unwrap_or_else(|| "reconnecting is disabled".to_string())))
}

struct HubTransport {
    socket: HubSocket,
    connection_id: Option<String>,
    records: RecordBuffer,
    /// Records that arrived in the same frame as the handshake response.
    backlog: Vec<String>,
}

impl HubTransport {
    async fn open(config: &HubConfig, http: &reqwest::Client) -> Result<Self, SalesRaceError> {
        let (url, connection_id) = if config.skip_negotiation {
            (websocket_url(&config.hub_url, None)?, None)
        } else {
            negotiate(config, http).await?
        };

        tokio::time::timeout(config.server_timeout, Self::handshake(url, connection_id))
            .await
            .map_err(|_| SalesRaceError::HubHandshake {
                reason: format!("no handshake within {:?}", config.server_timeout),
            })?
    }

    async fn handshake(url: Url, connection_id: Option<String>) -> Result<Self, SalesRaceError> {
        let (mut socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        socket
            .send(Message::Text(protocol::handshake_request().into()))
            .await?;

        let mut records = RecordBuffer::default();
        while let Some(frame) = socket.next().await {
            match frame? {
                Message::Text(text) => {
                    let mut complete = records.push(text.as_str());
                    if complete.is_empty() {
                        continue;
                    }
                    let response = complete.remove(0);
                    protocol::parse_handshake_response(&response)?;
                    return Ok(Self {
                        socket,
                        connection_id,
                        records,
                        backlog: complete,
                    });
                }
                Message::Close(frame) => {
                    return Err(SalesRaceError::HubHandshake {
                        reason: format!("server closed the websocket: {:?}", frame),
                    });
                }
                _ => {}
            }
        }
        Err(SalesRaceError::HubHandshake {
            reason: "websocket ended before the handshake completed".to_string(),
        })
    }

    /// Forward hub messages until the transport ends.
    async fn pump(
        &mut self,
        config: &HubConfig,
        signals: &UnboundedSender<ChannelSignal>,
    ) -> TransportEnd {
        for record in std::mem::take(&mut self.backlog) {
            if let Some(end) = dispatch_record(&record, signals) {
                return end;
            }
        }

        let mut keep_alive = keep_alive_timer(config.keep_alive_interval);
        let mut deadline = Instant::now() + config.server_timeout;

        loop {
            tokio::select! {
                frame = self.socket.next() => {
                    deadline = Instant::now() + config.server_timeout;
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            for record in self.records.push(text.as_str()) {
                                if let Some(end) = dispatch_record(&record, signals) {
                                    return end;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return TransportEnd::dropped(format!(
                                "server closed the websocket: {:?}",
                                frame
                            ));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return TransportEnd::dropped(e.to_string()),
                        None => return TransportEnd::dropped("websocket stream ended"),
                    }
                }
                _ = keep_alive.tick() => {
                    if let Err(e) = self
                        .socket
                        .send(Message::Text(protocol::ping_message().into()))
                        .await
                    {
                        return TransportEnd::dropped(format!("keep alive failed: {}", e));
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return TransportEnd::dropped(format!(
                        "no message from the server within {:?}",
                        config.server_timeout
                    ));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("Error while closing the hub websocket: {}", e);
        }
    }
}

/// Forward one record. Returns how the transport ended if the record was a close message.
fn dispatch_record(record: &str, signals: &UnboundedSender<ChannelSignal>) -> Option<TransportEnd> {
    match protocol::parse_message(record) {
        Ok(HubMessage::Invocation { target, arguments }) => {
            let _ = signals.send(ChannelSignal::Invocation { target, arguments });
            None
        }
        Ok(HubMessage::Ping) => None,
        Ok(HubMessage::Close {
            error,
            allow_reconnect,
        }) => Some(TransportEnd {
            reason: Some(error.unwrap_or_else(|| "server closed the hub connection".to_string())),
            allow_reconnect,
        }),
        Ok(HubMessage::Other { kind }) => {
            debug!("Ignoring hub message of type {}", kind);
            None
        }
        Err(e) => {
            warn!("Dropping hub record: {}", e);
            None
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    connection_token: Option<String>,
    #[serde(default)]
    available_transports: Vec<AvailableTransport>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct AvailableTransport {
    transport: String,
}

async fn negotiate(
    config: &HubConfig,
    http: &reqwest::Client,
) -> Result<(Url, Option<String>), SalesRaceError> {
    let mut negotiate_url = config.hub_url.clone();
    let path = format!("{}/negotiate", negotiate_url.path().trim_end_matches('/'));
    negotiate_url.set_path(&path);
    negotiate_url
        .query_pairs_mut()
        .append_pair("negotiateVersion", "1");

    let response = http
        .post(negotiate_url)
        .send()
        .await
        .map_err(|e| SalesRaceError::NegotiateRequest { source: e })?;
    if !response.status().is_success() {
        return Err(SalesRaceError::NegotiateRejected {
            reason: format!("status {}", response.status()),
        });
    }
    let negotiated: NegotiateResponse = response
        .json()
        .await
        .map_err(|e| SalesRaceError::NegotiateRequest { source: e })?;

    if let Some(reason) = negotiated.error {
        return Err(SalesRaceError::NegotiateRejected { reason });
    }
    if let Some(redirect) = negotiated.url {
        return Err(SalesRaceError::NegotiateRejected {
            reason: format!("redirect to {redirect} is not supported"),
        });
    }
    if !negotiated.available_transports.is_empty()
        && !negotiated
            .available_transports
            .iter()
            .any(|t| t.transport == "WebSockets")
    {
        return Err(SalesRaceError::NegotiateRejected {
            reason: "the hub does not offer websockets".to_string(),
        });
    }

    let token = negotiated
        .connection_token
        .or_else(|| negotiated.connection_id.clone());
    let url = websocket_url(&config.hub_url, token.as_deref())?;
    Ok((url, negotiated.connection_id))
}

fn websocket_url(hub_url: &Url, connection_token: Option<&str>) -> Result<Url, SalesRaceError> {
    let scheme = match hub_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SalesRaceError::InvalidHubUrl {
                url: hub_url.to_string(),
                reason: format!("unsupported scheme {other}"),
            });
        }
    };

    let mut url = hub_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| SalesRaceError::InvalidHubUrl {
            url: hub_url.to_string(),
            reason: format!("cannot switch to {scheme}"),
        })?;
    if let Some(token) = connection_token {
        url.query_pairs_mut().append_pair("id", token);
    }
    Ok(url)
}

/// First ping one period after the handshake. A stalled task sends a single late ping.
fn keep_alive_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_does_not_burst_after_stall() {
        let period = Duration::from_secs(15);
        let mut timer = keep_alive_timer(period);
        assert_eq!(timer.missed_tick_behavior(), MissedTickBehavior::Delay);

        tokio::time::advance(Duration::from_secs(50)).await;
        timer.tick().await;
        let resumed = Instant::now();
        timer.tick().await;

        assert_eq!(Instant::now() - resumed, period);
    }

    #[test]
    fn test_websocket_url() {
        let hub = Url::parse("http://localhost:5177/api/salesHub").unwrap();
        assert_eq!(
            websocket_url(&hub, Some("abc")).unwrap().as_str(),
            "ws://localhost:5177/api/salesHub?id=abc"
        );

        let secure = Url::parse("https://example.com/api/salesHub").unwrap();
        assert_eq!(
            websocket_url(&secure, None).unwrap().as_str(),
            "wss://example.com/api/salesHub"
        );
    }

    #[test]
    fn test_hub_config_rejects_bad_urls() {
        assert!(HubConfig::new("not a url").is_err());
        assert!(HubConfig::new("ftp://localhost/salesHub").is_err());

        let config = HubConfig::new("http://localhost:5177/api/salesHub").unwrap();
        assert_eq!(config.reconnect_delays.len(), DEFAULT_RECONNECT_DELAYS_MS.len());
        assert!(!config.skip_negotiation);
    }

    #[test]
    fn test_close_record_ends_transport() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let end = dispatch_record(r#"{"type":7,"error":"bye","allowReconnect":false}"#, &tx)
            .expect("close ends the transport");
        assert_eq!(end.reason.as_deref(), Some("bye"));
        assert!(!end.allow_reconnect);

        assert!(dispatch_record(r#"{"type":6}"#, &tx).is_none());
        assert!(dispatch_record("garbage", &tx).is_none());
        assert!(rx.try_recv().is_err());
    }
}
