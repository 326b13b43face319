// Error types for salesrace

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum SalesRaceError {
    // Errors for the roster bootstrap
    #[snafu(display("Roster request to {url} failed"))]
    BootstrapRequest { url: String, source: reqwest::Error },
    #[snafu(display("Roster endpoint {url} answered with status {status}"))]
    BootstrapStatus { url: String, status: u16 },
    #[snafu(display("Roster payload from {url} is malformed"))]
    BootstrapDecode {
        url: String,
        source: serde_json::Error,
    },
    #[snafu(display("Roster source unavailable: {reason}"))]
    BootstrapUnavailable { reason: String },

    // Roster store errors
    #[snafu(display(
        "Roster bootstrap rejected: {merged} progress events were already merged in this session"
    ))]
    BootstrapAfterMerge { merged: u64 },
    #[snafu(display("Invalid quota {quota}, it must be a positive finite amount"))]
    InvalidQuota { quota: f64 },

    // Session and push channel errors
    #[snafu(display("A progress event handler is already registered"))]
    HandlerAlreadyRegistered,
    #[snafu(display("Invalid hub url {url}: {reason}"))]
    InvalidHubUrl { url: String, reason: String },
    #[snafu(display("Hub negotiation failed"))]
    NegotiateRequest { source: reqwest::Error },
    #[snafu(display("Hub negotiation rejected: {reason}"))]
    NegotiateRejected { reason: String },
    #[snafu(display("Hub websocket error"))]
    HubWebSocket {
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[snafu(display("Hub handshake failed: {reason}"))]
    HubHandshake { reason: String },
    #[snafu(display("Malformed hub message: {reason}"))]
    MalformedHubMessage { reason: String },
    #[snafu(display("Malformed progress event: {reason}"))]
    MalformedEvent { reason: String },

    // Errors for the test stimulus
    #[snafu(display("Test sale request failed"))]
    StimulusRequest { source: reqwest::Error },
    #[snafu(display("Test sale rejected with status {status}"))]
    StimulusStatus { status: u16 },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Runtime errors
    #[snafu(display("Could not start the race runtime"))]
    RuntimeError { source: io::Error },
    #[snafu(display("Could not build the http client"))]
    HttpClientError { source: reqwest::Error },
    #[snafu(display("Could not start the leaderboard window: {reason}"))]
    WindowError { reason: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for SalesRaceError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        SalesRaceError::HubWebSocket {
            source: Box::new(value),
        }
    }
}
