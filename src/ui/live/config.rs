use std::{path::Path, time::Duration};

use egui::Pos2;
use serde::{Deserialize, Serialize};

use salesrace::{
    DEFAULT_BASE_URL, HUB_PATH, Quota, RaceSettings, SalesRaceError, api_url,
    race::{DEFAULT_BOOTSTRAP_ATTEMPTS, DEFAULT_BOOTSTRAP_RETRY_MS, DEFAULT_CONNECT_RETRY_MS},
    render::DEFAULT_REFRESH_RATE_MS,
    roster::projector::DEFAULT_QUOTA,
    session::{
        HubConfig,
        signalr::{DEFAULT_KEEP_ALIVE_MS, DEFAULT_RECONNECT_DELAYS_MS, DEFAULT_SERVER_TIMEOUT_MS},
    },
};

const APP_DIR_NAME: &str = "salesrace";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct WindowPosition {
    pub(crate) x: f32,
    pub(crate) y: f32,
}

impl Default for WindowPosition {
    fn default() -> Self {
        Self { x: 0., y: 0. }
    }
}

impl From<WindowPosition> for Pos2 {
    fn from(value: WindowPosition) -> Self {
        Pos2::new(value.x, value.y)
    }
}

impl From<Pos2> for WindowPosition {
    fn from(value: Pos2) -> Self {
        Self {
            x: value.x,
            y: value.y,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) base_url: String,
    pub(crate) quota: f64,
    pub(crate) refresh_rate_ms: u64,
    pub(crate) bootstrap_attempts: u32,
    pub(crate) bootstrap_retry_ms: u64,
    pub(crate) connect_retry_ms: Option<u64>,
    pub(crate) reconnect_delays_ms: Vec<u64>,
    pub(crate) keep_alive_ms: u64,
    pub(crate) server_timeout_ms: u64,
    pub(crate) skip_negotiation: bool,
    pub(crate) show_roster: bool,
    pub(crate) window_position: WindowPosition,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            quota: DEFAULT_QUOTA,
            refresh_rate_ms: DEFAULT_REFRESH_RATE_MS,
            bootstrap_attempts: DEFAULT_BOOTSTRAP_ATTEMPTS,
            bootstrap_retry_ms: DEFAULT_BOOTSTRAP_RETRY_MS,
            connect_retry_ms: Some(DEFAULT_CONNECT_RETRY_MS),
            reconnect_delays_ms: DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            server_timeout_ms: DEFAULT_SERVER_TIMEOUT_MS,
            skip_negotiation: false,
            show_roster: true,
            window_position: WindowPosition::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config saved by a previous run, `None` if there is none yet.
    pub(crate) fn from_local_file() -> Result<Option<Self>, SalesRaceError> {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(None);
        };
        let config_path = config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Self::from_file(&config_path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub(crate) fn from_file(path: &Path) -> Result<Self, SalesRaceError> {
        let file =
            std::fs::File::open(path).map_err(|e| SalesRaceError::ConfigIOError { source: e })?;
        serde_json::from_reader(file).map_err(|e| SalesRaceError::ConfigSerializeError { source: e })
    }

    pub(crate) fn save(&self) -> Result<(), SalesRaceError> {
        let config_path = dirs::config_dir()
            .ok_or(SalesRaceError::NoConfigDir)?
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME);
        self.save_to(&config_path)
    }

    pub(crate) fn save_to(&self, path: &Path) -> Result<(), SalesRaceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SalesRaceError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(path)
            .map_err(|e| SalesRaceError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| SalesRaceError::ConfigSerializeError { source: e })
    }

    pub(crate) fn race_settings(&self) -> Result<RaceSettings, SalesRaceError> {
        Ok(RaceSettings {
            quota: Quota::new(self.quota)?,
            refresh_rate: Duration::from_millis(self.refresh_rate_ms),
            bootstrap_attempts: self.bootstrap_attempts,
            bootstrap_retry: Duration::from_millis(self.bootstrap_retry_ms),
            connect_retry: self.connect_retry_ms.map(Duration::from_millis),
        })
    }

    pub(crate) fn hub_config(&self) -> Result<HubConfig, SalesRaceError> {
        Ok(HubConfig::new(&api_url(&self.base_url, HUB_PATH))?
            .with_reconnect_delays(
                self.reconnect_delays_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
            )
            .with_keep_alive_interval(Duration::from_millis(self.keep_alive_ms))
            .with_server_timeout(Duration::from_millis(self.server_timeout_ms))
            .with_skip_negotiation(self.skip_negotiation))
    }
}
