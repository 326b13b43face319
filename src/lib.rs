// Library interface for salesrace
// The binary wires these into the leaderboard window, integration tests drive them directly

pub mod bootstrap;
pub mod errors;
pub mod race;
pub mod render;
pub mod roster;
pub mod session;
pub mod stimulus;

// Re-export commonly used types
pub use errors::SalesRaceError;
pub use race::{Race, RaceCommand, RaceSettings, RaceSummary};
pub use render::{LiveOutput, RenderLoop, TrackFrame, TrackRenderer};
pub use roster::{Competitor, ProgressEvent, Quota, RosterSnapshot, RosterStore};
pub use session::{ConnectivityState, SessionController};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5177/api";
pub const HUB_PATH: &str = "salesHub";

/// Join an endpoint path onto the api base url.
pub fn api_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
