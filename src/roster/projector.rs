use std::f64::consts::TAU;

use crate::SalesRaceError;

use super::{CompetitorId, RosterSnapshot};

pub const DEFAULT_QUOTA: f64 = 30000.;
/// Radius of the racing line, halfway across the 80..120 track band.
pub const TRACK_RADIUS: f64 = 100.;
pub const TRACK_INNER_RADIUS: f64 = 80.;
pub const TRACK_OUTER_RADIUS: f64 = 120.;

const MILESTONE_FRACTIONS: [f64; 4] = [0.25, 0.5, 0.75, 1.];

/// The sales target that counts as one full lap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quota(f64);

impl Quota {
    pub fn new(value: f64) -> Result<Self, SalesRaceError> {
        if value.is_finite() && value > 0. {
            Ok(Self(value))
        } else {
            Err(SalesRaceError::InvalidQuota { quota: value })
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// `progress / quota` clamped to `[0, 1]`. Anything that is not a number counts as no progress.
    pub fn normalize(&self, progress: f64) -> f64 {
        let ratio = progress / self.0;
        if ratio.is_nan() {
            return 0.;
        }
        ratio.clamp(0., 1.)
    }

    /// Share of the quota reached, as displayed in the standings.
    pub fn percent(&self, progress: f64) -> f64 {
        self.normalize(progress) * 100.
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self(DEFAULT_QUOTA)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackCoordinate {
    pub x: f64,
    pub y: f64,
    /// Radians travelled from the start line, `0..=2π`.
    pub angle: f64,
}

impl TrackCoordinate {
    pub fn at(normalized_progress: f64) -> Self {
        let angle = normalized_progress * TAU;
        Self {
            x: angle.cos() * TRACK_RADIUS,
            y: angle.sin() * TRACK_RADIUS,
            angle,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedPosition {
    pub competitor_id: CompetitorId,
    pub normalized_progress: f64,
    pub coordinate: TrackCoordinate,
}

/// Map every competitor of the snapshot onto the track, in snapshot order.
///
/// Placement depends on progress only, so competitors with the same progress end up on the
/// same spot. Separating them is up to whoever draws the frame.
pub fn project(snapshot: &RosterSnapshot, quota: Quota) -> Vec<ProjectedPosition> {
    snapshot
        .iter()
        .map(|competitor| {
            let normalized_progress = quota.normalize(competitor.cumulative_progress);
            ProjectedPosition {
                competitor_id: competitor.id,
                normalized_progress,
                coordinate: TrackCoordinate::at(normalized_progress),
            }
        })
        .collect()
}

/// A labelled marker along the track.
#[derive(Clone, Debug, PartialEq)]
pub struct Milestone {
    pub fraction: f64,
    pub label: String,
    pub coordinate: TrackCoordinate,
}

/// Quarter, half, three quarter and finish markers, labelled in thousands (`$7.5K`).
pub fn milestones(quota: Quota) -> Vec<Milestone> {
    MILESTONE_FRACTIONS
        .iter()
        .map(|&fraction| Milestone {
            fraction,
            label: format!("${:.1}K", quota.value() * fraction / 1000.),
            coordinate: TrackCoordinate::at(fraction),
        })
        .collect()
}
