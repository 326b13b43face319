pub mod projector;
pub mod standings;

use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::SalesRaceError;

pub use projector::{ProjectedPosition, Quota, TrackCoordinate, project};
pub use standings::{Standing, standings};

pub type CompetitorId = i64;

/// One sales person on the leaderboard.
///
/// Records are created the first time an id shows up, either in the bootstrap payload or in a
/// progress event, and are never removed while a session is running. Competitors first seen
/// through an event carry no `display_name` or `group` until a bootstrap provides them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub id: CompetitorId,
    pub display_name: Option<String>,
    pub group: Option<String>,
    /// Cumulative sales. Non-negative in practice, but nothing here relies on it growing.
    pub cumulative_progress: f64,
}

impl Competitor {
    pub fn new(
        id: CompetitorId,
        display_name: impl Into<String>,
        group: impl Into<String>,
        cumulative_progress: f64,
    ) -> Self {
        Self {
            id,
            display_name: Some(display_name.into()),
            group: Some(group.into()),
            cumulative_progress,
        }
    }

    fn unnamed(id: CompetitorId, cumulative_progress: f64) -> Self {
        Self {
            id,
            display_name: None,
            group: None,
            cumulative_progress,
        }
    }
}

/// An incremental update from the push channel.
///
/// `new_cumulative_progress` is an absolute running total, not a delta. The stimulus endpoint
/// posts per-transaction amounts while the hub broadcasts the value the store should hold;
/// which of the two the backend really sends is an open question, merge treats it as absolute.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEvent {
    pub competitor_id: CompetitorId,
    pub new_cumulative_progress: f64,
}

/// What a merge did to the roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
}

/// An immutable view of the roster, in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterSnapshot {
    competitors: Arc<[Competitor]>,
}

impl RosterSnapshot {
    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Competitor> {
        self.competitors.iter()
    }

    pub fn get(&self, id: CompetitorId) -> Option<&Competitor> {
        self.competitors.iter().find(|c| c.id == id)
    }

    pub fn as_slice(&self) -> &[Competitor] {
        &self.competitors
    }
}

impl<'a> IntoIterator for &'a RosterSnapshot {
    type Item = &'a Competitor;
    type IntoIter = std::slice::Iter<'a, Competitor>;

    fn into_iter(self) -> Self::IntoIter {
        self.competitors.iter()
    }
}

/// Canonical mapping from competitor id to the latest known record.
///
/// The store has a single writer: `bootstrap` fills it once, `merge` applies progress events.
/// Readers only ever see [`RosterSnapshot`]s.
#[derive(Debug, Default)]
pub struct RosterStore {
    competitors: Vec<Competitor>,
    index: HashMap<CompetitorId, usize>,
    merged_events: u64,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole roster with the bootstrap payload.
    ///
    /// # Errors
    ///
    /// Returns [`SalesRaceError::BootstrapAfterMerge`] if progress events were merged since the
    /// last bootstrap or [`reset`](Self::reset). The roster is left as it was in that case.
    pub fn bootstrap(&mut self, competitors: Vec<Competitor>) -> Result<(), SalesRaceError> {
        if self.merged_events > 0 {
            return Err(SalesRaceError::BootstrapAfterMerge {
                merged: self.merged_events,
            });
        }

        self.competitors.clear();
        self.index.clear();
        for competitor in competitors {
            match self.index.get(&competitor.id) {
                Some(&slot) => {
                    warn!(
                        "Duplicate competitor {} in bootstrap payload, keeping the last record",
                        competitor.id
                    );
                    self.competitors[slot] = competitor;
                }
                None => {
                    self.index.insert(competitor.id, self.competitors.len());
                    self.competitors.push(competitor);
                }
            }
        }
        debug!("Roster bootstrapped with {} competitors", self.competitors.len());
        Ok(())
    }

    /// Apply a progress event. Unknown ids are added at the end of the roster.
    pub fn merge(&mut self, event: &ProgressEvent) -> MergeOutcome {
        self.merged_events += 1;
        match self.index.get(&event.competitor_id) {
            Some(&slot) => {
                let competitor = &mut self.competitors[slot];
                if competitor.cumulative_progress == event.new_cumulative_progress {
                    MergeOutcome::Unchanged
                } else {
                    competitor.cumulative_progress = event.new_cumulative_progress;
                    MergeOutcome::Updated
                }
            }
            None => {
                debug!(
                    "Competitor {} first seen through a progress event",
                    event.competitor_id
                );
                self.index
                    .insert(event.competitor_id, self.competitors.len());
                self.competitors.push(Competitor::unnamed(
                    event.competitor_id,
                    event.new_cumulative_progress,
                ));
                MergeOutcome::Created
            }
        }
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            competitors: Arc::from(self.competitors.as_slice()),
        }
    }

    /// Forget every competitor and every merge, allowing a fresh bootstrap.
    pub fn reset(&mut self) {
        self.competitors.clear();
        self.index.clear();
        self.merged_events = 0;
    }

    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }

    pub fn merged_events(&self) -> u64 {
        self.merged_events
    }
}
