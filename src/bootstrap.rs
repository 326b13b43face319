use std::collections::VecDeque;

use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{SalesRaceError, api_url, roster::Competitor};

pub const PEOPLE_PATH: &str = "people";

/// Where the initial roster comes from.
#[allow(async_fn_in_trait)]
pub trait RosterSource {
    /// Fetch the full roster. A failure is always an error, never an empty roster.
    async fn load(&mut self) -> Result<Vec<Competitor>, SalesRaceError>;
}

/// A sales person as served by the people endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    pub id: i64,
    pub name: String,
    pub team: String,
    pub curr_sales: f64,
}

impl From<PersonRecord> for Competitor {
    fn from(person: PersonRecord) -> Self {
        Competitor::new(person.id, person.name, person.team, person.curr_sales)
    }
}

pub struct HttpRosterSource {
    client: Client,
    url: String,
}

impl HttpRosterSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: api_url(base_url, PEOPLE_PATH),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RosterSource for HttpRosterSource {
    async fn load(&mut self) -> Result<Vec<Competitor>, SalesRaceError> {
        debug!("Loading roster from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SalesRaceError::BootstrapRequest {
                url: self.url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SalesRaceError::BootstrapStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SalesRaceError::BootstrapRequest {
                url: self.url.clone(),
                source: e,
            })?;
        let people: Vec<PersonRecord> =
            serde_json::from_slice(&body).map_err(|e| SalesRaceError::BootstrapDecode {
                url: self.url.clone(),
                source: e,
            })?;

        info!("Loaded {} competitors from {}", people.len(), self.url);
        Ok(people.into_iter().map(Competitor::from).collect())
    }
}

/// Replays scripted load results, for tests and offline runs.
#[derive(Debug, Default)]
pub struct MockRosterSource {
    results: VecDeque<Result<Vec<Competitor>, String>>,
    loads: usize,
}

impl MockRosterSource {
    pub fn new(results: Vec<Result<Vec<Competitor>, String>>) -> Self {
        Self {
            results: results.into(),
            loads: 0,
        }
    }

    pub fn with_roster(roster: Vec<Competitor>) -> Self {
        Self::new(vec![Ok(roster)])
    }

    pub fn loads(&self) -> usize {
        self.loads
    }
}

impl RosterSource for MockRosterSource {
    async fn load(&mut self) -> Result<Vec<Competitor>, SalesRaceError> {
        self.loads += 1;
        match self.results.pop_front() {
            Some(Ok(roster)) => Ok(roster),
            Some(Err(reason)) => Err(SalesRaceError::BootstrapUnavailable { reason }),
            None => Err(SalesRaceError::BootstrapUnavailable {
                reason: "no more scripted rosters".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_record_maps_to_competitor() {
        let people: Vec<PersonRecord> = serde_json::from_str(
            r#"[{"id":1,"name":"Ada","team":"North","currSales":1250.5}]"#,
        )
        .unwrap();
        let competitor = Competitor::from(people[0].clone());

        assert_eq!(competitor.id, 1);
        assert_eq!(competitor.display_name.as_deref(), Some("Ada"));
        assert_eq!(competitor.group.as_deref(), Some("North"));
        assert_eq!(competitor.cumulative_progress, 1250.5);
    }

    #[test]
    fn test_people_url() {
        let source = HttpRosterSource::new(Client::new(), "http://localhost:5177/api/");
        assert_eq!(source.url(), "http://localhost:5177/api/people");
    }

    #[tokio::test]
    async fn test_mock_source_replays_script() {
        let mut source = MockRosterSource::new(vec![
            Err("down".to_string()),
            Ok(vec![Competitor::new(1, "A", "X", 0.)]),
        ]);

        assert!(matches!(
            source.load().await,
            Err(SalesRaceError::BootstrapUnavailable { .. })
        ));
        assert_eq!(source.load().await.unwrap().len(), 1);
        assert!(source.load().await.is_err());
        assert_eq!(source.loads(), 3);
    }
}
