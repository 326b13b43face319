use log::info;
use reqwest::Client;
use serde::Serialize;

use crate::{SalesRaceError, api_url, roster::CompetitorId};

pub const TRANSACTIONS_PATH: &str = "transactions";

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub sales_person_id: CompetitorId,
    pub amount: f64,
}

/// Posts test transactions so the backend broadcasts a sale. Diagnostic only.
///
/// The amount posted here is a per-transaction increment. What the hub broadcasts back is the
/// value the roster should hold for that person.
#[derive(Clone)]
pub struct StimulusClient {
    client: Client,
    url: String,
}

impl StimulusClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: api_url(base_url, TRANSACTIONS_PATH),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn post(&self, transaction: Transaction) -> Result<(), SalesRaceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&transaction)
            .send()
            .await
            .map_err(|e| SalesRaceError::StimulusRequest { source: e })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SalesRaceError::StimulusStatus {
                status: status.as_u16(),
            });
        }
        info!(
            "Posted test sale of {} for {}",
            transaction.amount, transaction.sales_person_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_wire_format() {
        let body = serde_json::to_value(Transaction {
            sales_person_id: 3,
            amount: 7.,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "salesPersonId": 3, "amount": 7.0 }));
    }

    #[test]
    fn test_transactions_url() {
        let client = StimulusClient::new(Client::new(), "http://localhost:5177/api");
        assert_eq!(client.url(), "http://localhost:5177/api/transactions");
    }
}
