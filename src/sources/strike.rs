use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::amount::currency_to_minor_units;
use crate::models::StrikeBalance;

use super::{error_for_response, SourceError};

pub const DEFAULT_BASE_URL: &str = "https://api.strike.me";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    currency: String,
    current: String,
    available: String,
}

/// Balance reader for the Strike custodial API.
pub struct StrikeAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StrikeAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder().timeout(timeout).build()?;

        info!("Initializing Strike adapter with base URL: {}", base_url);
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Per-currency balances in each currency's smallest unit.
    pub async fn balances(&self) -> Result<Vec<StrikeBalance>, SourceError> {
        let url = format!("{}/v1/balances", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response, "balances").await);
        }

        let entries: Vec<BalanceEntry> = response.json().await?;
        debug!("Strike returned {} balances", entries.len());

        entries
            .into_iter()
            .map(|entry| {
                Ok(StrikeBalance {
                    available: currency_to_minor_units(&entry.available, &entry.currency)?,
                    total: currency_to_minor_units(&entry.current, &entry.currency)?,
                    currency: entry.currency,
                })
            })
            .collect()
    }
}
