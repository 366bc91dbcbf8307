//! Hosted store over the Supabase REST interface (PostgREST)
//!
//! Leads go to one table, analytics batches to another. Both are plain
//! inserts with `Prefer: return=minimal`; nothing is read back.

use crate::analytics::AnalyticsEvent;
use crate::runtime::{AnalyticsSink, LeadPersister, SinkError};
use crate::state_machine::Lead;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// The page is going away; a beacon that takes longer is pointless
const BEACON_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub leads_table: String,
    pub events_table: String,
}

/// Lead persister and analytics sink backed by Supabase
pub struct SupabaseClient {
    client: Client,
    beacon_client: Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let beacon_client = Client::builder().timeout(BEACON_TIMEOUT).build()?;
        Ok(Self {
            client,
            beacon_client,
            config,
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.config.url.trim_end_matches('/'))
    }

    async fn insert(&self, client: &Client, table: &str, body: &Value) -> Result<(), SinkError> {
        let response = client
            .post(self.endpoint(table))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// One row per event. Every row carries every column (nulls included)
/// because a bulk insert takes its column list from the rows.
fn event_rows(events: &[AnalyticsEvent]) -> Value {
    events
        .iter()
        .map(|event| {
            json!({
                "session_id": event.session_id,
                "event_type": event.event_type.as_str(),
                "step_id": event.step_id,
                "step_number": event.step_number,
                "step_value": event.step_value,
                "time_on_step_ms": event.time_on_step_ms,
                "session_duration_ms": event.session_duration_ms,
                "user_type": event.user_type,
                "source": event.source,
                "created_at": event.created_at.to_rfc3339(),
            })
        })
        .collect()
}

#[async_trait]
impl LeadPersister for SupabaseClient {
    async fn persist(&self, lead: &Lead) -> Result<(), SinkError> {
        self.insert(&self.client, &self.config.leads_table, &lead.to_record())
            .await
    }
}

#[async_trait]
impl AnalyticsSink for SupabaseClient {
    async fn send_batch(
        &self,
        _session_id: &str,
        events: &[AnalyticsEvent],
    ) -> Result<(), SinkError> {
        self.insert(&self.client, &self.config.events_table, &event_rows(events))
            .await
    }

    async fn send_beacon(&self, session_id: &str, events: &[AnalyticsEvent]) {
        let rows = event_rows(events);
        if let Err(e) = self
            .insert(&self.beacon_client, &self.config.events_table, &rows)
            .await
        {
            tracing::debug!(session_id = %session_id, error = %e, "Beacon delivery failed");
        }
    }
}
