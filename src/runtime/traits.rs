//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::analytics::AnalyticsEvent;
use crate::db::{Database, DbError};
use crate::state_machine::Lead;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure delivering a lead or an analytics batch
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for completed leads
#[async_trait]
pub trait LeadPersister: Send + Sync {
    /// Store one lead. Called at most once per session.
    async fn persist(&self, lead: &Lead) -> Result<(), SinkError>;
}

/// Destination for analytics batches
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Deliver one session's batch
    async fn send_batch(
        &self,
        session_id: &str,
        events: &[AnalyticsEvent],
    ) -> Result<(), SinkError>;

    /// Best-effort delivery while the visitor is leaving. Never reports
    /// failure; there is nobody left to tell.
    async fn send_beacon(&self, session_id: &str, events: &[AnalyticsEvent]) {
        if let Err(e) = self.send_batch(session_id, events).await {
            tracing::debug!(session_id = %session_id, error = %e, "Beacon delivery failed");
        }
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: LeadPersister + ?Sized> LeadPersister for Arc<T> {
    async fn persist(&self, lead: &Lead) -> Result<(), SinkError> {
        (**self).persist(lead).await
    }
}

#[async_trait]
impl<T: AnalyticsSink + ?Sized> AnalyticsSink for Arc<T> {
    async fn send_batch(
        &self,
        session_id: &str,
        events: &[AnalyticsEvent],
    ) -> Result<(), SinkError> {
        (**self).send_batch(session_id, events).await
    }

    async fn send_beacon(&self, session_id: &str, events: &[AnalyticsEvent]) {
        (**self).send_beacon(session_id, events).await;
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as both sinks
#[derive(Clone)]
pub struct DatabaseSink {
    db: Database,
}

impl DatabaseSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeadPersister for DatabaseSink {
    async fn persist(&self, lead: &Lead) -> Result<(), SinkError> {
        if !self.db.insert_lead(lead)? {
            tracing::warn!(session_id = %lead.session_id, "Lead already stored, ignoring duplicate");
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsSink for DatabaseSink {
    async fn send_batch(
        &self,
        _session_id: &str,
        events: &[AnalyticsEvent],
    ) -> Result<(), SinkError> {
        self.db.insert_events(events)?;
        Ok(())
    }
}
