//! Subscription index: event type -> subscribed active endpoints.
//!
//! Pure query component. The index is rebuilt from the endpoint table
//! (written by the external administration API) and split into a literal
//! map and a wildcard map so a lookup is O(1) amortized in the number of
//! endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use sdv_db::models::WebhookEndpoint;

use crate::error::WebhookError;

#[derive(Default)]
struct IndexState {
    /// All active endpoints by id.
    endpoints: HashMap<Uuid, Arc<WebhookEndpoint>>,
    /// Literal subscriptions: exact event type -> endpoint ids.
    literal: HashMap<String, Vec<Uuid>>,
    /// Wildcard subscriptions: the prefix of `<prefix>.*` -> endpoint ids.
    wildcard: HashMap<String, Vec<Uuid>>,
}

impl IndexState {
    fn build(endpoints: Vec<WebhookEndpoint>) -> Self {
        let mut state = Self::default();

        for endpoint in endpoints {
            if !endpoint.is_active {
                continue;
            }
            let endpoint = Arc::new(endpoint);
            for pattern in &endpoint.event_types {
                match pattern.strip_suffix(".*") {
                    Some(prefix) if !prefix.is_empty() => {
                        state
                            .wildcard
                            .entry(prefix.to_string())
                            .or_default()
                            .push(endpoint.id);
                    }
                    _ => {
                        state
                            .literal
                            .entry(pattern.clone())
                            .or_default()
                            .push(endpoint.id);
                    }
                }
            }
            state.endpoints.insert(endpoint.id, endpoint);
        }

        state
    }

    fn matching(&self, event_type: &str) -> Vec<Arc<WebhookEndpoint>> {
        let mut ids: Vec<Uuid> = Vec::new();

        if let Some(literal) = self.literal.get(event_type) {
            ids.extend_from_slice(literal);
        }

        // A pattern `X.*` matches any event type with prefix `X.`; check
        // every dot-prefix of the event type against the wildcard map.
        for (pos, ch) in event_type.char_indices() {
            if ch == '.' {
                if let Some(wild) = self.wildcard.get(&event_type[..pos]) {
                    ids.extend_from_slice(wild);
                }
            }
        }

        ids.sort_unstable();
        ids.dedup();

        ids.iter()
            .filter_map(|id| self.endpoints.get(id).cloned())
            .collect()
    }
}

/// In-memory index of active endpoint subscriptions.
pub struct SubscriptionIndex {
    inner: RwLock<IndexState>,
}

impl SubscriptionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexState::default()),
        }
    }

    /// Build an index from in-memory endpoints, for tests and embedding.
    #[must_use]
    pub fn from_endpoints(endpoints: Vec<WebhookEndpoint>) -> Self {
        Self {
            inner: RwLock::new(IndexState::build(endpoints)),
        }
    }

    /// Rebuild the index from the endpoint table.
    ///
    /// Called at startup and whenever the administration API may have
    /// changed endpoints (periodic refresh). Returns the number of active
    /// endpoints indexed.
    pub async fn rebuild(&self, pool: &PgPool) -> Result<usize, WebhookError> {
        let endpoints = WebhookEndpoint::find_active(pool).await?;
        let state = IndexState::build(endpoints);
        let count = state.endpoints.len();

        *self.inner.write().await = state;

        debug!(endpoint_count = count, "Subscription index rebuilt");
        Ok(count)
    }

    /// Replace the index contents with the given endpoints.
    pub async fn replace_all(&self, endpoints: Vec<WebhookEndpoint>) {
        *self.inner.write().await = IndexState::build(endpoints);
    }

    /// Active endpoints whose subscriptions match the event type.
    pub async fn matching(&self, event_type: &str) -> Vec<Arc<WebhookEndpoint>> {
        self.inner.read().await.matching(event_type)
    }

    /// Number of active endpoints currently indexed.
    pub async fn len(&self) -> usize {
        self.inner.read().await.endpoints.len()
    }

    /// True when no active endpoint is indexed.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run a periodic refresh until the token is cancelled.
    pub async fn run_refresh(
        self: Arc<Self>,
        pool: PgPool,
        interval: std::time::Duration,
        shutdown: tokio_util::sync::CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick; the index was already built at startup.
        ticker.tick().await;

        info!(
            interval_secs = interval.as_secs(),
            "Subscription index refresh started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Subscription index refresh stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.rebuild(&pool).await {
                        tracing::error!(error = %e, "Failed to refresh subscription index");
                    }
                }
            }
        }
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn endpoint(name: &str, active: bool, event_types: &[&str]) -> WebhookEndpoint {
        WebhookEndpoint {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            url: format!("https://example.com/{name}"),
            secret_encrypted: None,
            is_active: active,
            event_types: event_types.iter().map(|s| s.to_string()).collect(),
            headers: serde_json::json!({}),
            max_attempts: None,
            initial_delay_ms: None,
            backoff_multiplier: None,
            max_delay_ms: None,
            total_deliveries: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            last_delivery_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_literal_match() {
        let index = SubscriptionIndex::from_endpoints(vec![endpoint(
            "a",
            true,
            &["scenario.created"],
        )]);

        assert_eq!(index.matching("scenario.created").await.len(), 1);
        assert!(index.matching("scenario.deleted").await.is_empty());
    }

    #[tokio::test]
    async fn test_wildcard_match() {
        let index =
            SubscriptionIndex::from_endpoints(vec![endpoint("a", true, &["scenario.*"])]);

        assert_eq!(index.matching("scenario.created").await.len(), 1);
        assert_eq!(index.matching("scenario.deleted").await.len(), 1);
        assert!(index.matching("track.created").await.is_empty());
    }

    #[tokio::test]
    async fn test_wildcard_does_not_match_bare_domain() {
        let index =
            SubscriptionIndex::from_endpoints(vec![endpoint("a", true, &["scenario.*"])]);

        // `scenario.*` requires the `scenario.` prefix
        assert!(index.matching("scenario").await.is_empty());
        assert!(index.matching("scenariox.created").await.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_endpoint_excluded() {
        let index = SubscriptionIndex::from_endpoints(vec![
            endpoint("active", true, &["scenario.*"]),
            endpoint("inactive", false, &["scenario.*"]),
        ]);

        let matched = index.matching("scenario.created").await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "active");
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_overlapping_subscriptions_dedup() {
        // Subscribed both literally and by wildcard: one match, not two.
        let index = SubscriptionIndex::from_endpoints(vec![endpoint(
            "a",
            true,
            &["scenario.*", "scenario.created"],
        )]);

        assert_eq!(index.matching("scenario.created").await.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_segment_wildcard() {
        let index = SubscriptionIndex::from_endpoints(vec![endpoint(
            "a",
            true,
            &["simulation.run.*"],
        )]);

        assert_eq!(index.matching("simulation.run.completed").await.len(), 1);
        assert!(index.matching("simulation.created").await.is_empty());
    }

    #[tokio::test]
    async fn test_fanout_scenario() {
        // Endpoint A on scenario.*, endpoint B on track.*: a scenario
        // event matches only A.
        let index = SubscriptionIndex::from_endpoints(vec![
            endpoint("a", true, &["scenario.*"]),
            endpoint("b", true, &["track.*"]),
        ]);

        let matched = index.matching("scenario.created").await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "a");
    }

    #[tokio::test]
    async fn test_replace_all() {
        let index = SubscriptionIndex::new();
        assert!(index.is_empty().await);

        index
            .replace_all(vec![endpoint("a", true, &["scenario.*"])])
            .await;
        assert_eq!(index.len().await, 1);

        index.replace_all(Vec::new()).await;
        assert!(index.is_empty().await);
    }
}
