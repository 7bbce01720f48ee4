//! Broker connection health reporting.

/// Health status of the broker connection.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the broker responded to a metadata fetch.
    pub connected: bool,
    /// Number of brokers in the cluster.
    pub brokers: usize,
    /// Number of topics visible to this client.
    pub topics: usize,
}
