//! # sdv-db
//!
//! Persistence layer for the webhook delivery engine: the delivery ledger
//! (`DeliveryRecord`) and the read-side of webhook endpoints owned by the
//! external administration API.

pub mod error;
pub mod migrations;
pub mod models;

pub use error::DbError;
pub use migrations::MIGRATOR;
