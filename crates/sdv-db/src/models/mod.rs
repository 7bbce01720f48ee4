pub mod delivery_record;
pub mod webhook_endpoint;

pub use delivery_record::{DeliveryRecord, DeliveryStatus, NewDeliveryRecord};
pub use webhook_endpoint::{RetryPolicy, WebhookEndpoint};
