//! Record ingestion
//!
//! Everything that brings check-in records into the local store:
//! the Jetstream WebSocket subscription, the fallback repository
//! poller, record parsing, and address resolution.

mod address;
mod jetstream;
mod poller;
mod record;

pub use address::AddressResolver;
pub use jetstream::{CommitData, JetstreamEvent, JetstreamSubscription};
pub use poller::{IngestSummary, IngestionPoller};
pub use record::{checkin_from_record, record_uri};
