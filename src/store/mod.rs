//! Record store: the Neo4j knowledge graph holding the corpus and its vectors

pub mod client;
pub mod mock;
pub mod models;
pub mod traits;

pub use client::Neo4jClient;
pub use mock::MockRecordStore;
pub use models::*;
pub use traits::RecordStore;
