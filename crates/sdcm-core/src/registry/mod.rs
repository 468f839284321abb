//! Remote registry documents, client and ingestion.

pub mod client;
pub mod documents;
pub mod ingest;

pub use client::{CivitaiClient, RegistryClient, RegistryResponse};
pub use documents::{ModelDocument, VersionDocument};
pub use ingest::{select_primary, version_page_url, IngestedModel, IngestedVersion, RegistryIngestor};
