//! Billing manifest catalog
//!
//! A manifest is the vendor-published metadata object describing one
//! billing export execution: its data files, column set and billing
//! period. Discovery finds them in object storage, parses them into
//! canonical records and filters out what is already loaded.

mod discovery;
mod record;

#[cfg(test)]
mod tests;

pub use discovery::ManifestDiscovery;
pub use record::{ManifestColumn, ManifestFormat, ManifestRecord};
