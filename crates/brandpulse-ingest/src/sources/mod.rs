//! One adapter per upstream API. Each adapter fetches native items,
//! filters or matches them to a tracked brand, and emits normalized
//! events; everything else (windows, state, enrichment, the sink) lives
//! in the pipeline.

pub mod cfpb;
pub mod glassdoor;
pub mod reddit;
pub mod trends;
pub mod twitter;
