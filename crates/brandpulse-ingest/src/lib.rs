//! Source polling and run orchestration.
//!
//! One fetch run reads the cursor state for a source, resolves a scan
//! window with clock-skew overlap, pulls native items from the upstream
//! API at a fixed pace, matches them to tracked brands, enriches the
//! accepted ones, and writes date-partitioned batches to the sink. Runs
//! are one-shot; all durable state lives in the cursor table.

pub mod error;
pub mod normalize;
pub mod pacing;
pub mod pipeline;
pub mod poller;
pub mod sources;

pub use error::IngestError;
pub use pipeline::{FetchParams, IngestSummary, Pipeline, Source};
pub use poller::{CursorStore, PgCursorStore, PollWindow, Watermark, WatermarkTracker};
