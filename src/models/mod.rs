//! Data models for carharvest.

mod car;
mod run;

pub use car::CarListing;
pub use run::{FailedUrl, RunSummary};
