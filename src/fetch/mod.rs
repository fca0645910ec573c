//! Network side of the pipeline: the page fetcher and the coordinator that
//! coalesces, bounds and commits fetches.

mod coordinator;
mod fetcher;

pub use coordinator::{CoordinatorConfig, FetchCoordinator, FetchHandle, FetchOutcome, Priority};
pub use fetcher::{FetchFuture, HttpFetcher, PageFetcher};
