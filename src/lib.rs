//! Link hover previews built from `itabs:` meta tags on the destination page.
//!
//! Hover events go through [`hover::HoverSessionManager`], which debounces
//! them and asks the [`fetch::FetchCoordinator`] for metadata. The
//! coordinator serves fresh entries from [`cache::MetadataCache`], coalesces
//! concurrent lookups per URL and keeps the network under a concurrency
//! ceiling. Results that are still current get placed by [`placement`] and
//! handed to a [`render::Renderer`]. [`prefetch::PrefetchScheduler`] warms
//! the cache for visible links in the background.

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod hover;
pub mod logging;
pub mod metadata;
pub mod placement;
pub mod prefetch;
pub mod render;

#[cfg(test)]
mod testing;
