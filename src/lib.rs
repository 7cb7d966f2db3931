pub mod api;
pub mod cache;
pub mod config;
pub mod decode;
pub mod fetch;
pub mod humanize;
pub mod loader;
pub mod locator;
pub mod observability;
pub mod registry;
pub mod view;

pub use loader::{LoadOutcome, LoadedLocation, Loader, TargetId};
pub use locator::Locator;
pub use registry::{Registry, default_loader};
