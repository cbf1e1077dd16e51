//! Guira Loss Statistics
//!
//! Forest-loss statistics for the Gran Chaco: how much loss occurred in a
//! region over a time window, with download links for the raw rows.
//!
//! - `period`: `"start,end"` parsing and the display label
//! - `region`: region descriptors, resolution to area / geometry
//! - `templates`: askama query templates and their export form
//! - `aggregator`: the per-request statistics pass
//! - `export`: per-format download links
//! - `store`, `boundary`: the analytical store and geostore collaborators
//!
//! The HTTP surface (`api_server`) is behind the `api` feature.

pub mod aggregator;
pub mod boundary;
pub mod config;
pub mod error;
pub mod export;
pub mod period;
pub mod region;
pub mod serializer;
pub mod store;
pub mod templates;

#[cfg(feature = "api")]
pub mod api_server;

// Re-export commonly used types
pub use aggregator::{LatestDate, StatsEngine, StatsResult};
pub use boundary::{BoundaryLookup, BoundaryRecord, BoundaryService, GeostoreClient};
pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use export::DownloadUrls;
pub use period::{period_label, DefaultWindow, Period};
pub use region::{GeometryReference, RegionDescriptor, RegionResolver, ResolutionMode};
pub use store::{CartoClient, Row, SqlStore};
pub use templates::{QueryParams, TemplateKind};

#[cfg(feature = "api")]
pub use api_server::{create_router, AppState};
