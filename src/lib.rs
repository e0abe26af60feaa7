//! SegmentScope: sales reporting and customer segmentation over e-commerce order lines
//!
//! The library loads transaction, RFM and cluster artifacts, computes
//! Recency/Frequency/Monetary features, scores them into value levels,
//! summarizes precomputed Gaussian-mixture clusters and exposes the
//! aggregated tables a dashboard front end renders.

pub mod cache;
pub mod cli;
pub mod clusters;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod report;
pub mod scoring;

// Re-export public items for easier access
pub use cache::{ArtifactCatalog, LoadCache};
pub use cli::Args;
pub use clusters::{AdviceEntry, ClusterAssignment, FeatureAverages, ClusterSummary};
pub use config::Settings;
pub use data::{load_cluster_export, load_rfm_export, DateRange, OrderLine, TransactionStore};
pub use error::{DataLoadError, Error};
pub use features::{aggregate_features, CustomerFeatures};
pub use model::{fit_segments, GmmSegmentation};
pub use report::{Dashboard, DashboardViews, FilterState};
pub use scoring::{score_customers, RfmLevel, RfmScoredRecord};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
