pub mod analysis;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod identity;
pub mod impact;
pub mod models;
pub mod risk;
pub mod server;

pub use analysis::{AnalysisContext, AnalysisReport};
pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{ImpactError, Result};
