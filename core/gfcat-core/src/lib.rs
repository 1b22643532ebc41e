//! gfcat-core: builds a catalog of Google Fonts families from three unreliable sources
//!
//! A run discovers family directories in the upstream repository, then resolves
//! each family from two more sources and merges the answers into one record:
//!
//! - **Directory listing** ([`directory`]): license buckets of the fonts repository,
//!   paginated, with a git-tree fallback.
//! - **Metadata** ([`metadata`]): each family's `METADATA.pb`, parsed field by field.
//! - **Variants** ([`variants`]): the CSS2 API, queried for the full weight/style
//!   space. Repeated file URLs reveal variable fonts and collapse into one entry
//!   with a weight range. When the API refuses, a fixed variant table fills in.
//!
//! Every request goes through one [`fetch::RetryingFetcher`], which throttles per
//! source ([`rate_limit`]), retries transient failures, and surfaces block signals
//! so callers can fall back. Per-family failures become warnings on the record;
//! the [`validate::Validator`] decides whether the finished document may ship.
//!
//! ```rust,no_run
//! use gfcat_core::config::PipelineConfig;
//! use gfcat_core::pipeline::Pipeline;
//! use gfcat_core::validate::Validator;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = PipelineConfig {
//!     max_families: Some(25),
//!     ..PipelineConfig::default()
//! };
//! let pipeline = Pipeline::from_config(config.clone())?;
//! let catalog = pipeline.run().await;
//!
//! let report = Validator::new(config.validation).validate(&catalog, false);
//! println!("{}", report.render());
//! # Ok(())
//! # }
//! ```
//!
//! ---
//!
//! Crafted with care at FontLab https://www.fontlab.com/

pub mod assemble;
pub mod catalog;
pub mod config;
pub mod directory;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod rate_limit;
pub mod transport;
pub mod validate;
pub mod variants;
