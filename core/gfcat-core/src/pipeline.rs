//! End-to-end catalog run (made by FontLab https://www.fontlab.com/)

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::assemble::{AssemblerSettings, CatalogAssembler};
use crate::catalog::CatalogDocument;
use crate::config::PipelineConfig;
use crate::directory::{DirectoryLister, Listing};
use crate::fetch::RetryingFetcher;
use crate::metadata::MetadataResolver;
use crate::naming::CategoryRules;
use crate::rate_limit::RateLimiter;
use crate::transport::{HttpTransport, Transport};
use crate::variants::{FallbackTable, VariantResolver};

/// Wires every component around one shared fetcher, so all three sources share
/// a single limiter and request counter.
pub struct Pipeline {
    config: PipelineConfig,
    lister: DirectoryLister,
    assembler: CatalogAssembler,
}

impl Pipeline {
    /// Pipeline talking to the real upstreams over HTTP.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout())
            .context("building HTTP client")?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: PipelineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.check()?;
        let table = match &config.fallback_table {
            Some(path) => FallbackTable::from_json(path)?,
            None => FallbackTable::builtin(),
        };

        let limiter = RateLimiter::new(&config.sources, config.limiter_max_wait());
        let fetcher = Arc::new(RetryingFetcher::new(
            transport,
            limiter,
            config.sources.clone(),
            config.retry.clone(),
        ));

        let lister = DirectoryLister::new(
            Arc::clone(&fetcher),
            config.endpoints.clone(),
            config.page_size,
            config.github_token.clone(),
        );
        let metadata = MetadataResolver::new(Arc::clone(&fetcher), config.endpoints.clone());
        let variants = VariantResolver::new(
            Arc::clone(&fetcher),
            config.endpoints.clone(),
            table,
            CategoryRules::default(),
            config.variable_weight_threshold,
        );
        let settings = AssemblerSettings {
            workers: config.workers,
            deadline: config.deadline(),
            max_failed_families: config.max_failed_families,
            source: format!(
                "{}@{}",
                config.endpoints.repository, config.endpoints.branch
            ),
        };
        let assembler = CatalogAssembler::new(metadata, variants, fetcher, settings);

        Ok(Self {
            config,
            lister,
            assembler,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Discover families for the configured licenses, honouring `max_families`.
    pub async fn discover(&self) -> Listing {
        let mut listing = self.lister.list_all(&self.config.licenses).await;
        if let Some(max) = self.config.max_families {
            listing.truncate(max);
        }
        info!(
            families = listing.len(),
            failed_licenses = listing.failed_licenses.len(),
            "directory listing complete"
        );
        listing
    }

    /// Build a catalog for an already known listing.
    pub async fn assemble(&self, listing: &Listing) -> CatalogDocument {
        self.assembler.build(listing).await
    }

    /// Discover and assemble under one deadline. Discovery that outlives the
    /// deadline yields a `deadline-exceeded` document with every bucket failed.
    pub async fn run(&self) -> CatalogDocument {
        let started = Instant::now();
        let deadline = self.config.deadline().map(|limit| started + limit);

        let discovered = match deadline {
            Some(at) => tokio::time::timeout_at(at, self.discover()).await.ok(),
            None => Some(self.discover().await),
        };
        let mut document = match discovered {
            Some(listing) => self.assembler.build_until(&listing, deadline).await,
            None => {
                warn!("run deadline expired during directory listing");
                let licenses = self.config.licenses.clone();
                let listing = Listing {
                    failed_licenses: licenses.clone(),
                    licenses,
                    entries: Vec::new(),
                };
                self.assembler.expired(&listing)
            }
        };
        document.meta.elapsed_seconds = started.elapsed().as_secs_f64();
        document
    }
}
