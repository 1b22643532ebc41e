//! Pipeline configuration (made by FontLab https://www.fontlab.com/)
//!
//! Every knob has a default; a JSON file may override any subset of them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::License;
use crate::fetch::RetryPolicy;
use crate::rate_limit::{ResourceClass, MAX_RATE_PER_SECOND, MIN_RATE_PER_SECOND};
use crate::validate::ValidationConfig;

/// Upstream locations. Tests point these at a local mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub github_api: String,
    pub raw_content: String,
    pub css2: String,
    pub repository: String,
    pub branch: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            github_api: "https://api.github.com".to_string(),
            raw_content: "https://raw.githubusercontent.com".to_string(),
            css2: "https://fonts.googleapis.com".to_string(),
            repository: "google/fonts".to_string(),
            branch: "main".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every source at one base URL (mock servers, mirrors).
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            github_api: base.clone(),
            raw_content: base.clone(),
            css2: base,
            ..Self::default()
        }
    }
}

/// Throttle and block-signal settings for one resource class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePolicy {
    /// Sustained admissions per second; `None` is unlimited.
    pub per_second: Option<f64>,
    pub burst: u32,
    /// Statuses this source uses to reject automated traffic.
    pub block_statuses: Vec<u16>,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            per_second: None,
            burst: 1,
            block_statuses: vec![429],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePolicies {
    pub directory: SourcePolicy,
    pub metadata: SourcePolicy,
    pub variants: SourcePolicy,
}

impl Default for SourcePolicies {
    fn default() -> Self {
        Self {
            directory: SourcePolicy {
                per_second: Some(10.0),
                burst: 5,
                block_statuses: vec![403, 429],
            },
            metadata: SourcePolicy {
                per_second: None,
                burst: 1,
                block_statuses: vec![429],
            },
            variants: SourcePolicy {
                per_second: Some(1.0),
                burst: 1,
                block_statuses: vec![400, 403, 429],
            },
        }
    }
}

impl SourcePolicies {
    pub fn get(&self, class: ResourceClass) -> &SourcePolicy {
        match class {
            ResourceClass::Directory => &self.directory,
            ResourceClass::Metadata => &self.metadata,
            ResourceClass::Variants => &self.variants,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub endpoints: Endpoints,
    pub licenses: Vec<License>,
    pub sources: SourcePolicies,
    pub limiter_max_wait_ms: u64,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub deadline_ms: Option<u64>,
    pub max_families: Option<usize>,
    pub max_failed_families: usize,
    pub page_size: usize,
    pub variable_weight_threshold: usize,
    pub request_timeout_ms: u64,
    /// Alternate fallback variant table (JSON); the built-in table otherwise.
    pub fallback_table: Option<PathBuf>,
    pub validation: ValidationConfig,
    #[serde(skip)]
    pub github_token: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            licenses: vec![License::Ofl, License::Apache, License::Ufl],
            sources: SourcePolicies::default(),
            limiter_max_wait_ms: 120_000,
            retry: RetryPolicy::default(),
            workers: 8,
            deadline_ms: None,
            max_families: None,
            max_failed_families: 50,
            page_size: 100,
            variable_weight_threshold: 3,
            request_timeout_ms: 20_000,
            fallback_table: None,
            validation: ValidationConfig::default(),
            github_token: None,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(anyhow!("page_size must be at least 1"));
        }
        if self.variable_weight_threshold < 2 {
            return Err(anyhow!("variable_weight_threshold must be at least 2"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(anyhow!("retry.jitter must be within 0.0..=1.0"));
        }
        if self.licenses.is_empty() {
            return Err(anyhow!("at least one license bucket is required"));
        }
        for class in ResourceClass::ALL {
            let policy = self.sources.get(class);
            if let Some(rate) = policy.per_second {
                if !(MIN_RATE_PER_SECOND..=MAX_RATE_PER_SECOND).contains(&rate) {
                    return Err(anyhow!(
                        "sources.{class}.per_second must be within \
                         {MIN_RATE_PER_SECOND}..={MAX_RATE_PER_SECOND}, got {rate}"
                    ));
                }
            }
            if policy.burst == 0 {
                return Err(anyhow!("sources.{class}.burst must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn limiter_max_wait(&self) -> Duration {
        Duration::from_millis(self.limiter_max_wait_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
