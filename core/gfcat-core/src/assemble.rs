//! Concurrent per-family assembly (made by FontLab https://www.fontlab.com/)
//!
//! Each directory entry is resolved end-to-end by one unit of work; at most
//! `workers` units run at once. Results land in a slot addressed by the entry's
//! listing index, so item order never depends on completion order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::{
    CatalogDocument, CatalogMeta, FamilyRecord, FamilyStatus, RecordWarning, RunStatus,
    StatusCounts,
};
use crate::directory::{DirectoryEntry, Listing};
use crate::error::FetchError;
use crate::fetch::RetryingFetcher;
use crate::metadata::{MetadataPartial, MetadataResolver};
use crate::naming::slug_to_name;
use crate::variants::{FallbackCause, VariantResolution, VariantResolver, VariantSource};

pub const GENERATOR: &str = concat!("gfcat ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerSettings {
    pub workers: usize,
    pub deadline: Option<Duration>,
    /// More failed families than this makes the run fatal.
    pub max_failed_families: usize,
    /// Recorded in `meta.source`, e.g. `google/fonts@main`.
    pub source: String,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            deadline: None,
            max_failed_families: 50,
            source: "google/fonts@main".to_string(),
        }
    }
}

pub struct CatalogAssembler {
    metadata: MetadataResolver,
    variants: VariantResolver,
    fetcher: Arc<RetryingFetcher>,
    settings: AssemblerSettings,
}

impl CatalogAssembler {
    pub fn new(
        metadata: MetadataResolver,
        variants: VariantResolver,
        fetcher: Arc<RetryingFetcher>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            metadata,
            variants,
            fetcher,
            settings,
        }
    }

    /// Resolve every listed family and produce the catalog document.
    ///
    /// The configured deadline counts from this call; use [`Self::build_until`]
    /// when part of the run budget has already been spent elsewhere.
    pub async fn build(&self, listing: &Listing) -> CatalogDocument {
        let deadline = self.settings.deadline.map(|limit| Instant::now() + limit);
        self.build_until(listing, deadline).await
    }

    /// Like [`Self::build`], but stops at an absolute `deadline`.
    pub async fn build_until(&self, listing: &Listing, deadline: Option<Instant>) -> CatalogDocument {
        let started = Instant::now();
        let mut slots: Vec<Option<FamilyRecord>> = vec![None; listing.entries.len()];

        let deadline_hit = {
            let mut results = stream::iter(listing.entries.iter().enumerate())
                .map(|(index, entry)| async move { (index, self.resolve_family(entry).await) })
                .buffer_unordered(self.settings.workers.max(1));

            let expiry = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(expiry);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut expiry => break true,
                    next = results.next() => match next {
                        Some((index, record)) => slots[index] = Some(record),
                        None => break false,
                    },
                }
            }
        };

        if deadline_hit {
            let unfinished = slots.iter().filter(|slot| slot.is_none()).count();
            warn!(unfinished, "run deadline expired; marking unfinished families failed");
        }
        self.document(listing, slots, deadline_hit, started)
    }

    /// Document for a run whose deadline expired before assembly could start.
    /// Every listed entry becomes a failed record.
    pub fn expired(&self, listing: &Listing) -> CatalogDocument {
        warn!(
            unfinished = listing.len(),
            "run deadline expired before assembly"
        );
        let slots = vec![None; listing.entries.len()];
        self.document(listing, slots, true, Instant::now())
    }

    fn document(
        &self,
        listing: &Listing,
        slots: Vec<Option<FamilyRecord>>,
        deadline_hit: bool,
        started: Instant,
    ) -> CatalogDocument {
        let records = slots
            .into_iter()
            .zip(&listing.entries)
            .map(|(slot, entry)| slot.unwrap_or_else(|| self.unfinished(entry)));
        let (items, duplicates_dropped) = dedupe(records);

        let families_by_status = StatusCounts::tally(&items);
        let run_status = if deadline_hit {
            RunStatus::DeadlineExceeded
        } else {
            run_status(families_by_status, self.settings.max_failed_families)
        };

        let meta = CatalogMeta {
            generated: Utc::now(),
            generator: GENERATOR.to_string(),
            source: self.settings.source.clone(),
            licenses: listing.licenses.clone(),
            total_families: items.len(),
            total_variants: items.iter().map(|item| item.variants.len()).sum(),
            requests: self.fetcher.request_counts(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
            families_by_status,
            failed_licenses: listing.failed_licenses.clone(),
            duplicates_dropped,
            run_status,
        };

        info!(
            families = meta.total_families,
            variants = meta.total_variants,
            degraded = families_by_status.degraded,
            failed = families_by_status.failed,
            status = ?run_status,
            "catalog assembled"
        );

        CatalogDocument { items, meta }
    }

    async fn resolve_family(&self, entry: &DirectoryEntry) -> FamilyRecord {
        let metadata = self.metadata.resolve(&entry.slug, entry.license).await;
        let family = metadata
            .as_ref()
            .ok()
            .and_then(|partial| partial.name.clone())
            .unwrap_or_else(|| slug_to_name(&entry.slug));
        let resolution = self.variants.resolve(&family).await;

        let record = merge_family(entry, family, metadata, resolution);
        debug!(family = %record.family, status = ?record.status, "family resolved");
        record
    }

    fn unfinished(&self, entry: &DirectoryEntry) -> FamilyRecord {
        let family = slug_to_name(&entry.slug);
        let resolution = self
            .variants
            .fallback(&family, FallbackCause::DeadlineExceeded);
        let mut record = merge_family(entry, family, Err(FetchError::Abandoned), resolution);
        record.warnings = vec![RecordWarning::DeadlineExceeded];
        record.status = FamilyStatus::Failed;
        record
    }
}

/// Combine both resolver outcomes into one record.
///
/// Metadata wins for category and subsets; the variant side supplies its own
/// guesses otherwise. Axes are the union of both sides. Unreachable sources become warnings on the record.
pub fn merge_family(
    entry: &DirectoryEntry,
    family: String,
    metadata: Result<MetadataPartial, FetchError>,
    resolution: VariantResolution,
) -> FamilyRecord {
    let mut warnings = Vec::new();
    let metadata_failed = match &metadata {
        Ok(partial) if !partial.is_complete() => {
            warnings.push(RecordWarning::MetadataPartial {
                missing: partial.missing(),
            });
            false
        }
        Ok(_) => false,
        Err(FetchError::NotFound) => {
            warnings.push(RecordWarning::MetadataMissing);
            false
        }
        Err(err) => {
            warnings.push(RecordWarning::MetadataUnavailable {
                reason: err.label().to_string(),
            });
            matches!(err, FetchError::Exhausted { .. } | FetchError::Abandoned)
        }
    };

    let variants_failed = match &resolution.source {
        VariantSource::Css2 => false,
        VariantSource::Fallback { cause, .. } => {
            warnings.push(RecordWarning::VariantsFallback {
                reason: cause.to_string(),
            });
            matches!(
                cause,
                FallbackCause::DeadlineExceeded
                    | FallbackCause::Fetch(FetchError::Exhausted { .. } | FetchError::Abandoned)
            )
        }
    };

    let both_blocked = matches!(metadata, Err(FetchError::Blocked { .. }))
        && matches!(
            resolution.source,
            VariantSource::Fallback {
                cause: FallbackCause::Fetch(FetchError::Blocked { .. }),
                ..
            }
        );

    let status = if metadata_failed || variants_failed || both_blocked {
        FamilyStatus::Failed
    } else if warnings.is_empty() {
        FamilyStatus::Complete
    } else {
        FamilyStatus::Degraded
    };

    let partial = metadata.unwrap_or_default();
    FamilyRecord {
        slug: entry.slug.clone(),
        license: Some(entry.license),
        category: partial
            .category
            .unwrap_or(resolution.category_guess)
            .to_string(),
        subsets: partial.subsets.unwrap_or(resolution.subsets),
        variants: resolution
            .variants
            .iter()
            .map(ToString::to_string)
            .collect(),
        axes: resolution.axes.into_iter().chain(partial.axes).collect(),
        files: resolution.files,
        designer: partial.designer,
        status,
        warnings,
        family,
    }
}

/// Drop later records whose family name repeats an earlier one, ignoring case.
fn dedupe(records: impl IntoIterator<Item = FamilyRecord>) -> (Vec<FamilyRecord>, usize) {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    let mut dropped = 0;

    for record in records {
        if seen.insert(record.family.to_lowercase()) {
            items.push(record);
        } else {
            warn!(family = %record.family, slug = %record.slug, "duplicate family dropped");
            dropped += 1;
        }
    }

    (items, dropped)
}

fn run_status(counts: StatusCounts, max_failed: usize) -> RunStatus {
    if counts.failed > max_failed {
        RunStatus::FailedThresholdExceeded
    } else if counts.degraded + counts.failed > 0 {
        RunStatus::Degraded
    } else {
        RunStatus::Complete
    }
}
