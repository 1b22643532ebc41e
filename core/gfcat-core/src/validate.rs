//! Publication gate for catalog documents (made by FontLab https://www.fontlab.com/)
//!
//! The validator only reads the finished document; it never talks to upstream
//! sources. Every check reports independently, and any error fails the whole
//! report so a broken catalog is never published.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogDocument, Category, FamilyStatus};
use crate::variants::Variant;

/// Families any complete catalog is expected to carry.
const POPULAR_FAMILIES: &[&str] = &[
    "Inter",
    "Roboto",
    "Open Sans",
    "Lato",
    "Montserrat",
    "Source Sans Pro",
    "Raleway",
    "Nunito",
    "Poppins",
    "Ubuntu",
    "Oswald",
    "Playfair Display",
    "Merriweather",
    "Work Sans",
    "Rubik",
    "Fira Sans",
    "DM Sans",
    "Manrope",
    "Source Code Pro",
    "Inconsolata",
    "Lora",
    "Crimson Text",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_families: usize,
    pub min_variants: usize,
    pub must_include: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_families: 1000,
            min_variants: 1000,
            must_include: POPULAR_FAMILIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Check {
    Structural,
    Completeness,
    Integrity,
    Quality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: Check,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    PassWithWarnings,
    Fail,
}

impl Verdict {
    /// Process exit status for automation: only `fail` is non-zero.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Pass | Verdict::PassWithWarnings => 0,
            Verdict::Fail => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::PassWithWarnings => "pass-with-warnings",
            Verdict::Fail => "fail",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub families: usize,
    pub variants: usize,
    pub degraded: usize,
    pub failed: usize,
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub verdict: Verdict,
    pub strict: bool,
    pub findings: Vec<Finding>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    pub fn is_publishable(&self) -> bool {
        self.verdict != Verdict::Fail
    }

    /// Human-readable summary, one finding per line.
    pub fn render(&self) -> String {
        let mut out = format!(
            "verdict: {} ({} families, {} variants, {} degraded, {} failed)\n",
            self.verdict,
            self.stats.families,
            self.stats.variants,
            self.stats.degraded,
            self.stats.failed
        );
        for finding in &self.findings {
            let level = match finding.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            out.push_str(&format!(
                "  {level} [{}]: {}\n",
                check_name(finding.check),
                finding.message
            ));
        }
        out
    }
}

fn check_name(check: Check) -> &'static str {
    match check {
        Check::Structural => "structural",
        Check::Completeness => "completeness",
        Check::Integrity => "integrity",
        Check::Quality => "quality",
    }
}

struct Findings {
    strict: bool,
    list: Vec<Finding>,
}

impl Findings {
    fn error(&mut self, check: Check, message: String) {
        self.list.push(Finding {
            check,
            severity: Severity::Error,
            message,
        });
    }

    /// Quality concerns: warnings unless the run is strict.
    fn concern(&mut self, check: Check, message: String) {
        let severity = if self.strict {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.list.push(Finding {
            check,
            severity,
            message,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, doc: &CatalogDocument, strict: bool) -> ValidationReport {
        let mut findings = Findings {
            strict,
            list: Vec::new(),
        };

        structural(doc, &mut findings);
        self.completeness(doc, &mut findings);
        integrity(doc, &mut findings);
        let stats = stats(doc);
        self.quality(doc, &stats, &mut findings);

        let verdict = if findings.list.iter().any(|f| f.severity == Severity::Error) {
            Verdict::Fail
        } else if findings.list.is_empty() {
            Verdict::Pass
        } else {
            Verdict::PassWithWarnings
        };

        ValidationReport {
            verdict,
            strict,
            findings: findings.list,
            stats,
        }
    }

    fn completeness(&self, doc: &CatalogDocument, findings: &mut Findings) {
        let meta = &doc.meta;
        if meta.total_families < self.config.min_families {
            findings.error(
                Check::Completeness,
                format!(
                    "total_families {} is below the minimum of {}",
                    meta.total_families, self.config.min_families
                ),
            );
        }
        if meta.total_variants < self.config.min_variants {
            findings.error(
                Check::Completeness,
                format!(
                    "total_variants {} is below the minimum of {}",
                    meta.total_variants, self.config.min_variants
                ),
            );
        }
        if !meta.failed_licenses.is_empty() {
            let names: Vec<&str> = meta.failed_licenses.iter().map(|l| l.as_str()).collect();
            findings.error(
                Check::Completeness,
                format!("license buckets not listed: {}", names.join(", ")),
            );
        }
        if meta.run_status.is_fatal() {
            findings.error(
                Check::Completeness,
                format!("run ended with fatal status {:?}", meta.run_status),
            );
        }
    }

    fn quality(&self, doc: &CatalogDocument, stats: &ValidationStats, findings: &mut Findings) {
        let present: HashSet<String> = doc
            .items
            .iter()
            .map(|item| item.family.to_lowercase())
            .collect();
        let missing: Vec<&str> = self
            .config
            .must_include
            .iter()
            .filter(|family| !present.contains(&family.to_lowercase()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            findings.concern(
                Check::Quality,
                format!("missing required families: {}", missing.join(", ")),
            );
        }

        if stats.degraded + stats.failed > 0 {
            findings.concern(
                Check::Quality,
                format!(
                    "{} degraded and {} failed family records",
                    stats.degraded, stats.failed
                ),
            );
        }

        if stats.families > 0 {
            let sans = stats
                .categories
                .get(Category::SansSerif.as_str())
                .copied()
                .unwrap_or(0);
            let share = 100.0 * sans as f64 / stats.families as f64;
            if share < 50.0 {
                findings.concern(
                    Check::Quality,
                    format!("sans-serif share is {share:.1}% (expected at least 50%)"),
                );
            }
        }
    }
}

fn structural(doc: &CatalogDocument, findings: &mut Findings) {
    if doc.items.is_empty() {
        findings.error(Check::Structural, "items list is empty".to_string());
    }

    for (index, item) in doc.items.iter().enumerate() {
        if item.family.trim().is_empty() {
            findings.error(Check::Structural, format!("item {index}: empty family name"));
        }
        if item.variants.is_empty() {
            findings.error(
                Check::Structural,
                format!("item {index} ({}): no variants", item.family),
            );
        }
        if item.category().is_none() {
            findings.error(
                Check::Structural,
                format!(
                    "item {index} ({}): unknown category {:?}",
                    item.family, item.category
                ),
            );
        }
    }
}

fn integrity(doc: &CatalogDocument, findings: &mut Findings) {
    if doc.meta.total_families != doc.items.len() {
        findings.error(
            Check::Integrity,
            format!(
                "meta.total_families is {} but the document has {} items",
                doc.meta.total_families,
                doc.items.len()
            ),
        );
    }

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (index, item) in doc.items.iter().enumerate() {
        let key = item.family.to_lowercase();
        if let Some(first) = first_seen.get(&key) {
            findings.error(
                Check::Integrity,
                format!(
                    "item {index}: duplicate family {:?} (first at item {first})",
                    item.family
                ),
            );
        } else {
            first_seen.insert(key, index);
        }

        let mut variants = HashSet::new();
        for variant in &item.variants {
            if variant.parse::<Variant>().is_err() {
                findings.error(
                    Check::Integrity,
                    format!("item {index} ({}): invalid variant {variant:?}", item.family),
                );
            }
            if !variants.insert(variant.as_str()) {
                findings.error(
                    Check::Integrity,
                    format!("item {index} ({}): duplicate variant {variant:?}", item.family),
                );
            }
        }
    }
}

fn stats(doc: &CatalogDocument) -> ValidationStats {
    let mut stats = ValidationStats {
        families: doc.items.len(),
        variants: doc.variant_count(),
        ..ValidationStats::default()
    };
    for item in &doc.items {
        match item.status {
            FamilyStatus::Complete => {}
            FamilyStatus::Degraded => stats.degraded += 1,
            FamilyStatus::Failed => stats.failed += 1,
        }
        *stats.categories.entry(item.category.clone()).or_default() += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogMeta, FamilyRecord, RunStatus};
    use chrono::Utc;

    fn item(family: &str, category: &str, variants: &[&str]) -> FamilyRecord {
        serde_json::from_value(serde_json::json!({
            "family": family,
            "category": category,
            "variants": variants,
        }))
        .unwrap()
    }

    fn doc(items: Vec<FamilyRecord>) -> CatalogDocument {
        let total_variants = items.iter().map(|i| i.variants.len()).sum();
        CatalogDocument {
            meta: CatalogMeta {
                generated: Utc::now(),
                generator: "test".into(),
                source: "google/fonts@main".into(),
                licenses: Vec::new(),
                total_families: items.len(),
                total_variants,
                requests: Default::default(),
                elapsed_seconds: 0.0,
                families_by_status: Default::default(),
                failed_licenses: Vec::new(),
                duplicates_dropped: 0,
                run_status: RunStatus::Complete,
            },
            items,
        }
    }

    fn lenient() -> Validator {
        Validator::new(ValidationConfig {
            min_families: 1,
            min_variants: 1,
            must_include: vec!["Inter".into()],
        })
    }

    #[test]
    fn clean_document_passes() {
        let report = lenient().validate(
            &doc(vec![
                item("Inter", "sans-serif", &["regular", "700"]),
                item("Lora", "serif", &["regular", "italic"]),
            ]),
            false,
        );
        assert_eq!(report.verdict, Verdict::Pass, "{}", report.render());
        assert_eq!(report.stats.variants, 4);
        assert_eq!(report.verdict.exit_code(), 0);
    }

    #[test]
    fn rejects_case_insensitive_duplicates() {
        let report = lenient().validate(
            &doc(vec![
                item("Inter", "sans-serif", &["regular"]),
                item("INTER", "sans-serif", &["regular"]),
            ]),
            false,
        );
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report
            .errors()
            .any(|f| f.check == Check::Integrity && f.message.contains("duplicate family")));
    }

    #[test]
    fn structural_problems_are_errors_even_when_lenient() {
        let report = lenient().validate(
            &doc(vec![
                item("Inter", "sans-serif", &["regular"]),
                item("", "sans-serif", &["regular"]),
                item("Odd", "blackletter", &[]),
            ]),
            false,
        );
        let structural = report
            .errors()
            .filter(|f| f.check == Check::Structural)
            .count();
        assert_eq!(structural, 3);
        assert_eq!(report.verdict.exit_code(), 1);
    }

    #[test]
    fn variant_grammar_and_duplicates_checked() {
        let report = lenient().validate(
            &doc(vec![item("Inter", "sans-serif", &["regular", "bold", "700", "700"])]),
            false,
        );
        let messages: Vec<&str> = report.errors().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("invalid variant \"bold\"")));
        assert!(messages.iter().any(|m| m.contains("duplicate variant \"700\"")));
    }

    #[test]
    fn quality_is_warning_unless_strict() {
        let document = doc(vec![item("Lora", "serif", &["regular"])]);

        let report = lenient().validate(&document, false);
        assert_eq!(report.verdict, Verdict::PassWithWarnings);
        assert_eq!(report.warnings().count(), 2, "{}", report.render());

        let report = lenient().validate(&document, true);
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.errors().all(|f| f.check == Check::Quality));
    }

    #[test]
    fn completeness_uses_meta_counts() {
        let mut document = doc(vec![item("Inter", "sans-serif", &["regular"])]);
        document.meta.total_families = 5;

        let validator = Validator::new(ValidationConfig {
            min_families: 3,
            min_variants: 2,
            must_include: Vec::new(),
        });
        let report = validator.validate(&document, false);
        assert!(report
            .errors()
            .any(|f| f.check == Check::Integrity && f.message.contains("5")));
        assert!(report
            .errors()
            .any(|f| f.check == Check::Completeness && f.message.contains("total_variants")));
        assert!(!report
            .errors()
            .any(|f| f.message.contains("total_families 5")));
    }

    #[test]
    fn fatal_run_status_fails_completeness() {
        let mut document = doc(vec![item("Inter", "sans-serif", &["regular"])]);
        document.meta.run_status = RunStatus::DeadlineExceeded;
        let report = lenient().validate(&document, false);
        assert_eq!(report.verdict, Verdict::Fail);
    }
}
