//! Variant resolution against the CSS2 API (made by FontLab https://www.fontlab.com/)
//!
//! The primary path asks the CSS2 endpoint for the whole weight/style space and
//! reads back one `@font-face` block per served style and subset. Variable fonts
//! show up as the same file URL repeated across many weights; those repetitions
//! are collapsed into a single file entry with a weight range.
//!
//! When the service blocks or fails, the resolver substitutes a fixed variant list
//! so the family is still catalogued, just without file locations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context, Error};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};
use url::Url;

use crate::catalog::{Axis, Category, FileRef, WeightRange};
use crate::config::Endpoints;
use crate::error::FetchError;
use crate::fetch::RetryingFetcher;
use crate::naming::{slugify, CategoryRules};
use crate::rate_limit::ResourceClass;
use crate::transport::Request;

const BROWSER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One weight/style combination, e.g. `700italic`.
///
/// Ordering is the catalog's canonical order: weight ascending, normal before italic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variant {
    weight: u16,
    italic: bool,
}

impl Variant {
    pub const REGULAR: Variant = Variant {
        weight: 400,
        italic: false,
    };

    /// `None` unless `weight` is one of 100, 200, ... 900.
    pub fn new(weight: u16, italic: bool) -> Option<Self> {
        if (100..=900).contains(&weight) && weight % 100 == 0 {
            Some(Self { weight, italic })
        } else {
            None
        }
    }

    pub fn weight(self) -> u16 {
        self.weight
    }

    pub fn is_italic(self) -> bool {
        self.italic
    }

    /// Every weight 100-900 in both styles.
    pub fn canonical_space() -> Vec<Variant> {
        let mut all: Vec<Variant> = [false, true]
            .into_iter()
            .flat_map(|italic| (1..=9).map(move |step| Variant { weight: step * 100, italic }))
            .collect();
        all.sort();
        all
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.weight, self.italic) {
            (400, false) => f.write_str("regular"),
            (400, true) => f.write_str("italic"),
            (weight, false) => write!(f, "{weight}"),
            (weight, true) => write!(f, "{weight}italic"),
        }
    }
}

impl FromStr for Variant {
    type Err = Error;

    /// Grammar: `regular`, `italic`, or `{100..900}` optionally followed by `italic`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => return Ok(Variant::REGULAR),
            "italic" => return Ok(Variant { weight: 400, italic: true }),
            _ => {}
        }

        let (digits, italic) = match s.strip_suffix("italic") {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("invalid variant identifier: {s:?}"));
        }
        let weight: u16 = digits
            .parse()
            .map_err(|_| anyhow!("invalid variant identifier: {s:?}"))?;
        Variant::new(weight, italic).ok_or_else(|| anyhow!("invalid variant weight: {s:?}"))
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Sort into canonical order and drop repeats.
pub fn canonicalize(variants: impl IntoIterator<Item = Variant>) -> Vec<Variant> {
    variants
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// One served style as read from a CSS2 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssFace {
    pub variant: Variant,
    pub url: String,
    pub subset: Option<String>,
}

struct CssPatterns {
    block: Regex,
    style: Regex,
    weight: Regex,
    src: Regex,
}

fn css_patterns() -> &'static CssPatterns {
    static PATTERNS: OnceLock<CssPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CssPatterns {
        block: Regex::new(r"(?s)(?:/\*\s*([^*]+?)\s*\*/\s*)?@font-face\s*\{(.*?)\}")
            .expect("static regex"),
        style: Regex::new(r"font-style:\s*(normal|italic)").expect("static regex"),
        weight: Regex::new(r"font-weight:\s*(\d+)(?:\s+(\d+))?").expect("static regex"),
        src: Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("static regex"),
    })
}

/// Extract `(variant, url, subset)` from every `@font-face` block.
///
/// A weight range such as `font-weight: 100 900` yields one face per covered
/// 100-step weight, all sharing the block's URL. Blocks without a usable
/// weight or URL are skipped.
pub fn parse_css_faces(css: &str) -> Vec<CssFace> {
    let p = css_patterns();
    let mut faces = Vec::new();

    for block in p.block.captures_iter(css) {
        let subset = block.get(1).map(|m| m.as_str().to_string());
        let body = &block[2];

        let italic = p
            .style
            .captures(body)
            .is_some_and(|caps| &caps[1] == "italic");
        let Some(weights) = p.weight.captures(body) else {
            continue;
        };
        let Some(src) = p.src.captures(body) else {
            continue;
        };

        let low: u16 = match weights[1].parse() {
            Ok(value) => value,
            Err(_) => continue,
        };
        let high: u16 = weights
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(low);
        let (low, high) = if low <= high { (low, high) } else { (high, low) };

        for weight in (100..=900).step_by(100).filter(|w| *w >= low && *w <= high) {
            if let Some(variant) = Variant::new(weight, italic) {
                faces.push(CssFace {
                    variant,
                    url: src[1].to_string(),
                    subset: subset.clone(),
                });
            }
        }
    }

    faces
}

/// Variants, file map and axes derived from a set of served faces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collapsed {
    pub variants: Vec<Variant>,
    pub files: BTreeMap<String, Vec<FileRef>>,
    pub axes: BTreeSet<Axis>,
    pub subsets: BTreeSet<String>,
}

/// Group faces by URL and collapse variable-font repetitions.
///
/// A URL shared by at least `threshold` distinct weights is one variable-font
/// file: it becomes a single entry, keyed by the group's lowest variant, with the
/// group's weight range. Smaller groups are treated as coincidence and every
/// variant keeps its own entry.
pub fn collapse_faces(faces: &[CssFace], threshold: usize) -> Collapsed {
    let mut groups: BTreeMap<&str, (BTreeSet<Variant>, Option<&str>)> = BTreeMap::new();
    for face in faces {
        let entry = groups.entry(face.url.as_str()).or_default();
        entry.0.insert(face.variant);
        if entry.1.is_none() {
            entry.1 = face.subset.as_deref();
        }
    }

    let mut collapsed = Collapsed {
        variants: canonicalize(faces.iter().map(|face| face.variant)),
        subsets: faces
            .iter()
            .filter_map(|face| face.subset.clone())
            .filter(|subset| !subset.starts_with('['))
            .collect(),
        ..Collapsed::default()
    };

    for (url, (members, subset)) in groups {
        let weights: BTreeSet<u16> = members.iter().map(|v| v.weight()).collect();
        let subset = subset.map(str::to_string);

        if weights.len() >= threshold {
            let (Some(first), Some(min), Some(max)) =
                (members.first(), weights.first(), weights.last())
            else {
                continue;
            };
            collapsed
                .files
                .entry(first.to_string())
                .or_default()
                .push(FileRef {
                    url: url.to_string(),
                    subset,
                    weight_range: Some(WeightRange {
                        min: *min,
                        max: *max,
                    }),
                });
            collapsed.axes.insert(Axis::Weight);
            if members.iter().any(|v| v.is_italic()) && members.iter().any(|v| !v.is_italic()) {
                collapsed.axes.insert(Axis::Italic);
            }
        } else {
            for variant in &members {
                collapsed
                    .files
                    .entry(variant.to_string())
                    .or_default()
                    .push(FileRef {
                        url: url.to_string(),
                        subset: subset.clone(),
                        weight_range: None,
                    });
            }
        }
    }

    for refs in collapsed.files.values_mut() {
        refs.sort();
    }
    collapsed
}

/// Hand-maintained variant list for one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub variants: Vec<Variant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

#[derive(Debug, Deserialize)]
struct FallbackTableFile {
    #[serde(default)]
    families: BTreeMap<String, FallbackEntry>,
    #[serde(default)]
    default: Option<Vec<Variant>>,
}

/// Variants to report when the CSS2 source is unavailable.
///
/// Injected into [`VariantResolver`] so runs and tests can swap tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackTable {
    families: BTreeMap<String, FallbackEntry>,
    default: Vec<Variant>,
}

const BUILTIN_FAMILIES: &[(&str, Category, &[&str])] = &[
    ("Inter", Category::SansSerif, &["100", "200", "300", "regular", "500", "600", "700", "800", "900", "100italic", "200italic", "300italic", "italic", "500italic", "600italic", "700italic", "800italic", "900italic"]),
    ("Roboto", Category::SansSerif, &["100", "100italic", "300", "300italic", "regular", "italic", "500", "500italic", "700", "700italic", "900", "900italic"]),
    ("Open Sans", Category::SansSerif, &["300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic"]),
    ("Lato", Category::SansSerif, &["100", "100italic", "300", "300italic", "regular", "italic", "700", "700italic", "900", "900italic"]),
    ("Montserrat", Category::SansSerif, &["100", "100italic", "200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Source Sans Pro", Category::SansSerif, &["200", "200italic", "300", "300italic", "regular", "italic", "600", "600italic", "700", "700italic", "900", "900italic"]),
    ("Raleway", Category::SansSerif, &["100", "100italic", "200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Nunito", Category::SansSerif, &["200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Poppins", Category::SansSerif, &["100", "100italic", "200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Ubuntu", Category::SansSerif, &["300", "300italic", "regular", "italic", "500", "500italic", "700", "700italic"]),
    ("Oswald", Category::SansSerif, &["200", "300", "regular", "500", "600", "700"]),
    ("Work Sans", Category::SansSerif, &["100", "200", "300", "regular", "500", "600", "700", "800", "900", "100italic", "200italic", "300italic", "italic", "500italic", "600italic", "700italic", "800italic", "900italic"]),
    ("Rubik", Category::SansSerif, &["300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Fira Sans", Category::SansSerif, &["100", "100italic", "200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("DM Sans", Category::SansSerif, &["regular", "italic", "500", "500italic", "700", "700italic"]),
    ("Manrope", Category::SansSerif, &["200", "300", "regular", "500", "600", "700", "800"]),
    ("Noto Sans", Category::SansSerif, &["regular", "italic", "700", "700italic"]),
    ("Roboto Condensed", Category::SansSerif, &["300", "300italic", "regular", "italic", "700", "700italic"]),
    ("Kanit", Category::SansSerif, &["100", "100italic", "200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Playfair Display", Category::Serif, &["regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Merriweather", Category::Serif, &["300", "300italic", "regular", "italic", "700", "700italic", "900", "900italic"]),
    ("Lora", Category::Serif, &["regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic"]),
    ("Crimson Text", Category::Serif, &["regular", "italic", "600", "600italic", "700", "700italic"]),
    ("Source Code Pro", Category::Monospace, &["200", "200italic", "300", "300italic", "regular", "italic", "500", "500italic", "600", "600italic", "700", "700italic", "800", "800italic", "900", "900italic"]),
    ("Inconsolata", Category::Monospace, &["200", "300", "regular", "500", "600", "700", "800", "900"]),
    ("Fauna One", Category::Serif, &["regular"]),
    ("JetBrains Mono", Category::Monospace, &["100", "200", "300", "regular", "500", "600", "700", "800", "100italic", "200italic", "300italic", "italic", "500italic", "600italic", "700italic", "800italic"]),
    ("Mukti", Category::SansSerif, &["regular"]),
];

impl FallbackTable {
    pub fn new(
        families: impl IntoIterator<Item = (String, FallbackEntry)>,
        default: Vec<Variant>,
    ) -> Self {
        let families = families
            .into_iter()
            .map(|(name, entry)| {
                let entry = FallbackEntry {
                    variants: canonicalize(entry.variants),
                    category: entry.category,
                };
                (slugify(&name), entry)
            })
            .collect();
        let default = match canonicalize(default) {
            list if list.is_empty() => generic_default(),
            list => list,
        };
        Self { families, default }
    }

    /// The popular-family table shipped with the tool.
    pub fn builtin() -> Self {
        let families = BUILTIN_FAMILIES.iter().map(|(name, category, variants)| {
            let entry = FallbackEntry {
                variants: variants.iter().filter_map(|v| v.parse().ok()).collect(),
                category: Some(*category),
            };
            (name.to_string(), entry)
        });
        Self::new(families, generic_default())
    }

    /// Load `{"families": {"Name": {"variants": [...], "category": "..."}}, "default": [...]}`.
    pub fn from_json(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading fallback table {}", path.display()))?;
        let file: FallbackTableFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing fallback table {}", path.display()))?;
        Ok(Self::new(
            file.families,
            file.default.unwrap_or_else(generic_default),
        ))
    }

    /// Family-specific entry when one exists, otherwise the generic default.
    pub fn lookup(&self, family: &str) -> (Vec<Variant>, Option<Category>, bool) {
        match self.families.get(&slugify(family)) {
            Some(entry) if !entry.variants.is_empty() => {
                (entry.variants.clone(), entry.category, true)
            }
            _ => (self.default.clone(), None, false),
        }
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn generic_default() -> Vec<Variant> {
    vec![
        Variant::REGULAR,
        Variant {
            weight: 700,
            italic: false,
        },
    ]
}

/// Why the fallback table was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackCause {
    Fetch(FetchError),
    /// The service answered but served no parsable faces.
    NoFaces,
    /// The run ended before the family was resolved.
    DeadlineExceeded,
}

impl fmt::Display for FallbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackCause::Fetch(err) => f.write_str(err.label()),
            FallbackCause::NoFaces => f.write_str("no-faces"),
            FallbackCause::DeadlineExceeded => f.write_str("deadline-exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantSource {
    Css2,
    Fallback {
        cause: FallbackCause,
        family_specific: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantResolution {
    pub variants: Vec<Variant>,
    pub axes: BTreeSet<Axis>,
    pub files: BTreeMap<String, Vec<FileRef>>,
    /// Subsets named in the CSS response, for families whose metadata has none.
    pub subsets: BTreeSet<String>,
    pub category_guess: Category,
    pub source: VariantSource,
}

impl VariantResolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, VariantSource::Fallback { .. })
    }
}

pub struct VariantResolver {
    fetcher: Arc<RetryingFetcher>,
    endpoints: Endpoints,
    table: FallbackTable,
    rules: CategoryRules,
    threshold: usize,
}

impl VariantResolver {
    pub fn new(
        fetcher: Arc<RetryingFetcher>,
        endpoints: Endpoints,
        table: FallbackTable,
        rules: CategoryRules,
        threshold: usize,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            table,
            rules,
            threshold,
        }
    }

    /// CSS2 query URL; `enumerate` requests the full canonical weight/style space.
    pub fn css2_url(&self, family: &str, enumerate: bool) -> Result<Url, FetchError> {
        let base = format!("{}/css2", self.endpoints.css2.trim_end_matches('/'));
        let mut url = Url::parse(&base).map_err(|e| FetchError::Request(format!("{base}: {e}")))?;

        let family_spec = if enumerate {
            let axis_values: Vec<String> = Variant::canonical_space()
                .into_iter()
                .map(|v| (u8::from(v.is_italic()), v.weight()))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|(ital, weight)| format!("{ital},{weight}"))
                .collect();
            format!("{family}:ital,wght@{}", axis_values.join(";"))
        } else {
            family.to_string()
        };

        url.query_pairs_mut()
            .append_pair("family", &family_spec)
            .append_pair("display", "swap");
        Ok(url)
    }

    async fn query(&self, family: &str, enumerate: bool) -> Result<Vec<CssFace>, FetchError> {
        let request = Request::get(self.css2_url(family, enumerate)?)
            .header("User-Agent", BROWSER_AGENT)
            .header("Accept", "text/css,*/*;q=0.1")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://fonts.google.com/");
        let response = self.fetcher.fetch(ResourceClass::Variants, &request).await?;
        Ok(parse_css_faces(&response.body))
    }

    /// Resolve variants for a display name. Never fails: an unavailable service
    /// yields the fallback list with an empty file map.
    ///
    /// The enumerated query names styles the family may lack, which CSS2 answers
    /// with HTTP 400. That, a not-found, a rejection or an empty answer earn one
    /// plain `family=<name>` query; 403 and 429 go straight to the fallback.
    pub async fn resolve(&self, family: &str) -> VariantResolution {
        let faces = match self.query(family, true).await {
            Ok(faces) if !faces.is_empty() => Ok(faces),
            Ok(_) => self.plain_query(family, "served no faces").await,
            Err(err) if retries_plain(&err) => self.plain_query(family, err.label()).await,
            Err(err) => Err(FallbackCause::Fetch(err)),
        };

        match faces {
            Ok(faces) => self.from_faces(family, &faces),
            Err(cause) => self.fallback(family, cause),
        }
    }

    async fn plain_query(&self, family: &str, reason: &str) -> Result<Vec<CssFace>, FallbackCause> {
        debug!(family, reason, "enumerated CSS2 query unusable; trying plain query");
        match self.query(family, false).await {
            Ok(faces) if !faces.is_empty() => Ok(faces),
            Ok(_) => Err(FallbackCause::NoFaces),
            Err(err) => Err(FallbackCause::Fetch(err)),
        }
    }

    fn from_faces(&self, family: &str, faces: &[CssFace]) -> VariantResolution {
        let collapsed = collapse_faces(faces, self.threshold);
        debug!(
            family,
            variants = collapsed.variants.len(),
            files = collapsed.files.len(),
            variable = !collapsed.axes.is_empty(),
            "resolved variants from CSS2"
        );
        VariantResolution {
            variants: collapsed.variants,
            axes: collapsed.axes,
            files: collapsed.files,
            subsets: collapsed.subsets,
            category_guess: self.rules.guess(family),
            source: VariantSource::Css2,
        }
    }

    /// Offline resolution from the fallback table alone.
    pub fn fallback(&self, family: &str, cause: FallbackCause) -> VariantResolution {
        let (variants, category, family_specific) = self.table.lookup(family);
        warn!(family, cause = %cause, family_specific, "using fallback variant list");
        VariantResolution {
            variants,
            axes: BTreeSet::new(),
            files: BTreeMap::new(),
            subsets: BTreeSet::new(),
            category_guess: category.unwrap_or_else(|| self.rules.guess(family)),
            source: VariantSource::Fallback {
                cause,
                family_specific,
            },
        }
    }
}

/// Enumerated-query failures that say "wrong style list", not "go away".
fn retries_plain(err: &FetchError) -> bool {
    matches!(
        err,
        FetchError::Blocked { status: 400 } | FetchError::Rejected { .. } | FetchError::NotFound
    )
}
