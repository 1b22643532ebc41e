/// Catalog serialization for downstream integration
///
/// The full profile writes every resolved field. The minimal profile keeps only
/// names, categories and variant identifiers, for targets that never look at
/// file locations.
///
/// Made with love at FontLab https://www.fontlab.com/
use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::catalog::{CatalogDocument, CatalogMeta, FamilyRecord, FamilyStatus, License};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Full,
    Minimal,
}

#[derive(Serialize)]
struct MinimalItem<'a> {
    family: &'a str,
    slug: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    license: Option<License>,
    category: &'a str,
    variants: &'a [String],
    status: FamilyStatus,
}

impl<'a> From<&'a FamilyRecord> for MinimalItem<'a> {
    fn from(record: &'a FamilyRecord) -> Self {
        Self {
            family: &record.family,
            slug: &record.slug,
            license: record.license,
            category: &record.category,
            variants: &record.variants,
            status: record.status,
        }
    }
}

#[derive(Serialize)]
struct MinimalDocument<'a> {
    items: Vec<MinimalItem<'a>>,
    meta: &'a CatalogMeta,
}

/// Pretty-printed JSON document.
pub fn write_catalog(doc: &CatalogDocument, profile: Profile, mut w: impl Write) -> Result<()> {
    let json = match profile {
        Profile::Full => serde_json::to_string_pretty(doc)?,
        Profile::Minimal => serde_json::to_string_pretty(&MinimalDocument {
            items: doc.items.iter().map(MinimalItem::from).collect(),
            meta: &doc.meta,
        })?,
    };
    w.write_all(json.as_bytes())?;
    w.write_all(b"\n")?;
    Ok(())
}

/// One item per line; `meta` is not written.
pub fn write_items_ndjson(doc: &CatalogDocument, profile: Profile, mut w: impl Write) -> Result<()> {
    for item in &doc.items {
        let line = match profile {
            Profile::Full => serde_json::to_string(item)?,
            Profile::Minimal => serde_json::to_string(&MinimalItem::from(item))?,
        };
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
    }
    Ok(())
}
