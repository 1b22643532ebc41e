//! Slugs, display names and category guessing (made by FontLab https://www.fontlab.com/)

use std::sync::OnceLock;

use regex::Regex;

use crate::catalog::Category;

/// Directory-style identifier: lowercase ASCII letters and digits only.
pub fn slugify(family: &str) -> String {
    family
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

const KNOWN_NAMES: &[(&str, &str)] = &[
    ("opensans", "Open Sans"),
    ("sourcecodepro", "Source Code Pro"),
    ("sourcesanspro", "Source Sans Pro"),
    ("sourceserifpro", "Source Serif Pro"),
    ("robotocondensed", "Roboto Condensed"),
    ("robotoslab", "Roboto Slab"),
    ("playfairdisplay", "Playfair Display"),
    ("crimsontext", "Crimson Text"),
    ("faunaone", "Fauna One"),
    ("jetbrainsmono", "JetBrains Mono"),
    ("dmsans", "DM Sans"),
    ("dmseriftext", "DM Serif Text"),
    ("worksans", "Work Sans"),
    ("notosans", "Noto Sans"),
    ("notoserif", "Noto Serif"),
    ("firasans", "Fira Sans"),
    ("firamono", "Fira Mono"),
];

fn camel_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z])([A-Z])").expect("static regex"))
}

fn digit_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9])([a-zA-Z])").expect("static regex"))
}

/// Best-effort display name for a directory slug, used when metadata has none.
pub fn slug_to_name(slug: &str) -> String {
    if let Some((_, name)) = KNOWN_NAMES.iter().find(|(known, _)| *known == slug) {
        return (*name).to_string();
    }

    let spaced = camel_boundary().replace_all(slug, "$1 $2");
    let spaced = digit_boundary().replace_all(&spaced, "$1 $2");
    spaced
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Ordered substring rules; the first rule whose pattern occurs in the name wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    rules: Vec<(String, Category)>,
    fallback: Category,
}

impl CategoryRules {
    pub fn new(rules: Vec<(String, Category)>, fallback: Category) -> Self {
        let rules = rules
            .into_iter()
            .map(|(pattern, category)| (pattern.to_lowercase(), category))
            .collect();
        Self { rules, fallback }
    }

    pub fn guess(&self, name: &str) -> Category {
        let haystack = name.to_lowercase();
        let compact = slugify(name);
        self.rules
            .iter()
            .find(|(pattern, _)| haystack.contains(pattern) || compact.contains(&slugify(pattern)))
            .map(|(_, category)| *category)
            .unwrap_or(self.fallback)
    }
}

impl Default for CategoryRules {
    fn default() -> Self {
        let mono = ["mono", "code", "inconsolata", "courier", "jetbrains"];
        let serif = ["serif", "times", "georgia", "crimson", "merriweather", "playfair", "lora"];
        let display = ["display", "impact", "lobster", "dancing", "pacifico"];

        let rules = mono
            .iter()
            .map(|p| (p.to_string(), Category::Monospace))
            .chain(serif.iter().map(|p| (p.to_string(), Category::Serif)))
            .chain(display.iter().map(|p| (p.to_string(), Category::Display)))
            .collect();
        Self::new(rules, Category::SansSerif)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_drops_spaces_and_punctuation() {
        assert_eq!(slugify("Open Sans"), "opensans");
        assert_eq!(slugify("M PLUS 1p"), "mplus1p");
        assert_eq!(slugify("Fira-Code!"), "firacode");
    }

    #[test]
    fn slug_to_name_prefers_known_table() {
        assert_eq!(slug_to_name("jetbrainsmono"), "JetBrains Mono");
        assert_eq!(slug_to_name("inter"), "Inter");
        assert_eq!(slug_to_name("42dotsans"), "42 Dotsans");
        assert_eq!(slug_to_name("someFamily"), "Some Family");
    }

    #[test]
    fn rules_apply_in_priority_order() {
        let rules = CategoryRules::default();
        // "mono" outranks "serif".
        assert_eq!(rules.guess("Noto Serif Mono"), Category::Monospace);
        assert_eq!(rules.guess("notoserif"), Category::Serif);
        assert_eq!(rules.guess("Lobster Two"), Category::Display);
        assert_eq!(rules.guess("Inter"), Category::SansSerif);
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let rules = CategoryRules::new(
            vec![("script".into(), Category::Handwriting)],
            Category::Display,
        );
        assert_eq!(rules.guess("Kaushan Script"), Category::Handwriting);
        assert_eq!(rules.guess("Inconsolata"), Category::Display);
    }
}
