//! Family discovery from the upstream repository (made by FontLab https://www.fontlab.com/)
//!
//! The paginated contents listing is the primary source. When it is blocked or
//! unusable, the recursive git tree of the branch is fetched once and reused for
//! every license bucket.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use url::Url;

use crate::catalog::License;
use crate::config::Endpoints;
use crate::error::FetchError;
use crate::fetch::RetryingFetcher;
use crate::rate_limit::ResourceClass;
use crate::transport::Request;

/// One family directory: `{license}/{slug}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    pub slug: String,
    pub license: License,
}

impl DirectoryEntry {
    pub fn new(slug: impl Into<String>, license: License) -> Self {
        Self {
            slug: slug.into(),
            license,
        }
    }
}

/// Ordered discovery result across license buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub licenses: Vec<License>,
    pub entries: Vec<DirectoryEntry>,
    /// Buckets whose listing failed on both paths.
    pub failed_licenses: Vec<License>,
}

impl Listing {
    /// A listing built by hand, e.g. for a fixed set of families.
    pub fn from_entries(entries: Vec<DirectoryEntry>) -> Self {
        let mut licenses = Vec::new();
        for entry in &entries {
            if !licenses.contains(&entry.license) {
                licenses.push(entry.license);
            }
        }
        Self {
            licenses,
            entries,
            failed_licenses: Vec::new(),
        }
    }

    /// Keep only the first `max` entries.
    pub fn truncate(&mut self, max: usize) {
        self.entries.truncate(max);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ContentsItem {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeNode>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct DirectoryLister {
    fetcher: Arc<RetryingFetcher>,
    endpoints: Endpoints,
    page_size: usize,
    token: Option<String>,
    tree: OnceCell<Vec<String>>,
}

impl DirectoryLister {
    pub fn new(
        fetcher: Arc<RetryingFetcher>,
        endpoints: Endpoints,
        page_size: usize,
        token: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            page_size: page_size.max(1),
            token,
            tree: OnceCell::new(),
        }
    }

    fn api_url(&self, path: &str) -> Result<Url, FetchError> {
        let raw = format!(
            "{}/repos/{}/{}",
            self.endpoints.github_api.trim_end_matches('/'),
            self.endpoints.repository,
            path
        );
        Url::parse(&raw).map_err(|e| FetchError::Request(format!("{raw}: {e}")))
    }

    fn request(&self, url: Url) -> Request {
        let request = Request::get(url).header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.header("Authorization", format!("token {token}")),
            None => request,
        }
    }

    /// Family directories of one license bucket, in source order.
    pub async fn list(&self, license: License) -> Result<Vec<DirectoryEntry>, FetchError> {
        match self.list_contents(license).await {
            Ok(slugs) => Ok(into_entries(slugs, license)),
            Err(err @ (FetchError::NotFound | FetchError::Rejected { .. } | FetchError::Request(_))) => {
                Err(err)
            }
            Err(err) => {
                warn!(%license, error = %err, "contents listing unusable; falling back to git tree");
                let slugs = self.list_from_tree(license).await?;
                Ok(into_entries(slugs, license))
            }
        }
    }

    async fn list_contents(&self, license: License) -> Result<Vec<String>, FetchError> {
        let mut slugs = Vec::new();
        let mut seen = HashSet::new();

        for page in 1.. {
            let mut url = self.api_url(&format!("contents/{license}"))?;
            url.query_pairs_mut()
                .append_pair("ref", &self.endpoints.branch)
                .append_pair("per_page", &self.page_size.to_string())
                .append_pair("page", &page.to_string());

            let response = self
                .fetcher
                .fetch(ResourceClass::Directory, &self.request(url))
                .await?;
            let items: Vec<ContentsItem> = serde_json::from_str(&response.body)
                .map_err(|e| FetchError::Malformed(format!("contents listing: {e}")))?;

            let fetched = items.len();
            let mut fresh = 0usize;
            for item in items.into_iter().filter(|item| item.kind == "dir") {
                if seen.insert(item.name.clone()) {
                    slugs.push(item.name);
                    fresh += 1;
                }
            }

            // A server that ignores paging repeats the same page forever.
            if fetched < self.page_size || (fetched > 0 && fresh == 0) {
                break;
            }
        }

        Ok(slugs)
    }

    async fn list_from_tree(&self, license: License) -> Result<Vec<String>, FetchError> {
        let dirs = self.tree.get_or_try_init(|| self.fetch_tree()).await?;
        let prefix = format!("{license}/");
        let slugs: BTreeSet<String> = dirs
            .iter()
            .filter_map(|path| path.strip_prefix(&prefix))
            .map(str::to_string)
            .collect();
        Ok(slugs.into_iter().collect())
    }

    /// `{bucket}/{slug}` paths of every second-level directory on the branch.
    async fn fetch_tree(&self) -> Result<Vec<String>, FetchError> {
        let mut url = self.api_url(&format!("git/trees/{}", self.endpoints.branch))?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let response = self
            .fetcher
            .fetch(ResourceClass::Directory, &self.request(url))
            .await?;
        let tree: TreeResponse = serde_json::from_str(&response.body)
            .map_err(|e| FetchError::Malformed(format!("git tree: {e}")))?;
        if tree.truncated {
            warn!("git tree response was truncated; listing may be incomplete");
        }

        Ok(tree
            .tree
            .into_iter()
            .filter(|node| node.kind == "tree" && node.path.matches('/').count() == 1)
            .map(|node| node.path)
            .collect())
    }

    /// Concatenate buckets in the given order. A bucket that cannot be listed
    /// is skipped and reported, not fatal.
    pub async fn list_all(&self, licenses: &[License]) -> Listing {
        let mut listing = Listing {
            licenses: licenses.to_vec(),
            ..Listing::default()
        };

        for &license in licenses {
            match self.list(license).await {
                Ok(entries) => {
                    info!(%license, families = entries.len(), "listed license bucket");
                    listing.entries.extend(entries);
                }
                Err(err) => {
                    warn!(%license, error = %err, "license bucket could not be listed");
                    listing.failed_licenses.push(license);
                }
            }
        }

        listing
    }
}

fn into_entries(slugs: Vec<String>, license: License) -> Vec<DirectoryEntry> {
    slugs
        .into_iter()
        .map(|slug| DirectoryEntry::new(slug, license))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcePolicies;
    use crate::fetch::RetryPolicy;
    use crate::rate_limit::RateLimiter;
    use crate::transport::HttpTransport;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lister(server: &MockServer, page_size: usize, token: Option<&str>) -> DirectoryLister {
        let sources = SourcePolicies::default();
        let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).expect("transport"));
        let limiter = RateLimiter::new(&sources, Duration::from_secs(30));
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.0,
        };
        let fetcher = Arc::new(RetryingFetcher::new(transport, limiter, sources, policy));
        DirectoryLister::new(
            fetcher,
            Endpoints::all_at(&server.uri()),
            page_size,
            token.map(str::to_string),
        )
    }

    fn dirs(names: &[&str]) -> serde_json::Value {
        serde_json::Value::Array(
            names
                .iter()
                .map(|name| serde_json::json!({"name": name, "type": "dir", "path": format!("ofl/{name}")}))
                .collect(),
        )
    }

    #[tokio::test]
    async fn follows_pages_until_a_short_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/google/fonts/contents/ofl"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(dirs(&["inter", "lato"])))
            .mount(&server)
            .await;
        let mut page_two = dirs(&["roboto"]);
        if let Some(items) = page_two.as_array_mut() {
            items.push(serde_json::json!({"name": "README.md", "type": "file"}));
        }
        Mock::given(method("GET"))
            .and(path("/repos/google/fonts/contents/ofl"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_two))
            .mount(&server)
            .await;

        let entries = lister(&server, 2, None).list(License::Ofl).await.expect("listing");
        let slugs: Vec<&str> = entries.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["inter", "lato", "roboto"]);
    }

    #[tokio::test]
    async fn blocked_contents_fall_back_to_git_tree() {
        let server = MockServer::start().await;
        Mock::given(path("/repos/google/fonts/contents/apache"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(path("/repos/google/fonts/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tree": [
                    {"path": "apache", "type": "tree"},
                    {"path": "apache/roboto", "type": "tree"},
                    {"path": "apache/roboto/METADATA.pb", "type": "blob"},
                    {"path": "apache/arimo", "type": "tree"},
                    {"path": "apache/arimo/static", "type": "tree"},
                    {"path": "ofl/inter", "type": "tree"}
                ],
                "truncated": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let lister = lister(&server, 100, None);
        let entries = lister.list(License::Apache).await.expect("listing");
        let slugs: Vec<&str> = entries.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["arimo", "roboto"]);
        // Second call is served from the cached tree.
        let again = lister.list(License::Apache).await.expect("listing");
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn sends_token_when_configured() {
        let server = MockServer::start().await;
        Mock::given(path("/repos/google/fonts/contents/ofl"))
            .and(header("Authorization", "token s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(dirs(&["inter"])))
            .mount(&server)
            .await;

        let entries = lister(&server, 100, Some("s3cret"))
            .list(License::Ofl)
            .await
            .expect("listing");
        assert_eq!(entries, vec![DirectoryEntry::new("inter", License::Ofl)]);
    }

    #[tokio::test]
    async fn failed_bucket_is_recorded_and_skipped() {
        let server = MockServer::start().await;
        Mock::given(path("/repos/google/fonts/contents/ofl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(dirs(&["inter"])))
            .mount(&server)
            .await;
        Mock::given(path("/repos/google/fonts/contents/ufl"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let listing = lister(&server, 100, None)
            .list_all(&[License::Ofl, License::Ufl])
            .await;
        assert_eq!(listing.entries, vec![DirectoryEntry::new("inter", License::Ofl)]);
        assert_eq!(listing.failed_licenses, vec![License::Ufl]);
        assert_eq!(listing.licenses, vec![License::Ofl, License::Ufl]);
    }

    #[test]
    fn truncate_keeps_discovery_order() {
        let mut listing = Listing::from_entries(vec![
            DirectoryEntry::new("b", License::Ofl),
            DirectoryEntry::new("a", License::Apache),
            DirectoryEntry::new("c", License::Ofl),
        ]);
        listing.truncate(2);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing.entries[1].slug, "a");
        assert_eq!(listing.licenses, vec![License::Ofl, License::Apache]);
    }
}
