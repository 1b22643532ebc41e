//! HTTP validation service for gfcat (made by FontLab https://www.fontlab.com/)
//!
//! Lets publishing automation submit a catalog document and get the validator's
//! report back, with the verdict mapped onto the status code.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

use gfcat_core::catalog::CatalogDocument;
use gfcat_core::validate::{ValidationConfig, ValidationReport, Validator};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValidateParams {
    /// Treat quality warnings as errors
    pub strict: bool,
}

pub async fn serve(bind: &str, validation: ValidationConfig) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding HTTP server to {bind}"))?;
    info!(%bind, "validation service listening");

    axum::serve(listener, router(validation))
        .await
        .context("serving HTTP")?;
    Ok(())
}

/// `GET /health` and `POST /validate?strict=bool`.
pub fn router(validation: ValidationConfig) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/validate", post(validate_handler))
        .with_state(Arc::new(Validator::new(validation)))
}

/// 200 for a publishable document, 422 for a failing one, 400 when the body is not a catalog.
async fn validate_handler(
    State(validator): State<Arc<Validator>>,
    Query(params): Query<ValidateParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<ValidationReport>), (StatusCode, String)> {
    let doc: CatalogDocument = serde_json::from_slice(&body).map_err(to_bad_request)?;
    let report = validator.validate(&doc, params.strict);

    let status = if report.is_publishable() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(report)))
}

fn to_bad_request(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gfcat_core::validate::Verdict;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::util::ServiceExt;

    fn config() -> ValidationConfig {
        ValidationConfig {
            min_families: 1,
            min_variants: 1,
            must_include: vec!["Inter".into()],
        }
    }

    fn catalog(families: &[(&str, &str)]) -> serde_json::Value {
        let items: Vec<serde_json::Value> = families
            .iter()
            .map(|(family, category)| {
                json!({"family": family, "category": category, "variants": ["regular", "700"]})
            })
            .collect();
        json!({
            "items": items,
            "meta": {
                "generated": "2024-01-01T00:00:00Z",
                "total_families": families.len(),
                "total_variants": families.len() * 2,
            }
        })
    }

    async fn post_validate(uri: &str, body: String) -> (StatusCode, Vec<u8>) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = router(config()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let response = router(config()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn clean_catalog_returns_report() {
        let doc = catalog(&[("Inter", "sans-serif")]);
        let (status, body) = post_validate("/validate", doc.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        let report: ValidationReport = serde_json::from_slice(&body).expect("parse report");
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.stats.families, 1);
    }

    #[tokio::test]
    async fn duplicate_families_return_unprocessable() {
        let doc = catalog(&[("Inter", "sans-serif"), ("inter", "sans-serif")]);
        let (status, body) = post_validate("/validate", doc.to_string()).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let report: ValidationReport = serde_json::from_slice(&body).expect("parse report");
        assert_eq!(report.verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn strict_flag_turns_quality_warnings_into_failure() {
        let doc = catalog(&[("Lora", "serif")]);

        let (status, _) = post_validate("/validate", doc.to_string()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post_validate("/validate?strict=true", doc.to_string()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let report: ValidationReport = serde_json::from_slice(&body).expect("parse report");
        assert!(report.strict);
    }

    #[tokio::test]
    async fn unparseable_body_is_bad_request() {
        let (status, body) = post_validate("/validate", "{\"items\": 3}".to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let text = String::from_utf8(body).expect("utf8 body");
        assert!(text.contains("invalid type"), "body: {text}");
    }
}
