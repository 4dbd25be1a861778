use crate::ingest::classifier::{Classification, Classifier};
use crate::ingest::normalizer::{self, NormalizedRecord, PageviewRecord};
use crate::ingest::privacy;
use crate::ingest::site::{ResolveError, SiteRegistry};
use crate::storage::counters::{ActivityEntry, CounterStore, StoreError};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

/// Inbound tracking payload.
///
/// `page` is required even for custom events; it is simply ignored when an
/// event payload is present.
#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub domain: String,
    pub page: String,
    #[serde(default)]
    pub event: Option<EventPayload>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub screen_resolution: Option<String>,
}

/// Custom event payload carried inside a tracking request.
#[derive(Debug, Deserialize)]
pub struct EventPayload {
    pub name: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Shared application state for the ingestion handler.
pub struct AppState {
    pub sites: SiteRegistry,
    pub classifier: Classifier,
    pub store: CounterStore,
    pub recent_activity_cap: usize,
}

/// Terminal rejection of a tracking request, mapped onto HTTP statuses.
#[derive(Debug)]
pub enum TrackError {
    /// The `ip` field was present but not a valid address.
    InvalidIp,
    Resolve(ResolveError),
    IpExcluded,
    BotExcluded,
    Storage(StoreError),
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIp => write!(f, "Field 'ip' is not a valid IP address"),
            Self::Resolve(e) => write!(f, "{e}"),
            Self::IpExcluded => write!(f, "Requests from this IP are excluded"),
            Self::BotExcluded => write!(f, "Bot traffic is excluded for this site"),
            Self::Storage(e) => write!(f, "Storage error: {e}"),
        }
    }
}

impl std::error::Error for TrackError {}

impl From<ResolveError> for TrackError {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidIp => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            Self::Resolve(ResolveError::UnknownDomain | ResolveError::TrackingDisabled) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            Self::Resolve(ResolveError::InvalidDomainKey)
            | Self::IpExcluded
            | Self::BotExcluded => (StatusCode::FORBIDDEN, self.to_string()),
            Self::Storage(e) => {
                tracing::error!(error = %e, "Counter aggregation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

/// POST /track — the ingestion pipeline.
///
/// Resolve/authorize → privacy filter → classify → normalize → aggregate.
/// Every stage may short-circuit with a terminal rejection; no later stage
/// runs after a short-circuit.
pub async fn track(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TrackRequest>,
) -> Result<Json<serde_json::Value>, TrackError> {
    let body_ip = match payload.ip.as_deref() {
        Some(raw) => Some(raw.parse::<IpAddr>().map_err(|_| TrackError::InvalidIp)?),
        None => None,
    };

    let domain_key = headers.get("x-domain-key").and_then(|v| v.to_str().ok());
    let site = state.sites.resolve(&payload.domain, domain_key)?;

    let client_ip = body_ip.or_else(|| header_ip(&headers));
    if let Some(ip) = client_ip {
        if privacy::ip_excluded(&site.excluded_networks, ip) {
            return Err(TrackError::IpExcluded);
        }
    }

    let user_agent = payload.user_agent.as_deref().or_else(|| {
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
    });
    let classification = state.classifier.classify(user_agent, client_ip);
    if site.exclude_bots && classification.is_bot {
        return Err(TrackError::BotExcluded);
    }

    let (_, query) = normalizer::split_page_url(&payload.page);
    let redacted = privacy::redact_query(&query, &site.excluded_params);

    let record = normalizer::normalize(&site, &payload, &classification, &redacted, Utc::now());
    state
        .store
        .apply(site.id, record.date(), &record.metrics())
        .map_err(TrackError::Storage)?;

    if let NormalizedRecord::Pageview(pageview) = &record {
        let entry = activity_entry(pageview, &payload, &classification);
        if let Err(e) = state
            .store
            .append_activity(site.id, &entry, state.recent_activity_cap)
        {
            tracing::warn!(error = %e, site_id = site.id, "Recent activity append failed");
        }
    }

    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Build the recent-activity row for a pageview. Unlike the dimension
/// counters this always carries classification fields, new visit or not.
fn activity_entry(
    record: &PageviewRecord,
    request: &TrackRequest,
    classification: &Classification,
) -> ActivityEntry {
    let clamp = |field: &Option<String>| {
        field
            .as_deref()
            .map(|value| normalizer::sanitize(value, normalizer::VALUE_MAX))
    };
    ActivityEntry {
        path: record.path.clone(),
        referrer: clamp(&request.referrer),
        os: classification.os.clone(),
        browser: classification.browser.clone(),
        device: classification.device_type.clone(),
        country: clamp(&classification.country),
        city: clamp(&classification.city),
        language: request
            .language
            .as_deref()
            .map(|l| normalizer::sanitize(l, normalizer::LANGUAGE_MAX)),
        timestamp: record.timestamp,
    }
}

/// Extract the client IP from proxy headers, checking X-Forwarded-For
/// first. Used only when the payload does not carry an `ip` field.
fn header_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .and_then(|s| s.parse().ok())
}
