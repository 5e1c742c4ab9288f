use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::middleware::{Next, from_fn};
use actix_web::{Error, HttpResponse, Result, web};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::extractor::Record;
use crate::harvest::Harvester;
use crate::rate_limit::{RateDecision, RateGovernor, client_identifier};
use crate::sites::SiteRegistry;

pub const HARVEST_PATH: &str = "/api/scrape-news";
const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Clone)]
pub struct AppState {
    pub harvester: Arc<Harvester>,
    pub registry: Arc<SiteRegistry>,
    pub governor: Arc<RateGovernor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarvestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub articles: Vec<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HarvestResponse {
    pub fn success(articles: Vec<Record>) -> Self {
        Self {
            success: true,
            count: Some(articles.len()),
            articles,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            count: None,
            articles: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceSummary {
    pub name: String,
    pub url: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/health", web::get().to(health_check))
        .route("/api/sources", web::get().to(list_sources))
        .service(
            web::resource(HARVEST_PATH)
                .route(web::get().to(scrape_news))
                .wrap(from_fn(rate_limit)),
        );
}

pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "news-harvester"
    })))
}

pub async fn list_sources(state: web::Data<AppState>) -> Result<HttpResponse> {
    let sources: Vec<SourceSummary> = state
        .registry
        .sites()
        .iter()
        .map(|site| SourceSummary {
            name: site.name.clone(),
            url: site.url.clone(),
        })
        .collect();
    Ok(HttpResponse::Ok().json(sources))
}

/// Runs a full harvest. Per-site failures never reach the caller; only a fault of
/// the run itself turns into a 500.
pub async fn scrape_news(state: web::Data<AppState>) -> Result<HttpResponse> {
    let harvester = state.harvester.clone();
    let registry = state.registry.clone();

    // A spawned task turns a panic anywhere in the run into a JoinError
    let handle = tokio::spawn(async move { harvester.harvest(registry.sites()).await });

    let response = match handle.await {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(HarvestResponse::success(outcome.records)),
        Ok(Err(e)) => {
            log::error!("🔥 Global error: {}", e);
            HttpResponse::InternalServerError().json(HarvestResponse::failure(e.to_string()))
        }
        Err(e) => {
            log::error!("🔥 Global error: harvest task failed: {}", e);
            HttpResponse::InternalServerError()
                .json(HarvestResponse::failure("Unknown error occurred"))
        }
    };

    Ok(response)
}

pub fn request_client_identifier(headers: &HeaderMap) -> String {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    client_identifier(header("x-real-ip"), header("x-forwarded-for"))
}

/// Guards the harvest route; other routes are never counted
pub async fn rate_limit<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let client = request_client_identifier(req.headers());
    let decision = req
        .app_data::<web::Data<AppState>>()
        .map(|state| state.governor.check(&client));

    let remaining = match decision {
        Some(RateDecision::Denied { retry_after }) => {
            log::warn!("🚫 Rate limit exceeded for {}", client);
            let response = HttpResponse::TooManyRequests()
                .insert_header((RETRY_AFTER, retry_after.as_secs().max(1).to_string()))
                .json(serde_json::json!({
                    "success": false,
                    "error": RATE_LIMIT_MESSAGE,
                }));
            return Ok(req.into_response(response).map_into_right_body());
        }
        Some(RateDecision::Allowed { remaining }) => Some(remaining),
        None => None,
    };

    let mut res = next.call(req).await?;
    if let Some(remaining) = remaining {
        res.headers_mut().insert(
            HeaderName::from_static(RATE_LIMIT_REMAINING),
            HeaderValue::from(remaining),
        );
    }
    Ok(res.map_into_left_body())
}
