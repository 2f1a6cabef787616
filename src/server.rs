use actix_web::{App, HttpResponse, HttpServer, Responder, dev::Server, get, web};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::error::Error;
use crate::history::PriceHistoryClient;
use crate::listing::parse_listing_url;
use crate::model::{Currency, EntityKey, Location};
use crate::notify::ChannelSink;
use crate::stats::Stats;

/// Shared handles behind every request.
pub struct AppState {
    pub history: Arc<PriceHistoryClient>,
    pub stats: Arc<Stats>,
    pub notifications: Arc<ChannelSink>,
}

// -------------------------
// Request / Response Types
// -------------------------

#[derive(Deserialize)]
struct HistoryQuery {
    url: String,
    /// Only points from the last `months` months (30 days each).
    months: Option<u32>,
}

#[derive(Serialize)]
struct SeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    price: f64,
}

#[derive(Serialize)]
struct HistoryResponse {
    entity: EntityKey,
    location: Location,
    currency: Currency,
    min: Option<f64>,
    max: Option<f64>,
    points: Vec<SeriesPoint>,
}

fn error_json(e: &Error) -> HttpResponse {
    let body = serde_json::json!({ "error": e.to_string() });
    match e {
        Error::InvalidUrl(_) => HttpResponse::BadRequest().json(body),
        Error::NoHistoryFound => HttpResponse::NotFound().json(body),
        _ => HttpResponse::BadGateway().json(body),
    }
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(
        "pricewatch online.\n\
         Status:\n  GET  /healthz\n  GET  /stats\n\
         History:\n  GET  /history?url=https://geizhals.de/...-a123.html&months=3\n\
         Stream:\n  GET  /notifications/stream (SSE)",
    )
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[get("/stats")]
async fn stats_endpoint(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.stats.snapshot())
}

#[get("/history")]
async fn history_endpoint(state: web::Data<AppState>, q: web::Query<HistoryQuery>) -> impl Responder {
    let listing = match parse_listing_url(&q.url) {
        Ok(l) => l,
        Err(e) => return error_json(&e),
    };
    let entity = listing.to_entity();
    let history = match state.history.get_history(&entity, listing.location).await {
        Ok(h) => h,
        Err(e) => {
            warn!(url = %q.url, "history lookup failed: {e}");
            return error_json(&e);
        }
    };

    // a window reaching past the representable range means no lower bound
    let since = q.months.and_then(|m| {
        OffsetDateTime::now_utc().checked_sub(time::Duration::days(30 * i64::from(m)))
    });
    let (min, max) = history.valid_range().unzip();
    HttpResponse::Ok().json(HistoryResponse {
        entity: history.entity,
        location: history.location,
        currency: history.location.currency(),
        min,
        max,
        points: history
            .carried_forward(since)
            .into_iter()
            .map(|(timestamp, price)| SeriesPoint { timestamp, price })
            .collect(),
    })
}

// --------------
// SSE streaming
// --------------

fn sse_event(event: &str, data_json: &str) -> Bytes {
    let payload = format!("event: {}\ndata: {}\n\n", event, data_json);
    Bytes::from(payload)
}

#[get("/notifications/stream")]
async fn notification_stream(state: web::Data<AppState>) -> impl Responder {
    let mut rx = state.notifications.subscribe();

    let stream = async_stream::stream! {
        yield Ok::<Bytes, actix_web::Error>(sse_event("ready", "{}"));
        loop {
            match rx.recv().await {
                Ok(intent) => {
                    let payload = serde_json::to_string(&intent).unwrap_or_else(|_| "{}".into());
                    yield Ok(sse_event("notification", &payload));
                }
                Err(RecvError::Lagged(skipped)) => {
                    yield Ok(sse_event("lagged", &format!(r#"{{"skipped":{skipped}}}"#)));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(healthz)
        .service(stats_endpoint)
        .service(history_endpoint)
        .service(notification_stream);
}

/// Binds the HTTP surface. The returned server runs once awaited.
pub fn serve(state: AppState, bind: &str) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    info!(%bind, "starting HTTP server");
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .disable_signals()
        .bind(bind)?
        .run();
    Ok(server)
}
