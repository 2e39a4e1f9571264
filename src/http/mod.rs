//! HTTP surface over the [`Scheduler`](crate::engine::Scheduler).
//!
//! | Method | Path | Success |
//! |---|---|---|
//! | GET | `/api/bookings` | 200, all bookings |
//! | GET | `/api/bookings/{date}` | 200, bookings on `YYYY-MM-DD` |
//! | POST | `/api/bookings` | 201, created booking |
//! | PUT | `/api/bookings/{id}` | 200, updated booking |
//! | DELETE | `/api/bookings/{id}` | 200, `{message}` |
//! | GET | `/api/health` | 200, `{status, timestamp}` |

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::AppState;

use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::observability::{REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};

pub fn router(state: AppState) -> Router {
    // `{date}` and `{id}` share one segment; axum cannot route two
    // differently named captures at the same position.
    Router::new()
        .route("/api/health", get(handlers::health))
        .route(
            "/api/bookings",
            get(handlers::list_all).post(handlers::create),
        )
        .route(
            "/api/bookings/:key",
            get(handlers::list_by_date)
                .put(handlers::update)
                .delete(handlers::delete),
        )
        .layer(middleware::from_fn(record_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn record_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let route = format!("{method} {route}");
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "route" => route, "status" => status.as_u16().to_string())
        .increment(1);
    if status.is_server_error() {
        tracing::warn!("request failed with {status}");
    }
    response
}
