//! HTTP surface: the client page and the websocket upgrade route.

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::relay::Relay;

/// Path the browser connects its websocket to.
pub const LIVE_PATH: &str = "/live";

const INDEX_TEMPLATE: &str = include_str!("../assets/index.html");
const WS_URL_PLACEHOLDER: &str = "{{ws_url}}";

/// Render the client page pointing at `ws_url`.
///
/// The URL is embedded as a JSON string literal.
#[must_use]
pub fn render_index(ws_url: &str) -> String {
    let literal = serde_json::Value::from(ws_url).to_string();
    INDEX_TEMPLATE.replace(WS_URL_PLACEHOLDER, &literal)
}

/// Hostname, IPv4 or bracketed IPv6 address, with an optional port.
fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b':' | b'[' | b']'))
}

/// Websocket URL the page should connect to, derived from request headers.
#[must_use]
pub fn live_url(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get(header::HOST)?
        .to_str()
        .ok()
        .filter(|host| is_valid_host(host))?;
    let secure = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    let scheme = if secure { "wss" } else { "ws" };
    Some(format!("{scheme}://{host}{LIVE_PATH}"))
}

async fn index_handler(headers: HeaderMap) -> Response {
    match live_url(&headers) {
        Some(ws_url) => {
            tracing::debug!(%ws_url, "Serving client page");
            Html(render_index(&ws_url)).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "Missing or invalid Host header").into_response(),
    }
}

/// Websocket upgrade handler; runs one relay per connection.
pub async fn live_handler(ws: WebSocketUpgrade, State(relay): State<Relay>) -> impl IntoResponse {
    ws.on_failed_upgrade(|e: axum::Error| tracing::warn!("Websocket upgrade failed: {e}"))
        .on_upgrade(move |socket| async move {
            // Errors are already logged by the relay and never leave it.
            let _ = relay.run(socket).await;
        })
}

/// Create the relay router.
///
/// # Example
/// ```ignore
/// let app = create_relay_router(relay);
/// axum::serve(listener, app).await?;
/// ```
#[must_use]
pub fn create_relay_router(relay: Relay) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(LIVE_PATH, get(live_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(relay)
}
