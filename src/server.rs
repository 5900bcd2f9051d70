//! HTTP dispatch: per-flow fan-out, single-winner race, delayed deliveries.
//!
//! Every inbound request (except `GET /ping`) is matched concurrently
//! against the current flow snapshot. Exactly one matching flow claims the
//! winner flag and delivers the HTTP response after its configured delay;
//! the same flow's webhook, when present, fires on its own independent
//! delay. Both deliveries race the process-wide shutdown signal, and the
//! request does not complete until both have settled.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{HookClient, HookRequest};
use crate::compose;
use crate::config::{Flow, ResponseDefinition, WebHookDefinition};
use crate::matcher;
use crate::store::FlowStore;
use crate::template::{Clock, Resolver};

/// Shared state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FlowStore>,
    pub hook_client: Arc<dyn HookClient>,
    /// Process-wide shutdown signal; cancels pending delayed deliveries.
    pub shutdown: CancellationToken,
    /// Re-read the mapping directory on every request instead of relying on
    /// file system notifications.
    pub refresh_per_request: bool,
    pub clock: Arc<dyn Clock>,
}

/// Build the router. Every method and path funnels into [`dispatch`].
pub fn router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::GET && uri.path() == "/ping" {
        return "PONG".into_response();
    }

    if state.refresh_per_request {
        if let Err(error) = state.store.refresh() {
            warn!(%error, "unable to refresh flows");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let payload: Map<String, Value> = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            debug!(%error, "request body is not a JSON object");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let flows = state.store.snapshot();
    if flows.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let Some(flow) = claim_winner(&flows, &method, uri.path(), &headers, &payload).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    info!(
        method = %flow.request.method,
        path = %flow.request.path,
        "request matched flow"
    );

    respond(&state, flow, payload, headers).await
}

/// Evaluate every flow concurrently, each against its own copy of the
/// decoded body. The first matching task to claim the winner flag becomes
/// the single responder; later matches are logged and discarded.
async fn claim_winner(
    flows: &Arc<Vec<Flow>>,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    payload: &Map<String, Value>,
) -> Option<Flow> {
    let claimed = Arc::new(AtomicBool::new(false));
    let (winner_tx, mut winner_rx) = mpsc::channel::<usize>(1);
    let mut attempts = JoinSet::new();

    for index in 0..flows.len() {
        let flows = Arc::clone(flows);
        let claimed = Arc::clone(&claimed);
        let winner_tx = winner_tx.clone();
        let method = method.as_str().to_string();
        let path = path.to_string();
        let headers = headers.clone();
        let payload = payload.clone();

        attempts.spawn(async move {
            let flow = &flows[index];
            if !matcher::matches(flow, &method, &path, &headers, &payload) {
                return;
            }

            if claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let _ = winner_tx.send(index).await;
            } else {
                info!(
                    method = %flow.request.method,
                    path = %flow.request.path,
                    "ignoring duplicate match"
                );
            }
        });
    }
    drop(winner_tx);

    while attempts.join_next().await.is_some() {}

    winner_rx.recv().await.map(|index| flows[index].clone())
}

/// Run both deliveries for the winning flow and wait for them to settle.
async fn respond(
    state: &AppState,
    flow: Flow,
    payload: Map<String, Value>,
    headers: HeaderMap,
) -> Response {
    let resolver = Resolver::with_clock(payload.clone(), headers, Arc::clone(&state.clock));

    let (response, ()) = tokio::join!(
        deliver_response(state, &flow.response, &payload, &resolver),
        deliver_webhook(state, flow.web_hook.as_ref(), &payload, &resolver),
    );

    response
}

/// Wait out the configured delay, then materialize the HTTP response. A
/// shutdown that fires first wins the race and the payload is never built.
async fn deliver_response(
    state: &AppState,
    definition: &ResponseDefinition,
    payload: &Map<String, Value>,
    resolver: &Resolver,
) -> Response {
    tokio::select! {
        _ = state.shutdown.cancelled() => {
            info!("canceling delayed response");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        _ = tokio::time::sleep(Duration::from_millis(definition.delay)) => {}
    }

    let body = compose::build_payload(
        definition.include_request,
        &definition.body,
        payload,
        resolver,
    );

    let code = if definition.code == 0 { 200 } else { definition.code };
    let status = StatusCode::from_u16(code).unwrap_or_else(|_| {
        warn!(code, "invalid response code, falling back to 200");
        StatusCode::OK
    });

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in resolved_headers(&definition.headers, resolver) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response_headers.insert(name, value);
            }
            _ => warn!(header = %name, "invalid header after resolution"),
        }
    }

    (status, response_headers, body).into_response()
}

/// Fire the configured webhook after its own delay, independent of the
/// response delivery. Failures are logged and absorbed.
async fn deliver_webhook(
    state: &AppState,
    definition: Option<&WebHookDefinition>,
    payload: &Map<String, Value>,
    resolver: &Resolver,
) {
    let Some(definition) = definition else {
        return;
    };

    tokio::select! {
        _ = state.shutdown.cancelled() => {
            info!("canceling delayed webhook");
            return;
        }
        _ = tokio::time::sleep(Duration::from_millis(definition.delay)) => {}
    }

    let body = compose::build_payload(
        definition.include_request,
        &definition.body,
        payload,
        resolver,
    );

    let request = HookRequest {
        method: definition.method.clone(),
        url: definition.path.clone(),
        headers: resolved_headers(&definition.headers, resolver),
        body,
    };

    debug!(url = %request.url, "sending webhook request");
    match state.hook_client.execute(request).await {
        Ok(response) => {
            info!(status = response.status, body = %response.body, "webhook delivered");
        }
        Err(error) => warn!(%error, "webhook delivery failed"),
    }
}

/// Resolve header templates. An entry whose value fails to resolve, or
/// resolves to a non-string, is left unset.
fn resolved_headers(templates: &HashMap<String, String>, resolver: &Resolver) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(templates.len());
    for (name, template) in templates {
        match resolver.resolve(template) {
            Ok(Value::String(value)) => headers.push((name.clone(), value)),
            Ok(_) => debug!(header = %name, "non-string header value skipped"),
            Err(error) => warn!(header = %name, %error, "header left unset"),
        }
    }
    headers
}
