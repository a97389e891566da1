use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use slide_limit::{Limiter, RuleSet, RuleTable};
use tower::BoxError;
use tower::ServiceBuilder;
use tower_slide::{BearerSubject, GateError, ManagedRateLimitLayer, spawn_sweeper};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt::init();

    // 1. Setup Rules: 10 per second, 100 per minute, per bearer subject
    let rules = RuleSet::from_pairs([
        (10, Duration::from_secs(1)),
        (100, Duration::from_secs(60)),
    ])?;
    let limiter = Arc::new(Limiter::new(RuleTable::shared(rules)));
    let _sweeper = spawn_sweeper(&limiter, Duration::from_secs(30));

    // 2. Setup Managed Layer, keyed by the token's `sub` claim.
    // Over-limit callers wait up to 500ms for their window to slide, then get a 408.
    let managed_layer = ManagedRateLimitLayer::<_, _, Request>::new(
        limiter,
        BearerSubject,
        Duration::from_millis(500),
    );

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Slide!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_gate_error))
                // 2. The middle layer: introduces BoxError
                .layer(managed_layer)
                // 3. Converts the Route's Infallible to BoxError for the managed layer
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Deadline misses become 408, anything else from the stack a 500
async fn handle_gate_error(err: BoxError) -> impl IntoResponse {
    if let Some(gate_err) = err.downcast_ref::<GateError>() {
        gate_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
