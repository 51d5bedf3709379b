use axum::response::IntoResponse;

pub async fn metrics_handler() -> impl IntoResponse {
    // Prometheus scrapes the dedicated metrics port
    "Metrics available on metrics port"
}
