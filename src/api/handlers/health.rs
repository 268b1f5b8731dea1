pub const HEALTH_MESSAGE: &str = "PDF Merger Service is running!";

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = String)
    ),
    tag = "system"
)]
pub async fn health_check() -> &'static str {
    HEALTH_MESSAGE
}
