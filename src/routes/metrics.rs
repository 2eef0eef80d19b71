use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::models::role::Capability;
use crate::service::metrics::SessionMetrics;
use rocket::http::ContentType;
use rocket::{State, get};
use rocket_okapi::openapi;

/// Prometheus text exposition of the session counters
#[openapi(skip)]
#[get("/")]
pub async fn get_metrics(metrics: &State<SessionMetrics>, current_user: CurrentUser) -> Result<(ContentType, String), AppError> {
    current_user.require(Capability::ViewMetrics)?;
    Ok((ContentType::Plain, metrics.render()))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![get_metrics]
}
