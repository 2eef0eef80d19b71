use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::models::role::Capability;
use crate::models::session::{RevokeAllResponse, RevokedReason, SessionInfo};
use crate::service::auth::AuthService;
use crate::service::revocation::RevocationService;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get};
use rocket_okapi::openapi;
use uuid::Uuid;

/// List the caller's active sessions
///
/// Metadata only; token material is never returned.
#[openapi(tag = "Sessions")]
#[get("/")]
pub async fn list_sessions(auth: &State<AuthService>, current_user: CurrentUser) -> Result<Json<Vec<SessionInfo>>, AppError> {
    current_user.require(Capability::ManageOwnSessions)?;
    Ok(Json(auth.active_sessions(&current_user).await?))
}

/// Revoke every session of the caller except the one making this request
#[openapi(tag = "Sessions")]
#[delete("/revoke-all-except-current")]
pub async fn revoke_all_except_current(revocation: &State<RevocationService>, current_user: CurrentUser) -> Result<Json<RevokeAllResponse>, AppError> {
    current_user.require(Capability::ManageOwnSessions)?;
    let revoked_count = revocation
        .revoke_all_except_current(&current_user.user_id, &current_user.session_id)
        .await?;
    Ok(Json(RevokeAllResponse { revoked_count }))
}

/// Revoke one of the caller's sessions
#[openapi(tag = "Sessions")]
#[delete("/<id>")]
pub async fn revoke_session(revocation: &State<RevocationService>, current_user: CurrentUser, id: &str) -> Result<Status, AppError> {
    current_user.require(Capability::ManageOwnSessions)?;
    let session_id = Uuid::parse_str(id).map_err(|_| AppError::BadRequest("Invalid session id".to_string()))?;
    revocation
        .revoke_own_session(&current_user.user_id, &session_id, RevokedReason::Logout)
        .await?;
    Ok(Status::NoContent)
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_sessions, revoke_all_except_current, revoke_session]
}
