use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::middleware::ClientInfo;
use crate::models::role::Capability;
use crate::models::session::RevokeAllResponse;
use crate::models::token::{RefreshRequest, TokenPair};
use crate::models::user::LoginRequest;
use crate::service::auth::AuthService;
use crate::service::refresh_rotator::RefreshRotator;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;
use validator::Validate;

/// Exchange credentials for an access/refresh token pair
///
/// When the account already holds the maximum number of active sessions,
/// the oldest ones are signed out to make room.
#[openapi(tag = "Authentication")]
#[post("/login", data = "<payload>")]
pub async fn post_login(auth: &State<AuthService>, client: ClientInfo, payload: Json<LoginRequest>) -> Result<Json<TokenPair>, AppError> {
    payload.validate()?;

    let pair = auth.login(&payload.email, &payload.password, client.0).await?;
    Ok(Json(pair))
}

/// Rotate a refresh token into a new token pair
///
/// A refresh token works exactly once. Presenting it again is treated as theft.
#[openapi(tag = "Authentication")]
#[post("/refresh", data = "<payload>")]
pub async fn post_refresh(rotator: &State<RefreshRotator>, client: ClientInfo, payload: Json<RefreshRequest>) -> Result<Json<TokenPair>, AppError> {
    payload.validate()?;

    let pair = rotator.rotate(&payload.refresh_token, client.0).await?;
    Ok(Json(pair))
}

/// End the current session, or every session with `?all=true`
#[openapi(tag = "Authentication")]
#[post("/logout?<all>")]
pub async fn post_logout(auth: &State<AuthService>, current_user: CurrentUser, all: Option<bool>) -> Result<Json<RevokeAllResponse>, AppError> {
    current_user.require(Capability::ManageOwnSessions)?;
    let revoked_count = auth.logout(&current_user, all.unwrap_or(false)).await?;
    Ok(Json(RevokeAllResponse { revoked_count }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![post_login, post_refresh, post_logout]
}
