use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::models::session::RevokeAllResponse;
use crate::service::auth::AuthService;
use rocket::serde::json::Json;
use rocket::{State, delete};
use rocket_okapi::openapi;
use uuid::Uuid;

/// Revoke every active session of a user
///
/// Admins reach users of their own tenant; super admins reach any tenant.
#[openapi(tag = "Administration")]
#[delete("/users/<id>/sessions")]
pub async fn revoke_user_sessions(auth: &State<AuthService>, current_user: CurrentUser, id: &str) -> Result<Json<RevokeAllResponse>, AppError> {
    let user_id = Uuid::parse_str(id).map_err(|_| AppError::BadRequest("Invalid user id".to_string()))?;
    let revoked_count = auth.admin_revoke_user_sessions(&current_user, &user_id).await?;
    Ok(Json(RevokeAllResponse { revoked_count }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![revoke_user_sessions]
}

#[cfg(test)]
mod tests {
    use crate::models::role::Role;
    use crate::test_utils::Harness;
    use rocket::http::{Header, Status};
    use serde_json::Value;

    const PASSWORD: &str = "correct-horse";

    #[rocket::async_test]
    async fn super_admin_reaches_any_tenant() {
        let harness = Harness::new(3).await;
        let root = harness
            .users
            .add_user("root@example.com", PASSWORD, Role::SuperAdmin, true)
            .await;
        let driver = harness.add_user("drv@example.com", PASSWORD).await;
        let root_pair = harness.login(&root.email, PASSWORD).await.unwrap();
        let driver_pair = harness.login(&driver.email, PASSWORD).await.unwrap();
        let client = harness.client().await;

        let response = client
            .delete(format!("/api/v1/admin/users/{}/sessions", driver.id))
            .header(Header::new("Authorization", format!("Bearer {}", root_pair.access_token)))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["revoked_count"], 1);
        assert!(harness.validator.validate(&driver_pair.access_token).await.is_err());
    }

    #[rocket::async_test]
    async fn manager_is_forbidden() {
        let harness = Harness::new(3).await;
        let manager = harness
            .users
            .add_user("mgr@example.com", PASSWORD, Role::Manager, true)
            .await;
        let driver = harness.add_user("drv@example.com", PASSWORD).await;
        let pair = harness.login(&manager.email, PASSWORD).await.unwrap();
        let client = harness.client().await;

        let response = client
            .delete(format!("/api/v1/admin/users/{}/sessions", driver.id))
            .header(Header::new("Authorization", format!("Bearer {}", pair.access_token)))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }
}
