use crate::models::role::Role;
use rocket::serde::Deserialize;
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Account record owned by the surrounding system. Read-only here.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub tenant_id: Uuid,
    pub is_active: bool,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}
