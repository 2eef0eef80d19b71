use crate::database::user::UserDirectory;
use crate::error::app_error::AppError;
use crate::models::user::User;
use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::{Arc, LazyLock};

/// Verified against when the account does not exist, so both paths pay for one Argon2 run.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"dummy-never-matches", &salt)
        .map(|hash| hash.to_string())
        .ok()
});

/// Checks a presented password against the stored Argon2 hash.
#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserDirectory>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// The active flag is only checked once the password matched.
    pub async fn verify(&self, email: &str, password: &str) -> Result<User, AppError> {
        let Some(user) = self.users.get_user_by_email(email).await? else {
            dummy_verify(password);
            return Err(AppError::InvalidCredentials);
        };

        verify_password(&user.password_hash, password)?;

        if !user.is_active {
            return Err(AppError::AccountInactive);
        }

        Ok(user)
    }
}

pub fn verify_password(stored_hash: &str, password: &str) -> Result<(), AppError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::InvalidCredentials)
}

fn dummy_verify(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref()
        && let Ok(parsed) = PasswordHash::new(hash)
    {
        let _ = Argon2::default().verify_password(password.as_bytes(), &parsed);
    }
}
