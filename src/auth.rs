use crate::error::app_error::AppError;
use crate::models::token::UserContext;
use crate::service::token_validator::TokenValidator;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::ops::Deref;

/// Caller identity established from a validated bearer access token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserContext);

impl Deref for CurrentUser {
    type Target = UserContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub(crate) fn parse_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some(token) = req.headers().get_one("Authorization").and_then(parse_bearer_token) else {
            return Outcome::Error((Status::Unauthorized, AppError::TokenMalformed));
        };

        let Some(validator) = req.rocket().state::<TokenValidator>() else {
            return Outcome::Error((Status::InternalServerError, AppError::MissingState("TokenValidator")));
        };

        match validator.validate(token).await {
            Ok(context) => {
                let current_user = CurrentUser(context);
                req.local_cache(|| Some(current_user.clone()));
                Outcome::Success(current_user)
            }
            Err(err) => {
                let status = Status::from(&err);
                if err.is_auth_failure() {
                    tracing::warn!(kind = err.kind(), uri = %req.uri(), "bearer token rejected");
                } else {
                    tracing::error!(error = ?err, uri = %req.uri(), "bearer token validation failed");
                }
                Outcome::Error((status, err))
            }
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Bearer access token. Obtain one via POST /auth/login.".to_string()),
            data: SecuritySchemeData::Http {
                scheme: "bearer".to_string(),
                bearer_format: Some("JWT".to_string()),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("bearerAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("bearerAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - Authentication required".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}
