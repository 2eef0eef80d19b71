use crate::models::session::ClientContext;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest user agent kept on a session row.
const MAX_USER_AGENT_LEN: usize = 512;

/// Request ID assigned by [`RequestLogger`], read back through `local_cache`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    fn new() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy)]
struct RequestStart(Instant);

/// Fairing that adds request ID to all requests and logs request/response information
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let request_id = RequestId::new();
        let method = request.method();
        let uri = request.uri();

        // Store request_id in local_cache for later retrieval
        request.local_cache(|| Some(request_id.clone()));
        request.local_cache(|| Some(RequestStart(Instant::now())));

        info!(
            request_id = %request_id.0,
            method = %method,
            uri = %uri,
            "incoming request"
        );
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let request_id = request
            .local_cache(|| None::<RequestId>)
            .as_ref()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let status = response.status();
        let method = request.method();
        let uri = request.uri();
        let elapsed_ms = request
            .local_cache(|| None::<RequestStart>)
            .as_ref()
            .map(|start| start.0.elapsed().as_millis() as u64)
            .unwrap_or_default();

        // Add request_id to response headers for client tracking
        response.set_header(Header::new("X-Request-Id", request_id.clone()));

        // Add security headers
        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));
        response.set_header(Header::new("X-Frame-Options", "DENY"));
        response.set_header(Header::new("Cache-Control", "no-store"));

        // Log response with appropriate level based on status
        if status.class().is_server_error() || status.class().is_client_error() {
            warn!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                elapsed_ms,
                "request completed with error"
            );
        } else {
            info!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                elapsed_ms,
                "request completed"
            );
        }
    }
}

// ── ClientInfo guard ──────────────────────────────────────────────────────────

/// Device context of the incoming request: client IP and `User-Agent`.
pub struct ClientInfo(pub ClientContext);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientInfo {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        let ip_address = req.client_ip().map(|ip| ip.to_string());
        let user_agent = req.headers().get_one("User-Agent").map(truncate_user_agent);
        Outcome::Success(ClientInfo(ClientContext { ip_address, user_agent }))
    }
}

impl<'a> OpenApiFromRequest<'a> for ClientInfo {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

fn truncate_user_agent(raw: &str) -> String {
    match raw.char_indices().nth(MAX_USER_AGENT_LEN) {
        Some((cut, _)) => raw[..cut].to_string(),
        None => raw.to_string(),
    }
}
