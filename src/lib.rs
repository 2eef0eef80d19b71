mod auth;
mod config;
mod database;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;

use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::DeadlineSessionStore;
use crate::db::stage_db;
use crate::middleware::RequestLogger;
use crate::routes as app_routes;
use crate::service::SessionServices;
use crate::service::email::EmailNotifier;
use crate::service::events::{EventDispatcher, LogNotifier, Notifier};
use crate::service::metrics::SessionMetrics;
use crate::service::token_codec::TokenCodec;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG overrides the configured level, e.g.
    //   RUST_LOG=session_keeper::service=debug
    //   RUST_LOG=info,session_keeper::routes=trace
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // try_init: a second build in the same process keeps the first subscriber
    let _ = if json_format { subscriber.json().try_init() } else { subscriber.try_init() };
}

fn build_cors(cors_config: &config::CorsConfig) -> Result<CorsOptions, String> {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    if is_wildcard && cors_config.allow_credentials {
        return Err("Invalid CORS configuration: wildcard origins (*) cannot be combined with credentials".to_string());
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    Ok(CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Delete, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Authorization", "Accept"]),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    })
}

fn get_swagger_config(openapi_url: &str) -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: openapi_url.to_string(),
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (auth_routes, auth_openapi) = app_routes::auth::routes();
    let (session_routes, session_openapi) = app_routes::session::routes();
    let (admin_routes, admin_openapi) = app_routes::admin::routes();
    let (health_routes, health_openapi) = app_routes::health::routes();
    let (metrics_routes, metrics_openapi) = app_routes::metrics::routes();

    vec![
        RouteSpec {
            path: "/auth",
            routes: auth_routes,
            openapi: auth_openapi,
        },
        RouteSpec {
            path: "/sessions",
            routes: session_routes,
            openapi: session_openapi,
        },
        RouteSpec {
            path: "/admin",
            routes: admin_routes,
            openapi: admin_openapi,
        },
        RouteSpec {
            path: "/health",
            routes: health_routes,
            openapi: health_openapi,
        },
        RouteSpec {
            path: "/metrics",
            routes: metrics_routes,
            openapi: metrics_openapi,
        },
    ]
}

/// Mounts every API route and catcher under `base_path`.
pub(crate) fn mount_api(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let route_specs = collect_route_specs();

    if enable_swagger {
        let mut openapi_list = Vec::new();
        for spec in route_specs {
            rocket = rocket.mount(format!("{}{}", base_path, spec.path), spec.routes);
            openapi_list.push((spec.path, spec.openapi));
        }

        match marge_spec_list(&openapi_list) {
            Ok(openapi_docs) => {
                let settings = rocket_okapi::settings::OpenApiSettings::default();
                rocket = rocket.mount(base_path, vec![get_openapi_route(openapi_docs, &settings)]);

                let docs_path = join_base_path(base_path, "docs");
                let openapi_url = join_base_path(base_path, "openapi.json");
                rocket = rocket.mount(docs_path, make_swagger_ui(&get_swagger_config(&openapi_url)));
            }
            Err(err) => tracing::error!("Could not merge OpenAPI spec, docs disabled: {}", err),
        }
    } else {
        for spec in route_specs {
            rocket = rocket.mount(format!("{}{}", base_path, spec.path), spec.routes);
        }
    }

    rocket.register(
        base_path,
        catchers![
            app_routes::error::bad_request,
            app_routes::error::unauthorized,
            app_routes::error::forbidden,
            app_routes::error::not_found,
            app_routes::error::unprocessable_entity,
            app_routes::error::internal_error,
            app_routes::error::service_unavailable
        ],
    )
}

fn build_notifier(config: &config::EmailConfig) -> Arc<dyn Notifier> {
    if !config.enabled {
        tracing::info!("email disabled, eviction notices go to the log");
        return Arc::new(LogNotifier);
    }

    match EmailNotifier::new(config.clone()) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            tracing::error!(error = %e, "email notifier unavailable, eviction notices go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// Wires the session services over the Postgres pool staged by `stage_db`.
fn stage_services(config: Config) -> AdHoc {
    AdHoc::try_on_ignite("Session services", move |rocket| async move {
        let Some(pool) = rocket.state::<PgPool>().cloned() else {
            tracing::error!("Session services need the database pool to be staged first");
            return Err(rocket);
        };

        let metrics = match SessionMetrics::new() {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!("Failed to register session metrics: {}", e);
                return Err(rocket);
            }
        };

        let repo = PostgresRepository::new(pool);
        let store = Arc::new(DeadlineSessionStore::new(
            Arc::new(repo.clone()),
            Duration::from_millis(config.session.store_timeout_ms),
        ));
        let events = EventDispatcher::spawn(build_notifier(&config.email), Arc::new(repo.clone()), &config.events, metrics.clone());

        let services = SessionServices::build(
            TokenCodec::new(&config.token),
            store,
            Arc::new(repo),
            events,
            metrics,
            &config.session,
        );

        tracing::info!(
            max_active_sessions = config.session.max_active_sessions,
            replay_revokes_all_sessions = config.session.replay_revokes_all_sessions,
            "session services ready"
        );
        Ok(services.manage(rocket))
    })
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    let base_path = normalize_base_path(&config.api.base_path);
    let rocket = rocket::build()
        .configure(
            rocket::Config::figment()
                .merge(("address", config.server.address.clone()))
                .merge(("port", config.server.port)),
        )
        .attach(RequestLogger)
        .attach(stage_db(config.database.clone()))
        .attach(stage_services(config.clone()));

    let rocket = match build_cors(&config.cors).and_then(|options| options.to_cors().map_err(|e| e.to_string())) {
        Ok(cors) => rocket.attach(cors),
        Err(e) => {
            tracing::error!("CORS disabled: {}", e);
            rocket
        }
    };

    mount_api(rocket, &base_path, config.api.enable_swagger)
}
