use crate::cli::{Args, StorageBackend};
use crate::state::{AppState, EngineSettings};
use crate::store::{MemoryStore, Store};
use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use axum_keycloak_auth::PassthroughMode;
use axum_keycloak_auth::instance::{KeycloakAuthInstance, KeycloakConfig};
use axum_keycloak_auth::layer::KeycloakAuthLayer;
use deadpool_diesel::Runtime;
use deadpool_diesel::postgres::{Manager, Pool};
use tracing::{info, warn};

pub mod access;
pub mod aggregate;
pub mod certificate;
pub mod cli;
pub mod course;
pub mod errors;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod model;
pub mod payloads;
pub mod progress;
pub mod response;
pub mod schema;
pub mod state;
pub mod store;

mod api;

pub fn init_router(args: &Args) -> anyhow::Result<Router> {
    info!("Initializing {:?} store...", args.storage);
    let store = init_store(args).context("Failed to initialize store")?;

    info!("Initializing Keycloak authentication layer...");
    let keycloak_layer =
        init_protection_layer(args).context("Failed to initialize Keycloak layer")?;

    info!("Initializing router...");
    let state = AppState::new(store, EngineSettings::from(args));
    Ok(init_router_internal(state, keycloak_layer))
}

pub fn init_test_router(state: AppState) -> Router {
    let device_api = device_routes();
    let teacher_api = teacher_routes();

    Router::new()
        .nest("/device", device_api)
        .nest("/teacher", teacher_api)
        .with_state(state)
}

fn init_router_internal(state: AppState, keycloak_layer: KeycloakAuthLayer<String>) -> Router {
    let device_api = device_routes();
    let teacher_api = teacher_routes().layer(keycloak_layer);

    Router::new()
        .nest("/device", device_api)
        .nest("/teacher", teacher_api)
        .with_state(state)
}

fn init_store(args: &Args) -> anyhow::Result<Store> {
    match args.storage {
        StorageBackend::Postgres => {
            let conn_str = args
                .connection_str
                .as_deref()
                .context("A connection string is required for the postgres backend")?;
            if args.seed_file.is_some() {
                warn!("Ignoring seed file: the postgres catalog lives in the database");
            }
            info!("Initializing database pool...");
            let pool = init_pool(conn_str, args.db_pool_max_size)
                .context("Failed to initialize database pool")?;
            Ok(Store::Postgres(pool))
        }
        StorageBackend::Memory => {
            let store = match &args.seed_file {
                Some(path) => MemoryStore::from_seed_file(path)?,
                None => {
                    warn!("Memory store started without a seed file; the catalog is empty");
                    MemoryStore::new()
                }
            };
            Ok(Store::Memory(store))
        }
    }
}

fn init_pool(conn_str: &str, max_size: u32) -> anyhow::Result<Pool> {
    let manager = Manager::new(conn_str, Runtime::Tokio1);
    let pool = Pool::builder(manager).max_size(max_size as usize).build()?;
    Ok(pool)
}

fn init_protection_layer(args: &Args) -> anyhow::Result<KeycloakAuthLayer<String>> {
    let config = KeycloakConfig::builder()
        .server(args.keycloak_server_url.clone())
        .realm(args.keycloak_realm.clone())
        .build();

    let instance = KeycloakAuthInstance::new(config);

    let audiences: Vec<String> = args
        .keycloak_audiences
        .split(',')
        .map(|audience| audience.trim().to_string())
        .filter(|audience| !audience.is_empty())
        .collect();

    let layer = KeycloakAuthLayer::builder()
        .instance(instance)
        .passthrough_mode(PassthroughMode::Block)
        .persist_raw_claims(false)
        .expected_audiences(audiences)
        .build();

    Ok(layer)
}

fn device_routes() -> Router<AppState> {
    Router::new()
        // public routes go here
        .route("/register_device", post(api::device::register_device))
        .route("/join_class", post(api::device::join_class))
        .route(
            "/update_video_progress",
            post(api::device::update_video_progress),
        )
        .route("/sync_progress", post(api::device::sync_progress))
        .route(
            "/get_device_progress/{device_id}",
            get(api::device::get_device_progress),
        )
}

fn teacher_routes() -> Router<AppState> {
    Router::new()
        // protected routes go here
        .route(
            "/get_student_roster",
            get(api::teacher::get_student_roster),
        )
        .route(
            "/get_student_progress",
            get(api::teacher::get_student_progress),
        )
        .route("/get_certificates", get(api::teacher::get_certificates))
        .route(
            "/approve_certificate",
            post(api::teacher::approve_certificate),
        )
}
