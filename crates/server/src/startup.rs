use std::{collections::BTreeMap, env, net::SocketAddr, sync::Arc};

use axum::Router;
use common::utils::logging::init_logging;
use configs::{AppConfig, CrudConfig};
use dotenvy::dotenv;
use models::SchemaRegistry;
use service::{DataService, Mapper, SeaOrmMapper};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::errors::StartupError;
use crate::routes::{self, AppState};

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// One dynamic-record service per registered model, all sharing `mapper`.
pub fn build_state<M: Mapper>(registry: &SchemaRegistry, mapper: Arc<M>, crud: &CrudConfig) -> AppState<M> {
    let services = registry
        .iter()
        .map(|schema| {
            let svc = DataService::new(Arc::clone(schema), Arc::clone(&mapper)).with_config(crud);
            (schema.name().to_string(), Arc::new(svc))
        })
        .collect::<BTreeMap<_, _>>();
    AppState::new(services)
}

pub fn build_app<M: Mapper + 'static>(registry: &SchemaRegistry, mapper: Arc<M>, crud: &CrudConfig) -> Router {
    routes::build_router(build_state(registry, mapper, crud), build_cors())
}

/// Host/port from config, with `SERVER_HOST`/`SERVER_PORT` taking precedence
fn bind_addr(cfg: &AppConfig) -> Result<SocketAddr, StartupError> {
    let host = env::var("SERVER_HOST").unwrap_or_else(|_| cfg.server.host.clone());
    let port = env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(cfg.server.port);
    format!("{host}:{port}")
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("bind address {host}:{port}: {e}")))
}

/// Public entry: build the app and run the HTTP server
pub async fn run() -> anyhow::Result<()> {
    dotenv().ok();
    let cfg = AppConfig::load_and_validate()?;
    init_logging(&cfg.server.log_format);

    let registry = SchemaRegistry::from_file(&cfg.crud.schema_path).map_err(StartupError::from)?;
    if registry.is_empty() {
        return Err(StartupError::InvalidConfig(format!("{} declares no models", cfg.crud.schema_path)).into());
    }

    let db = models::db::connect_with_config(&cfg.database).await?;
    let app = build_app(&registry, Arc::new(SeaOrmMapper::new(db)), &cfg.crud);

    let addr = bind_addr(&cfg)?;
    info!(%addr, models = ?registry.names(), "starting server crate");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
