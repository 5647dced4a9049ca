//! The drinks menu API
//!
//! Anyone may read the menu. Reading recipes and changing the menu require
//! an Auth0 access token granting the matching permission.

use barista_auth::Authority;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod routes;
mod store;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = config::Opts::parse();
    let auth_config = opts.auth_config()?;

    let authority = Authority::from_config(&auth_config)?;
    if let Some(interval) = opts.refresh_interval() {
        let _refresh = authority.spawn_refresh(interval);
    }

    tracing::info!(
        issuer = %auth_config.issuer,
        audience = %auth_config.audience,
        jwks_url = %auth_config.jwks_url,
        "authority configured"
    );

    let state = routes::AppState::new(authority, store::DrinkStore::default());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(opts.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
