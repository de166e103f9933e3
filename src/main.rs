use anyhow::{Context, Result};
use clap::Parser;
use graph_server_rs::services::graphs::{
    GraphJobService, PostgresRecordSource, PregenerationService, ScatterSvgRenderer,
};
use graph_server_rs::{cli, config, db, openapi, routes, state, static_assets};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind graph-server-rs listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind graph-server-rs listener on {addr}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!(
            "{}",
            serde_json::to_string_pretty(&openapi::openapi_json())?
        );
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::GraphConfig::from_env(args.static_root)?;
    let pool = db::connect_lazy(&config.database_url)?;

    let source = Arc::new(PostgresRecordSource::new(pool));
    let graph_jobs = Arc::new(GraphJobService::new(
        &config,
        source,
        Arc::new(ScatterSvgRenderer),
    ));

    let state = state::AppState {
        config: config.clone(),
        graph_jobs: graph_jobs.clone(),
    };

    let cancel = CancellationToken::new();
    graph_jobs.clone().start(cancel.clone());
    if config.pregeneration_enabled {
        PregenerationService::new(graph_jobs, &config).start(cancel.clone());
    }

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(60)
            .methods(vec![
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
            ])
            .use_headers()
            .finish()
            .context("failed to build rate limiter config")?,
    );

    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let app = routes::router(state)
        .layer(GovernorLayer::new(governor_conf))
        .fallback_service(static_assets::service(config.static_root.clone())?);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    tracing::info!(addr = %addr, "graph server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    cancel.cancel();
    Ok(())
}
