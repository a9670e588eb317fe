// Item Service
//
// A small JSON API backed by a primary and its read replicas: listings and
// lookups are served by replicas, inserts go to the primary.
//
// Run with: SQLSPLIT_CONFIG=sqlsplit.toml cargo run -p item-service

mod handler;
mod interactor;
mod repository;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use sqlsplit::{ClusterConfig, Context};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::interactor::ItemInteractor;
use crate::repository::SqlItemRepository;

const CONFIG_ENV: &str = "SQLSPLIT_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlsplit=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "sqlsplit.toml".to_string());
    let config = ClusterConfig::load(&path).with_context(|| format!("loading {path}"))?;
    tracing::info!(config = %path, driver = %config.driver, replicas = config.replicas.len(), "Connecting");

    let router = Arc::new(sqlsplit_sqlx::connect(&config).await?);
    let repository = SqlItemRepository::new(router.clone(), config.driver);
    repository
        .migrate(&Context::background())
        .await
        .context("creating the items table")?;
    let interactor = Arc::new(ItemInteractor::new(Arc::new(repository)));

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Item service listening");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let io = TokioIo::new(stream);
        let interactor = interactor.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handler::handle(req, interactor.clone()));
            if let Err(error) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(%peer, %error, "Error serving connection");
            }
        });
    }

    tracing::info!("Shutting down");
    router.close().await?;
    Ok(())
}
