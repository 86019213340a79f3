use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use study_fetch_proxy::config::ServiceConfig;
use study_fetch_proxy::engine::cache::StudyCache;
use study_fetch_proxy::engine::orchestrator::FetchOrchestrator;
use study_fetch_proxy::engine::service::StudyService;
use study_fetch_proxy::logging::init_tracing;
use study_fetch_proxy::server::handler::ProxyServer;
use study_fetch_proxy::source::orthanc_source::OrthancSource;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env()?;
    info!(
        "archive={} token length={} cache ttl={}h",
        config.archive_url,
        config.auth_token.len(),
        config.cache_ttl_hours
    );

    let source = Arc::new(OrthancSource::from_config(&config)?);
    let cache = Arc::new(StudyCache::new(config.cache_ttl()));
    let service = Arc::new(StudyService::new(source, cache, FetchOrchestrator::new()));

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let server = ProxyServer::start(Arc::clone(&service), addr).await?;
    info!("endpoints on {}:", server.local_addr());
    info!("  POST /fetch-study       - aggregate previews for a study");
    info!("  POST /fetch-instances   - aggregate previews for explicit instances");
    info!("  GET  /instance-preview  - single preview passthrough");
    info!("  GET  /study-series/{{id}} - series listing for a study");
    info!("  GET  /health            - liveness check");
    info!("  GET  /cache-stats       - cache statistics");
    info!("  POST /clear-cache       - clear cache");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    service.shutdown();
    server.shutdown().await;
    Ok(())
}
