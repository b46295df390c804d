use anyhow::{Context, Result};
use cow_relayer::{
    api, chains::evm::EvmCustodyChain, load_config, AuthorizationSigner, CustodianSigner, MatchingService,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level)),
        )
        .init();

    info!("Starting CoW relayer v{}", env!("CARGO_PKG_VERSION"));

    let chain = Arc::new(EvmCustodyChain::connect(&config.chain)?);
    let signer = CustodianSigner::from_private_key(&config.chain.private_key, config.chain.signing_scheme)?;
    info!(
        "Custodian {} signing with {:?}",
        signer.custodian(),
        config.chain.signing_scheme
    );

    let service = Arc::new(MatchingService::new(
        config.clone(),
        chain.clone(),
        chain,
        Arc::new(signer),
    )?);
    service.initialize();

    let listener = TcpListener::bind(&config.api.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.listen_addr))?;
    info!("API listening on http://{}", config.api.listen_addr);

    axum::serve(listener, api::router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    info!("CoW relayer stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
