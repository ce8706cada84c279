//! Immutable Tales agent daemon - entry point.
//!
//! Connects to the chain node, subscribes to the story factory, and keeps
//! reacting to events until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use tales_agent::{
    AgentError, CompletionsGenerator, OnChainBackend, StoryAgent, StoryFactory,
};

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = tales_agent::AgentConfig::from_env()?;
    tracing::info!(
        rpc_url = %config.chain.rpc_url,
        factory = %config.chain.factory_address,
        account = %config.chain.agent_account,
        "starting agent"
    );

    let provider = Arc::new(
        ethrpc::Provider::connect(&config.chain.rpc_url)
            .await
            .map_err(tales_agent::ConnectionError::Node)?,
    );
    let factory = StoryFactory::new(
        Arc::clone(&provider),
        config.chain.factory_address,
        config.chain.agent_account,
    )
    .with_confirm_timeout(config.confirm_timeout);
    let backend = Arc::new(OnChainBackend::new(factory));

    let generator = Arc::new(
        CompletionsGenerator::new(config.completions_client())
            .with_timeout(config.generation_timeout)
            .with_max_attempts(config.generation_attempts),
    );

    let agent = StoryAgent::new(backend, generator).with_health_interval(config.health_check_interval);
    agent.start().await?;
    tracing::info!("agent is running and listening for events");

    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install interrupt handler, stopping");
    }
    tracing::info!("interrupt received, stopping agent");
    agent.stop().await;

    // Give in-flight confirmations a moment before the runtime goes away.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
