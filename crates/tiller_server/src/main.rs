use anyhow::Context as _;
use std::path::PathBuf;
use std::sync::Arc;
use tiller_backend::CliAgentService;
use tiller_domain::paths;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_root = std::env::var_os(paths::TILLER_ROOT_ENV)
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".tiller"))
        })
        .context("cannot determine data root; set TILLER_ROOT")?;

    let services = Arc::new(CliAgentService::new(data_root)?);
    let addr = std::env::var("TILLER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4733".to_owned())
        .parse()
        .context("invalid TILLER_ADDR")?;

    let server = tiller_server::start(services, addr).await?;
    tracing::info!(addr = %server.addr, "tiller_server listening");
    server.handle.await?;
    Ok(())
}
