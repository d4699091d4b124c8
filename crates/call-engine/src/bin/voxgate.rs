//! voxgate server binary.

use clap::Parser;

use voxgate_call_engine::server::{init_tracing, Server};
use voxgate_call_engine::ProcessConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProcessConfig::parse();
    init_tracing(&config.log_level);

    // Startup failures (unreachable switch, unusable credentials,
    // broken database) exit non-zero here.
    let server = Server::start(config).await?;
    server.run().await;
    Ok(())
}
