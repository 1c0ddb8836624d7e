use clap::Parser;

mod cmd;
mod config;
mod tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cmd::Cli::parse().run().await
}
