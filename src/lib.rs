use clap::Parser;

pub mod cli;
pub mod core;
pub mod models;
pub mod storage;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    cli::execute(cli::Cli::parse()).await
}
