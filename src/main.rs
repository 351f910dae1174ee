#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mediagrab::run().await
}
