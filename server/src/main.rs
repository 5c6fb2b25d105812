use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    huddle_server::run_main().await?;
    Ok(())
}
