use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    capture_supervisor::init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    if let Err(e) = capture_supervisor::run(config_path).await {
        tracing::error!("{} ({})", e, e.code());
        return Err(e.into());
    }
    Ok(())
}
