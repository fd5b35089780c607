//! Checks that the pipeline's external dependencies are usable.

use std::path::Path;

use sclip_worker::{Collaborators, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.output_dir).await?;
    ensure_dir(&config.cache_dir).await?;

    let collaborators = Collaborators::from_config(&config)?;
    let mut failed = false;
    for (name, result) in [
        ("transcriber", collaborators.transcriber.check().await),
        ("analyzer", collaborators.analyzer.check().await),
        ("cutter", collaborators.cutter.check().await),
    ] {
        match result {
            Ok(()) => println!("worker-selfcheck: {} ok", name),
            Err(e) => {
                println!("worker-selfcheck: {} FAILED: {}", name, e);
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("one or more dependencies unavailable");
    }
    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))
}
