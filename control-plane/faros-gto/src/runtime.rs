use kube::Client;
use tokio::task::JoinHandle;

use crate::{cluster::KubeCluster, config::GtoConfig, controller::run_controllers};

/// Spawn the tracking-object controllers.
pub fn spawn_controllers(
    client: Client,
    cfg: GtoConfig,
) -> JoinHandle<anyhow::Result<()>> {
    let cluster = KubeCluster::new(client, &cfg.field_manager);
    tokio::spawn(async move { run_controllers(cluster, cfg).await })
}

/// Run the controllers until they stop (signal or fatal error).
pub async fn run_all(client: Client, cfg: GtoConfig) -> anyhow::Result<()> {
    spawn_controllers(client, cfg).await?
}
