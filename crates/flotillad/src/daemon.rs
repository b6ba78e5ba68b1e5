//! Daemon assembly: backends from config, and the background refresh loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use flotilla_coordinator::{
    AgentClientFactory, Coordinator, HttpAgentClientFactory, Provisioner, SimulatedFleet,
    StaticProvisioner,
};
use flotilla_state::{DurableStateManager, InMemoryStateManager, StateManager};

use crate::config::{DaemonConfig, ProvisionerKind, StateKind};

/// Build a coordinator with the backends named in `config`.
pub fn build_coordinator(config: &DaemonConfig) -> anyhow::Result<Coordinator> {
    let coordinator_config = config.coordinator.to_coordinator_config()?;
    let (provisioner, clients) = build_fleet(config);
    let repository = Arc::new(config.repository.build());
    let state = build_state(config)?;

    Ok(Coordinator::new(
        coordinator_config,
        provisioner,
        repository,
        state,
        clients,
    ))
}

fn build_fleet(config: &DaemonConfig) -> (Arc<dyn Provisioner>, Arc<dyn AgentClientFactory>) {
    let provisioner = &config.provisioner;
    match provisioner.kind {
        ProvisionerKind::Static => {
            let agents = provisioner.agents.iter().map(|a| a.to_instance()).collect();
            let coordinators = provisioner
                .coordinators
                .iter()
                .map(|c| c.to_instance())
                .collect();
            info!(agents = provisioner.agents.len(), "static provisioner configured");
            (
                Arc::new(StaticProvisioner::new(agents, coordinators)),
                Arc::new(HttpAgentClientFactory),
            )
        }
        ProvisionerKind::Simulated => {
            let simulated = &provisioner.simulated;
            let fleet = SimulatedFleet::new().with_default_capacity(simulated.capacity.clone());
            for n in 1..=simulated.agents {
                let host = format!("{}{n}", simulated.host_prefix);
                let instance = fleet.add_agent(&host, simulated.capacity.clone());
                debug!(instance_id = %instance.id, %host, "simulated agent added");
            }
            info!(agents = simulated.agents, "simulated fleet configured");
            (Arc::new(fleet.clone()), Arc::new(fleet))
        }
    }
}

fn build_state(config: &DaemonConfig) -> anyhow::Result<Arc<dyn StateManager>> {
    match config.state.kind {
        StateKind::Memory => Ok(Arc::new(InMemoryStateManager::new())),
        StateKind::Redb => {
            let path = &config.state.path;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let store = DurableStateManager::open(path)
                .with_context(|| format!("opening state store {}", path.display()))?;
            info!(path = ?path, "state store opened");
            Ok(Arc::new(store))
        }
    }
}

/// Refresh agent status every `interval` until `shutdown` flips.
///
/// The first refresh runs immediately.
pub async fn refresh_loop(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "refresh loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = coordinator.refresh().await {
                    warn!(error = %e, "refresh failed");
                }
            }
            _ = shutdown.changed() => {
                info!("refresh loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::AgentFilter;

    #[tokio::test]
    async fn default_config_builds_simulated_fleet() {
        let coordinator = build_coordinator(&DaemonConfig::default()).unwrap();
        coordinator.refresh().await.unwrap();

        let agents = coordinator.agents(&AgentFilter::all()).await;
        assert_eq!(agents.len(), 3);
        assert!(agents.iter().all(|a| a.is_online()));
    }

    #[tokio::test]
    async fn redb_state_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.state.kind = StateKind::Redb;
        config.state.path = dir.path().join("nested").join("state.redb");

        build_coordinator(&config).unwrap();
        assert!(config.state.path.exists());
    }

    #[tokio::test]
    async fn refresh_loop_stops_on_shutdown() {
        let coordinator = Arc::new(build_coordinator(&DaemonConfig::default()).unwrap());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(refresh_loop(
            coordinator.clone(),
            Duration::from_millis(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(coordinator.agents(&AgentFilter::all()).await.len(), 3);
    }
}
