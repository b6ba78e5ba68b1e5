//! flotilla.toml configuration parser.
//!
//! Every section is optional. With no file at all the daemon runs a small
//! simulated fleet with in-memory state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use flotilla_coordinator::{CoordinatorConfig, StaticRepository};
use flotilla_core::{Assignment, Instance, Resources};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub http: HttpConfig,
    pub coordinator: CoordinatorSection,
    pub provisioner: ProvisionerConfig,
    pub repository: RepositoryConfig,
    pub state: StateConfig,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        // Validate durations up front.
        config.coordinator.to_coordinator_config()?;
        config.coordinator.refresh_interval()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 64000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorSection {
    pub environment: String,
    pub status_expiration: String,
    pub agent_timeout: String,
    pub refresh_interval: String,
    pub max_concurrent_refreshes: usize,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            environment: "local".to_string(),
            status_expiration: "30s".to_string(),
            agent_timeout: "5s".to_string(),
            refresh_interval: "10s".to_string(),
            max_concurrent_refreshes: 16,
        }
    }
}

impl CoordinatorSection {
    pub fn to_coordinator_config(&self) -> anyhow::Result<CoordinatorConfig> {
        Ok(CoordinatorConfig::default()
            .with_environment(self.environment.clone())
            .with_status_expiration(duration("status_expiration", &self.status_expiration)?)
            .with_agent_timeout(duration("agent_timeout", &self.agent_timeout)?)
            .with_max_concurrent_refreshes(self.max_concurrent_refreshes))
    }

    pub fn refresh_interval(&self) -> anyhow::Result<Duration> {
        let interval = duration("refresh_interval", &self.refresh_interval)?;
        if interval.is_zero() {
            bail!("refresh_interval must be greater than zero");
        }
        Ok(interval)
    }
}

fn duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).with_context(|| format!("invalid {field}: '{value}'"))
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

// ── Provisioner ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    /// Fixed instance lists; agents are reached over HTTP.
    Static,
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerConfig {
    pub kind: ProvisionerKind,
    pub agents: Vec<InstanceConfig>,
    pub coordinators: Vec<InstanceConfig>,
    pub simulated: SimulatedConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub id: String,
    #[serde(default)]
    pub location: String,
    pub internal_uri: String,
    pub external_uri: Option<String>,
}

impl InstanceConfig {
    pub fn to_instance(&self) -> Instance {
        Instance::new(
            self.id.clone(),
            self.location.clone(),
            self.internal_uri.clone(),
            self.external_uri.clone(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatedConfig {
    /// Agents present at startup.
    pub agents: usize,
    /// Hosts are named `{host_prefix}{n}`, starting at 1.
    pub host_prefix: String,
    /// Capacity of every simulated agent.
    pub capacity: Resources,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            agents: 3,
            host_prefix: "agent".to_string(),
            capacity: Resources::from([("cpu", 8), ("memory", 1024)]),
        }
    }
}

// ── Repository ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub binary_base: String,
    pub config_base: String,
    pub assignments: Vec<AssignmentConfig>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            binary_base: "http://localhost:8081/maven".to_string(),
            config_base: "http://localhost:8082/config".to_string(),
            assignments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentConfig {
    pub binary: String,
    pub config: String,
    #[serde(default)]
    pub resources: Resources,
}

impl RepositoryConfig {
    pub fn build(&self) -> StaticRepository {
        self.assignments.iter().fold(
            StaticRepository::new(self.binary_base.clone(), self.config_base.clone()),
            |repo, a| {
                repo.with_assignment(
                    Assignment::new(a.binary.clone(), a.config.clone()),
                    a.resources.clone(),
                )
            },
        )
    }
}

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub kind: StateKind,
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            kind: StateKind::Memory,
            path: PathBuf::from("/var/lib/flotilla/state.redb"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config.http.port, 64000);
        assert_eq!(config.provisioner.kind, ProvisionerKind::Simulated);
        assert_eq!(config.state.kind, StateKind::Memory);
        assert_eq!(config.coordinator.refresh_interval().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn full_file_parses() {
        let config = DaemonConfig::parse(
            r#"
            [http]
            port = 8080

            [coordinator]
            environment = "prod"
            status_expiration = "1m"
            agent_timeout = "500ms"
            refresh_interval = "5s"
            max_concurrent_refreshes = 4

            [provisioner]
            kind = "static"

            [[provisioner.agents]]
            id = "i-1"
            location = "/us-east-1/a"
            internal_uri = "http://10.0.0.1:7770/"

            [[provisioner.agents]]
            id = "i-2"
            internal_uri = "http://10.0.0.2:7770/"
            external_uri = "http://agent2.example.com:7770/"

            [repository]
            binary_base = "http://repo/maven"

            [[repository.assignments]]
            binary = "food.fruit:apple:1.0"
            config = "@apple:1.0"
            resources = { cpu = 1, memory = 512 }

            [state]
            kind = "redb"
            path = "/tmp/flotilla.redb"
            "#,
        )
        .unwrap();

        let coordinator = config.coordinator.to_coordinator_config().unwrap();
        assert_eq!(coordinator.environment, "prod");
        assert_eq!(coordinator.status_expiration, Duration::from_secs(60));
        assert_eq!(coordinator.agent_timeout, Duration::from_millis(500));
        assert_eq!(coordinator.max_concurrent_refreshes, 4);

        assert_eq!(config.provisioner.kind, ProvisionerKind::Static);
        let agents: Vec<Instance> = config.provisioner.agents.iter().map(|a| a.to_instance()).collect();
        assert_eq!(agents[0].external_uri, "http://10.0.0.1:7770/");
        assert_eq!(agents[1].external_uri, "http://agent2.example.com:7770/");

        assert_eq!(
            config.repository.assignments[0].resources,
            Resources::from([("cpu", 1), ("memory", 512)])
        );
        assert_eq!(config.state.kind, StateKind::Redb);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = DaemonConfig::parse("[coordinator]\nagent_timeout = \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("agent_timeout"));
    }

    #[test]
    fn zero_refresh_interval_is_rejected() {
        assert!(DaemonConfig::parse("[coordinator]\nrefresh_interval = \"0s\"\n").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(DaemonConfig::parse("[coordinator]\nrefresh = \"5s\"\n").is_err());
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn huge_minute_count_is_rejected() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert!(DaemonConfig::parse(&format!("[coordinator]\nagent_timeout = \"{}m\"\n", u64::MAX)).is_err());
    }
}
