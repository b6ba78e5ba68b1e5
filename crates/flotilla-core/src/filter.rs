//! Slot and agent filters.
//!
//! A filter is a plain value: a handful of optional predicates, each a list
//! of accepted values. Values under one key are OR'ed together and keys are
//! AND'ed, so `host=a*&host=b*&state=running` selects running slots on
//! hosts starting with `a` or `b`. An empty filter matches everything.

use std::net::IpAddr;

use regex::{Regex, RegexBuilder};

use crate::error::{CoreError, CoreResult};
use crate::types::{AgentLifecycleState, AgentStatus, SlotLifecycleState, SlotStatus};

/// Shell-style glob: `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    /// Compile a case-sensitive glob.
    pub fn new(pattern: &str) -> CoreResult<Self> {
        Self::compile(pattern, false)
    }

    /// Compile a glob that ignores ASCII case (host names).
    pub fn case_insensitive(pattern: &str) -> CoreResult<Self> {
        Self::compile(pattern, true)
    }

    fn compile(pattern: &str, ignore_case: bool) -> CoreResult<Self> {
        let mut re = String::with_capacity(pattern.len() + 8);
        re.push('^');
        for c in pattern.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');

        let regex = RegexBuilder::new(&re)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|source| CoreError::InvalidGlob {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Host portion of a URI, if it has one.
pub fn uri_host(uri: &str) -> Option<String> {
    let parsed: http::Uri = uri.parse().ok()?;
    parsed
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn any_glob(globs: &[Glob], candidates: &[Option<String>]) -> bool {
    globs.is_empty()
        || globs.iter().any(|g| {
            candidates
                .iter()
                .flatten()
                .any(|candidate| g.is_match(candidate))
        })
}

fn ip_candidates(hosts: &[Option<String>]) -> Vec<Option<String>> {
    hosts
        .iter()
        .map(|h| {
            h.as_deref()
                .and_then(|h| h.parse::<IpAddr>().ok())
                .map(|ip| ip.to_string())
        })
        .collect()
}

fn any_prefix(prefixes: &[String], id: &str) -> bool {
    let id = id.to_ascii_lowercase();
    prefixes.is_empty() || prefixes.iter().any(|p| id.starts_with(p.as_str()))
}

// ── Slot filter ────────────────────────────────────────────────────

/// Predicate over slots, built from `host`, `ip`, `state`, `binary`,
/// `config`, `uuid`, and `instance` query keys.
#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    hosts: Vec<Glob>,
    ips: Vec<Glob>,
    states: Vec<SlotLifecycleState>,
    binaries: Vec<Glob>,
    configs: Vec<Glob>,
    uuids: Vec<String>,
    instances: Vec<String>,
}

impl SlotFilter {
    /// Filter that matches every slot.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, glob: Glob) -> Self {
        self.hosts.push(glob);
        self
    }

    pub fn with_ip(mut self, glob: Glob) -> Self {
        self.ips.push(glob);
        self
    }

    pub fn with_state(mut self, state: SlotLifecycleState) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_binary(mut self, glob: Glob) -> Self {
        self.binaries.push(glob);
        self
    }

    pub fn with_config(mut self, glob: Glob) -> Self {
        self.configs.push(glob);
        self
    }

    /// Match slots whose id starts with `prefix`.
    pub fn with_uuid(mut self, prefix: &str) -> Self {
        self.uuids.push(prefix.to_ascii_lowercase());
        self
    }

    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instances.push(instance_id.to_string());
        self
    }

    /// Build a filter from decoded query pairs.
    pub fn from_query<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> CoreResult<Self> {
        let mut filter = Self::all();
        for (key, value) in pairs {
            filter = match key {
                "host" => filter.with_host(Glob::case_insensitive(value)?),
                "ip" => filter.with_ip(Glob::new(value)?),
                "state" => filter.with_state(value.parse()?),
                "binary" => filter.with_binary(Glob::new(value)?),
                "config" => filter.with_config(Glob::new(value)?),
                "uuid" => filter.with_uuid(value),
                "instance" => filter.with_instance(value),
                other => return Err(CoreError::UnknownFilterKey(other.to_string())),
            };
        }
        Ok(filter)
    }

    /// True when no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.ips.is_empty()
            && self.states.is_empty()
            && self.binaries.is_empty()
            && self.configs.is_empty()
            && self.uuids.is_empty()
            && self.instances.is_empty()
    }

    pub fn matches(&self, slot: &SlotStatus) -> bool {
        let hosts = [uri_host(&slot.self_uri), uri_host(&slot.external_uri)];

        let binary = slot.assignment.as_ref().map(|a| a.binary.clone());
        let config = slot.assignment.as_ref().map(|a| a.config.clone());

        any_glob(&self.hosts, &hosts)
            && any_glob(&self.ips, &ip_candidates(&hosts))
            && (self.states.is_empty() || self.states.contains(&slot.state))
            && any_glob(&self.binaries, &[binary])
            && any_glob(&self.configs, &[config])
            && any_prefix(&self.uuids, &slot.id.to_string())
            && (self.instances.is_empty() || self.instances.contains(&slot.instance_id))
    }
}

// ── Agent filter ───────────────────────────────────────────────────

/// Predicate over agents, built from `host`, `ip`, `state`, `uuid`, and
/// `instance` query keys.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    hosts: Vec<Glob>,
    ips: Vec<Glob>,
    states: Vec<AgentLifecycleState>,
    uuids: Vec<String>,
    instances: Vec<String>,
}

impl AgentFilter {
    /// Filter that matches every agent.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, glob: Glob) -> Self {
        self.hosts.push(glob);
        self
    }

    pub fn with_ip(mut self, glob: Glob) -> Self {
        self.ips.push(glob);
        self
    }

    pub fn with_state(mut self, state: AgentLifecycleState) -> Self {
        self.states.push(state);
        self
    }

    /// Match agents whose id starts with `prefix`.
    pub fn with_uuid(mut self, prefix: &str) -> Self {
        self.uuids.push(prefix.to_ascii_lowercase());
        self
    }

    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instances.push(instance_id.to_string());
        self
    }

    /// Build a filter from decoded query pairs.
    pub fn from_query<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> CoreResult<Self> {
        let mut filter = Self::all();
        for (key, value) in pairs {
            filter = match key {
                "host" => filter.with_host(Glob::case_insensitive(value)?),
                "ip" => filter.with_ip(Glob::new(value)?),
                "state" => filter.with_state(value.parse()?),
                "uuid" => filter.with_uuid(value),
                "instance" => filter.with_instance(value),
                other => return Err(CoreError::UnknownFilterKey(other.to_string())),
            };
        }
        Ok(filter)
    }

    pub fn matches(&self, agent: &AgentStatus) -> bool {
        let hosts = [uri_host(&agent.internal_uri), uri_host(&agent.external_uri)];

        any_glob(&self.hosts, &hosts)
            && any_glob(&self.ips, &ip_candidates(&hosts))
            && (self.states.is_empty() || self.states.contains(&agent.state))
            && any_prefix(&self.uuids, &agent.agent_id)
            && (self.instances.is_empty() || self.instances.contains(&agent.instance_id))
    }
}
