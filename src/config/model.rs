// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{FlowSpec, JobSpec};
use crate::engine::{DagManagerOptions, SlaDefaults, StreamOptions};
use crate::errors::{FlowdagError, Result};
use crate::types::FlowId;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [stream]
/// queue_capacity = 128
///
/// [lease]
/// instance_id = "flowdag-1"
///
/// [[flow]]
/// group = "g"
/// name = "f"
/// flow_sla = "2h"
/// [flow.job.extract]
/// [flow.job.load]
/// after = ["extract"]
/// ```
///
/// All sections are optional and have reasonable defaults. Use
/// `FlowdagConfig::try_from` to get a validated view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub sla: SlaConfig,

    #[serde(default)]
    pub enforcer: EnforcerConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    /// Flows from `[[flow]]`.
    #[serde(default)]
    pub flow: Vec<FlowConfig>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct FlowdagConfig {
    pub stream: StreamConfig,
    pub sla: SlaConfig,
    pub enforcer: EnforcerConfig,
    pub lease: LeaseConfig,
    pub flows: Vec<FlowConfig>,
}

impl FlowdagConfig {
    /// Used by the validator once every check has passed.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            stream: raw.stream,
            sla: raw.sla,
            enforcer: raw.enforcer,
            lease: raw.lease,
            flows: raw.flow,
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            capacity: self.stream.queue_capacity,
            allow_reorder_on_defer: self.stream.allow_reorder_on_defer,
            lease_call_timeout: Duration::from_millis(self.stream.lease_call_timeout_millis),
        }
    }

    pub fn manager_options(&self, exit_when_idle: bool) -> DagManagerOptions {
        DagManagerOptions {
            poll_interval: Duration::from_millis(self.stream.consumer_poll_interval_millis),
            exit_when_idle,
        }
    }

    pub fn sla_defaults(&self) -> SlaDefaults {
        SlaDefaults {
            flow_sla_millis: self.sla.default_flow_sla_millis,
            job_start_sla_millis: self.sla.default_job_start_sla_millis,
        }
    }

    /// Flow specs for the catalog, one per `[[flow]]`.
    pub fn flow_specs(&self) -> Result<Vec<FlowSpec>> {
        self.flows.iter().map(FlowConfig::to_spec).collect()
    }

    /// Flows marked `launch_on_start`, in declaration order.
    pub fn launch_on_start(&self) -> Result<Vec<FlowId>> {
        self.flows
            .iter()
            .filter(|f| f.launch_on_start)
            .map(FlowConfig::flow_id)
            .collect()
    }
}

/// `[stream]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamConfig {
    /// Maximum queued tasks; omitted means unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    #[serde(default)]
    pub allow_reorder_on_defer: bool,

    #[serde(default = "default_lease_call_timeout_millis")]
    pub lease_call_timeout_millis: u64,

    #[serde(default = "default_consumer_poll_interval_millis")]
    pub consumer_poll_interval_millis: u64,
}

fn default_lease_call_timeout_millis() -> u64 {
    5_000
}

fn default_consumer_poll_interval_millis() -> u64 {
    100
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            allow_reorder_on_defer: false,
            lease_call_timeout_millis: default_lease_call_timeout_millis(),
            consumer_poll_interval_millis: default_consumer_poll_interval_millis(),
        }
    }
}

/// `[sla]` section: defaults for jobs whose config carries no SLA.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlaConfig {
    #[serde(default = "default_flow_sla_millis")]
    pub default_flow_sla_millis: i64,

    #[serde(default = "default_job_start_sla_millis")]
    pub default_job_start_sla_millis: i64,
}

fn default_flow_sla_millis() -> i64 {
    crate::dag::plan::DEFAULT_FLOW_SLA_MILLIS
}

fn default_job_start_sla_millis() -> i64 {
    crate::dag::plan::DEFAULT_JOB_START_SLA_MILLIS
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            default_flow_sla_millis: default_flow_sla_millis(),
            default_job_start_sla_millis: default_job_start_sla_millis(),
        }
    }
}

/// `[enforcer]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnforcerConfig {
    #[serde(default = "default_enforcer_interval_millis")]
    pub interval_millis: u64,
}

fn default_enforcer_interval_millis() -> u64 {
    10_000
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            interval_millis: default_enforcer_interval_millis(),
        }
    }
}

impl EnforcerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }
}

/// `[lease]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    #[serde(default = "default_lease_ttl_millis")]
    pub ttl_millis: u64,
}

fn default_instance_id() -> String {
    "flowdag".to_string()
}

fn default_lease_ttl_millis() -> u64 {
    30_000
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            ttl_millis: default_lease_ttl_millis(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }
}

/// One `[[flow]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlowConfig {
    pub group: String,

    pub name: String,

    /// Launch this flow when the binary starts.
    #[serde(default)]
    pub launch_on_start: bool,

    /// Duration string such as `"2h"`; written into every job config.
    #[serde(default)]
    pub flow_sla: Option<String>,

    /// Duration string such as `"15m"`.
    #[serde(default)]
    pub job_start_sla: Option<String>,

    /// Jobs from `[flow.job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobEntry>,
}

impl FlowConfig {
    pub fn flow_id(&self) -> Result<FlowId> {
        FlowId::new(self.group.clone(), self.name.clone())
    }

    pub fn to_spec(&self) -> Result<FlowSpec> {
        let mut spec = FlowSpec::new(self.flow_id()?);
        spec.flow_sla = self.flow_sla.as_deref().map(parse_duration).transpose()?;
        spec.job_start_sla = self
            .job_start_sla
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        spec.jobs = self
            .job
            .iter()
            .map(|(name, entry)| {
                let mut job = JobSpec::new(name.clone());
                job.group = entry.job_group.clone();
                job.after = entry.after.clone();
                job.properties = entry.properties.clone();
                job
            })
            .collect();

        Ok(spec)
    }
}

/// `[flow.job.<name>]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobEntry {
    /// Defaults to the flow group.
    #[serde(default)]
    pub job_group: Option<String>,

    /// Jobs that must complete before this one starts.
    #[serde(default)]
    pub after: Vec<String>,

    /// Opaque properties carried into the job config.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Parse a duration string like `"500ms"`, `"30s"`, `"15m"`, `"2h"` or `"7d"`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(FlowdagError::ConfigError("empty duration string".to_string()));
    }

    // Find the boundary between digits and suffix.
    let idx = s.chars().position(|c| !c.is_ascii_digit()).ok_or_else(|| {
        FlowdagError::ConfigError(format!("duration '{s}' is missing a unit suffix"))
    })?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part.parse().map_err(|e| {
        FlowdagError::ConfigError(format!("invalid duration number '{num_part}': {e}"))
    })?;
    let unit = unit_part.trim().to_lowercase();

    let millis_per_unit: u64 = match unit.as_str() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        "d" => 24 * 60 * 60 * 1_000,
        _ => {
            return Err(FlowdagError::ConfigError(format!(
                "unsupported duration unit '{unit}'; expected ms, s, m, h or d"
            )));
        }
    };

    // SLAs travel as i64 millis, so anything beyond that is rejected here.
    value
        .checked_mul(millis_per_unit)
        .filter(|millis| i64::try_from(*millis).is_ok())
        .map(Duration::from_millis)
        .ok_or_else(|| FlowdagError::ConfigError(format!("duration '{s}' is too large")))
}
