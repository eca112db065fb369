// src/dag/plan.rs

//! Compiled per-job execution plans and the values derived from their config.

use std::collections::BTreeMap;

use crate::errors::{FlowdagError, Result};
use crate::types::DagId;

/// Flat job configuration carried by every plan.
pub type JobConfig = BTreeMap<String, String>;

/// Well-known job config keys.
pub mod keys {
    pub const FLOW_GROUP_KEY: &str = "flow.group";
    pub const FLOW_NAME_KEY: &str = "flow.name";
    pub const FLOW_EXECUTION_ID_KEY: &str = "flow.executionId";
    pub const JOB_GROUP_KEY: &str = "job.group";
    pub const JOB_NAME_KEY: &str = "job.name";

    pub const FLOW_SLA_TIME_KEY: &str = "flow.sla.time";
    pub const FLOW_SLA_TIMEUNIT_KEY: &str = "flow.sla.timeunit";
    pub const JOB_START_SLA_TIME_KEY: &str = "job.start.sla.time";
    pub const JOB_START_SLA_TIMEUNIT_KEY: &str = "job.start.sla.timeunit";
}

/// Flow SLA used when a flow declares none, or declares one we can't parse.
pub const DEFAULT_FLOW_SLA_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Job start SLA used when nothing else is configured.
pub const DEFAULT_JOB_START_SLA_MILLIS: i64 = 10 * 60 * 1000;

const REQUIRED_KEYS: [&str; 5] = [
    keys::FLOW_GROUP_KEY,
    keys::FLOW_NAME_KEY,
    keys::FLOW_EXECUTION_ID_KEY,
    keys::JOB_GROUP_KEY,
    keys::JOB_NAME_KEY,
];

/// Execution plan of a single job within a compiled flow.
///
/// Construction guarantees the identity keys are present, so every accessor
/// below is infallible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobExecutionPlan {
    config: JobConfig,
    flow_execution_id: i64,
}

impl JobExecutionPlan {
    pub fn new(config: JobConfig) -> Result<Self> {
        for key in REQUIRED_KEYS {
            match config.get(key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(FlowdagError::ConfigMalformed(format!(
                        "job config is missing required key '{key}'"
                    )));
                }
            }
        }

        let raw_id = &config[keys::FLOW_EXECUTION_ID_KEY];
        let flow_execution_id = raw_id.trim().parse::<i64>().map_err(|e| {
            FlowdagError::ConfigMalformed(format!(
                "'{}' must be an integer (got '{raw_id}'): {e}",
                keys::FLOW_EXECUTION_ID_KEY
            ))
        })?;

        Ok(Self {
            config,
            flow_execution_id,
        })
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn flow_group(&self) -> &str {
        &self.config[keys::FLOW_GROUP_KEY]
    }

    pub fn flow_name(&self) -> &str {
        &self.config[keys::FLOW_NAME_KEY]
    }

    pub fn flow_execution_id(&self) -> i64 {
        self.flow_execution_id
    }

    pub fn job_group(&self) -> &str {
        &self.config[keys::JOB_GROUP_KEY]
    }

    pub fn job_name(&self) -> &str {
        &self.config[keys::JOB_NAME_KEY]
    }

    pub fn dag_id(&self) -> DagId {
        DagId::new(self.flow_group(), self.flow_name(), self.flow_execution_id)
    }

    /// A flow starts when it is compiled; the execution id is that instant.
    pub fn flow_start_time(&self) -> i64 {
        self.flow_execution_id
    }

    /// `group.name.executionId` of the owning flow.
    pub fn fully_qualified_dag_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.flow_group(),
            self.flow_name(),
            self.flow_execution_id
        )
    }

    /// Flow completion SLA in millis, or `default_millis` when not configured.
    ///
    /// Returns `ConfigMalformed` if a value is present but unparseable.
    pub fn flow_sla_millis(&self, default_millis: i64) -> Result<i64> {
        Ok(sla_millis(
            &self.config,
            keys::FLOW_SLA_TIME_KEY,
            keys::FLOW_SLA_TIMEUNIT_KEY,
        )?
        .unwrap_or(default_millis))
    }

    /// Job start SLA in millis, or `default_millis` when not configured.
    pub fn job_start_sla_millis(&self, default_millis: i64) -> Result<i64> {
        Ok(sla_millis(
            &self.config,
            keys::JOB_START_SLA_TIME_KEY,
            keys::JOB_START_SLA_TIMEUNIT_KEY,
        )?
        .unwrap_or(default_millis))
    }
}

/// Unit for SLA values written into job config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaTimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl SlaTimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaTimeUnit::Milliseconds => "MILLISECONDS",
            SlaTimeUnit::Seconds => "SECONDS",
            SlaTimeUnit::Minutes => "MINUTES",
            SlaTimeUnit::Hours => "HOURS",
            SlaTimeUnit::Days => "DAYS",
        }
    }

    fn millis_per_unit(&self) -> i64 {
        match self {
            SlaTimeUnit::Milliseconds => 1,
            SlaTimeUnit::Seconds => 1_000,
            SlaTimeUnit::Minutes => 60_000,
            SlaTimeUnit::Hours => 3_600_000,
            SlaTimeUnit::Days => 86_400_000,
        }
    }

    pub fn to_millis(&self, amount: i64) -> Option<i64> {
        amount.checked_mul(self.millis_per_unit())
    }
}

impl std::str::FromStr for SlaTimeUnit {
    type Err = FlowdagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "MILLISECONDS" => Ok(SlaTimeUnit::Milliseconds),
            "SECONDS" => Ok(SlaTimeUnit::Seconds),
            "MINUTES" => Ok(SlaTimeUnit::Minutes),
            "HOURS" => Ok(SlaTimeUnit::Hours),
            "DAYS" => Ok(SlaTimeUnit::Days),
            other => Err(FlowdagError::ConfigMalformed(format!(
                "unknown SLA time unit '{other}'"
            ))),
        }
    }
}

/// Read `<time_key>` (+ optional `<unit_key>`, default MINUTES) as millis.
fn sla_millis(config: &JobConfig, time_key: &str, unit_key: &str) -> Result<Option<i64>> {
    let Some(raw) = config.get(time_key) else {
        return Ok(None);
    };

    let amount = raw.trim().parse::<i64>().map_err(|e| {
        FlowdagError::ConfigMalformed(format!("'{time_key}' = '{raw}' is not an integer: {e}"))
    })?;
    if amount < 0 {
        return Err(FlowdagError::ConfigMalformed(format!(
            "'{time_key}' must not be negative (got {amount})"
        )));
    }

    let unit = match config.get(unit_key) {
        Some(u) => u.parse::<SlaTimeUnit>()?,
        None => SlaTimeUnit::Minutes,
    };

    unit.to_millis(amount).map(Some).ok_or_else(|| {
        FlowdagError::ConfigMalformed(format!("'{time_key}' = {amount} {} overflows", unit.as_str()))
    })
}
