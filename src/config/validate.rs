// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{FlowConfig, FlowdagConfig, RawConfigFile, parse_duration};
use crate::errors::{FlowdagError, Result};

impl TryFrom<RawConfigFile> for FlowdagConfig {
    type Error = FlowdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(FlowdagConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(cfg)?;
    validate_flow_identities(cfg)?;
    for flow in cfg.flow.iter() {
        validate_flow_options(flow)?;
        validate_job_dependencies(flow)?;
        validate_dag(flow)?;
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stream.queue_capacity == Some(0) {
        return Err(FlowdagError::ConfigError(
            "[stream].queue_capacity must be >= 1 (got 0); omit it for an unbounded stream"
                .to_string(),
        ));
    }

    let positive = [
        (
            "[stream].lease_call_timeout_millis",
            cfg.stream.lease_call_timeout_millis as i64,
        ),
        (
            "[stream].consumer_poll_interval_millis",
            cfg.stream.consumer_poll_interval_millis as i64,
        ),
        ("[sla].default_flow_sla_millis", cfg.sla.default_flow_sla_millis),
        (
            "[sla].default_job_start_sla_millis",
            cfg.sla.default_job_start_sla_millis,
        ),
        ("[enforcer].interval_millis", cfg.enforcer.interval_millis as i64),
        ("[lease].ttl_millis", cfg.lease.ttl_millis as i64),
    ];
    for (option, value) in positive {
        if value <= 0 {
            return Err(FlowdagError::ConfigError(format!(
                "{option} must be positive (got {value})"
            )));
        }
    }

    if cfg.lease.instance_id.trim().is_empty() {
        return Err(FlowdagError::ConfigError(
            "[lease].instance_id must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_flow_identities(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for flow in cfg.flow.iter() {
        let flow_id = flow.flow_id()?;
        if !seen.insert(flow_id.clone()) {
            return Err(FlowdagError::ConfigError(format!(
                "flow '{flow_id}' is declared more than once"
            )));
        }
    }
    Ok(())
}

fn validate_flow_options(flow: &FlowConfig) -> Result<()> {
    if flow.job.is_empty() {
        return Err(FlowdagError::ConfigError(format!(
            "flow '{}/{}' must contain at least one [flow.job.<name>] section",
            flow.group, flow.name
        )));
    }

    for sla in [&flow.flow_sla, &flow.job_start_sla].into_iter().flatten() {
        if parse_duration(sla)?.is_zero() {
            return Err(FlowdagError::ConfigError(format!(
                "flow '{}/{}' has a zero SLA '{sla}'",
                flow.group, flow.name
            )));
        }
    }
    Ok(())
}

fn validate_job_dependencies(flow: &FlowConfig) -> Result<()> {
    for (name, job) in flow.job.iter() {
        for dep in job.after.iter() {
            if !flow.job.contains_key(dep) {
                return Err(FlowdagError::ConfigError(format!(
                    "job '{}' of flow '{}/{}' has unknown dependency '{}' in `after`",
                    name, flow.group, flow.name, dep
                )));
            }
            if dep == name {
                return Err(FlowdagError::ConfigError(format!(
                    "job '{}' of flow '{}/{}' cannot depend on itself in `after`",
                    name, flow.group, flow.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(flow: &FlowConfig) -> Result<()> {
    // Edge direction: dep -> job, so `after = ["A"]` on B adds A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in flow.job.keys() {
        graph.add_node(name.as_str());
    }

    for (name, job) in flow.job.iter() {
        for dep in job.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(FlowdagError::DagCycle(format!(
            "cycle detected in flow '{}/{}' involving job '{}'",
            flow.group,
            flow.name,
            cycle.node_id()
        ))),
    }
}
