// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use flowdag::config::{load_and_validate, parse_duration, parse_str};
use flowdag::config::FlowdagConfig;
use flowdag::dag::plan::{DEFAULT_FLOW_SLA_MILLIS, DEFAULT_JOB_START_SLA_MILLIS};
use flowdag::errors::FlowdagError;
use flowdag::types::FlowId;
use flowdag_test_utils::builders::ConfigBuilder;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_config_file_is_loaded() {
    let file = config_file(
        r#"
[stream]
queue_capacity = 64
allow_reorder_on_defer = true
lease_call_timeout_millis = 250

[sla]
default_job_start_sla_millis = 60000

[enforcer]
interval_millis = 2000

[lease]
instance_id = "flowdag-1"
ttl_millis = 15000

[[flow]]
group = "etl"
name = "daily"
launch_on_start = true
flow_sla = "2h"
job_start_sla = "15m"

[flow.job.extract]
job_group = "ingest"
properties = { source = "s3://bucket/raw" }

[flow.job.load]
after = ["extract"]

[[flow]]
group = "etl"
name = "weekly"

[flow.job.report]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();

    let stream = cfg.stream_options();
    assert_eq!(stream.capacity, Some(64));
    assert!(stream.allow_reorder_on_defer);
    assert_eq!(stream.lease_call_timeout, Duration::from_millis(250));

    let sla = cfg.sla_defaults();
    assert_eq!(sla.flow_sla_millis, DEFAULT_FLOW_SLA_MILLIS);
    assert_eq!(sla.job_start_sla_millis, 60_000);
    assert_eq!(cfg.enforcer.interval(), Duration::from_secs(2));
    assert_eq!(cfg.lease.instance_id, "flowdag-1");
    assert_eq!(cfg.lease.ttl(), Duration::from_secs(15));

    assert_eq!(
        cfg.launch_on_start().unwrap(),
        vec![FlowId::new("etl", "daily").unwrap()]
    );

    let specs = cfg.flow_specs().unwrap();
    assert_eq!(specs.len(), 2);
    let daily = &specs[0];
    assert_eq!(daily.flow_sla, Some(Duration::from_secs(2 * 60 * 60)));
    assert_eq!(daily.job_start_sla, Some(Duration::from_secs(15 * 60)));
    assert_eq!(daily.jobs.len(), 2);

    let extract = daily.jobs.iter().find(|j| j.name == "extract").unwrap();
    assert_eq!(extract.group.as_deref(), Some("ingest"));
    assert_eq!(
        extract.properties.get("source").map(String::as_str),
        Some("s3://bucket/raw")
    );
    let load = daily.jobs.iter().find(|j| j.name == "load").unwrap();
    assert_eq!(load.after, vec!["extract"]);
}

#[test]
fn empty_config_uses_defaults() {
    let cfg = FlowdagConfig::try_from(parse_str("").unwrap()).unwrap();

    let stream = cfg.stream_options();
    assert_eq!(stream.capacity, None);
    assert!(!stream.allow_reorder_on_defer);
    assert_eq!(stream.lease_call_timeout, Duration::from_secs(5));
    assert_eq!(
        cfg.manager_options(true).poll_interval,
        Duration::from_millis(100)
    );
    assert_eq!(cfg.sla_defaults().job_start_sla_millis, DEFAULT_JOB_START_SLA_MILLIS);
    assert_eq!(cfg.lease.instance_id, "flowdag");
    assert!(cfg.flows.is_empty());
}

#[test]
fn zero_queue_capacity_is_rejected() {
    let raw = ConfigBuilder::new()
        .queue_capacity(0)
        .flow("etl", "daily", &[("extract", &[])])
        .raw();

    match FlowdagConfig::try_from(raw) {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("queue_capacity")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn zero_lease_call_timeout_is_rejected() {
    let result = FlowdagConfig::try_from(
        parse_str("[stream]\nlease_call_timeout_millis = 0\n").unwrap(),
    );

    match result {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("lease_call_timeout_millis")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn unknown_dependency_returns_config_error() {
    let raw = ConfigBuilder::new()
        .flow("etl", "daily", &[("load", &["NonExistent"])])
        .raw();

    match FlowdagConfig::try_from(raw) {
        Err(FlowdagError::ConfigError(msg)) => {
            assert!(msg.contains("unknown dependency"));
            assert!(msg.contains("NonExistent"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn self_dependency_returns_config_error() {
    let raw = ConfigBuilder::new()
        .flow("etl", "daily", &[("load", &["load"])])
        .raw();

    match FlowdagConfig::try_from(raw) {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("itself")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn dag_cycle_returns_structured_error() {
    let file = config_file(
        r#"
[[flow]]
group = "etl"
name = "daily"

[flow.job.A]
after = ["B"]

[flow.job.B]
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(FlowdagError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("etl/daily"));
        }
        other => panic!("Expected DagCycle error, got: {:?}", other),
    }
}

#[test]
fn duplicate_flows_are_rejected() {
    let raw = ConfigBuilder::new()
        .flow("etl", "daily", &[("extract", &[])])
        .flow("etl", "daily", &[("load", &[])])
        .raw();

    match FlowdagConfig::try_from(raw) {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("more than once")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn flow_without_jobs_is_rejected() {
    let raw = ConfigBuilder::new().flow("etl", "daily", &[]).raw();

    assert!(matches!(
        FlowdagConfig::try_from(raw),
        Err(FlowdagError::ConfigError(_))
    ));
}

#[test]
fn zero_huge_or_unparseable_flow_sla_is_rejected() {
    for sla in ["0s", "soon", "9999999999999999999d"] {
        let mut raw = ConfigBuilder::new()
            .flow("etl", "daily", &[("extract", &[])])
            .raw();
        raw.flow[0].flow_sla = Some(sla.to_string());

        assert!(
            matches!(
                FlowdagConfig::try_from(raw),
                Err(FlowdagError::ConfigError(_))
            ),
            "flow_sla = {sla:?} should be rejected"
        );
    }
}

#[test]
fn invalid_toml_is_a_toml_error() {
    let file = config_file("[stream\nqueue_capacity = ");

    assert!(matches!(
        load_and_validate(file.path()),
        Err(FlowdagError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();

    assert!(matches!(
        load_and_validate(dir.path().join("Flowdag.toml")),
        Err(FlowdagError::IoError(_))
    ));
}

#[test]
fn durations_parse_with_units() {
    assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    assert_eq!(parse_duration(" 15m ").unwrap(), Duration::from_secs(900));
    assert_eq!(parse_duration("2H").unwrap(), Duration::from_secs(7_200));
    assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));

    for bad in [
        "",
        "15",
        "m",
        "10 weeks",
        "-5s",
        "18446744073709551615d",
        "9223372036854775808ms",
    ] {
        assert!(
            matches!(parse_duration(bad), Err(FlowdagError::ConfigError(_))),
            "{bad:?} should not parse"
        );
    }
}
