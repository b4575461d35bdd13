//! End-to-end rehearsal tests.
//!
//! Drives the full workflow — discovery, cutover, promotion, standby
//! housekeeping — from a fleet description, the same path the binary
//! takes.

use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;

use fleetswap_cli::{run_simulation, FleetFile, SimulationOptions};
use fleetswap_cutover::CutoverError;

const ROTATION: &str = r#"
    [fleet]
    service = "webapp"

    [simulation]
    warmup_polls = 1
    drain_polls = 1

    [cutover]
    wait_timeout_secs = 60
    poll_interval_secs = 5
    standby_load_balancers = ["webapp-post"]
    await_deregistration = true
    verify_standby = true

    [[groups]]
    id = "webapp-17"
    role = "live"
    instances = ["i-a1", "i-a2"]
    load_balancers = ["webapp-prod"]

    [[groups]]
    id = "webapp-18"
    role = "pre"
    instances = ["i-b1", "i-b2"]

    [[load_balancers]]
    id = "webapp-prod"
    kind = "classic-elb"

    [[load_balancers]]
    id = "webapp-post"
    kind = "classic-elb"
"#;

fn lbs(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn full_rotation_promotes_retires_and_parks_the_old_group() {
    let file = FleetFile::from_toml(ROTATION).unwrap();
    let report = run_simulation(&file, &SimulationOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outcome.promoted, "webapp-18");
    assert_eq!(report.outcome.retired.as_deref(), Some("webapp-17"));
    assert_eq!(report.moved, vec!["webapp-prod".to_string()]);
    assert_eq!(report.standby_attached, vec!["webapp-post".to_string()]);
    assert!(report.deregistered);
    assert!(report.standby_verified);

    assert_eq!(report.final_attachments["webapp-18"], lbs(&["webapp-prod"]));
    assert_eq!(report.final_attachments["webapp-17"], lbs(&["webapp-post"]));
}

#[tokio::test(start_paused = true)]
async fn first_deployment_uses_the_explicit_balancer_list() {
    let description = r#"
        [fleet]
        service = "webapp"

        [cutover]
        load_balancers = ["webapp-prod"]
        wait_timeout_secs = 60

        [[groups]]
        id = "webapp-01"
        role = "pre"
        instances = ["i-01"]

        [[load_balancers]]
        id = "webapp-prod"
        kind = "target-group"
    "#;

    let file = FleetFile::from_toml(description).unwrap();
    let report = run_simulation(&file, &SimulationOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outcome.promoted, "webapp-01");
    assert_eq!(report.outcome.retired, None);
    assert!(report.standby_attached.is_empty());
    assert_eq!(report.final_attachments["webapp-01"], lbs(&["webapp-prod"]));
}

#[tokio::test(start_paused = true)]
async fn no_live_group_and_no_explicit_list_is_an_error() {
    let description = r#"
        [fleet]
        service = "webapp"

        [[groups]]
        id = "webapp-01"
        role = "pre"
        instances = ["i-01"]
    "#;

    let file = FleetFile::from_toml(description).unwrap();
    let err = run_simulation(&file, &SimulationOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nothing to cut over"));
}

#[tokio::test(start_paused = true)]
async fn stalled_balancer_fails_the_rehearsal_with_a_rollback() {
    let description = r#"
        [fleet]
        service = "webapp"

        [simulation]
        stalled_load_balancers = ["webapp-prod"]

        [cutover]
        wait_timeout_secs = 30
        poll_interval_secs = 5

        [[groups]]
        id = "webapp-17"
        role = "live"
        instances = ["i-a1"]
        load_balancers = ["webapp-prod"]

        [[groups]]
        id = "webapp-18"
        role = "pre"
        instances = ["i-b1"]

        [[load_balancers]]
        id = "webapp-prod"
        kind = "classic-elb"
    "#;

    let file = FleetFile::from_toml(description).unwrap();
    let err = run_simulation(&file, &SimulationOptions::default())
        .await
        .unwrap_err();

    match err.downcast_ref::<CutoverError>() {
        Some(CutoverError::HealthCheckTimeout { unhealthy, .. }) => {
            assert!(!unhealthy.is_empty());
        }
        other => panic!("expected a health timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn command_line_overrides_shorten_the_wait() {
    let file = FleetFile::from_toml(ROTATION).unwrap();
    let options = SimulationOptions {
        wait_timeout: Some(Duration::from_secs(45)),
        poll_interval: Some(Duration::from_secs(1)),
    };
    let report = run_simulation(&file, &options).await.unwrap();
    assert_eq!(report.outcome.promoted, "webapp-18");
}

#[tokio::test(start_paused = true)]
async fn descriptions_load_from_disk() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(ROTATION.as_bytes()).unwrap();

    let file = FleetFile::from_path(tmp.path()).unwrap();
    let report = run_simulation(&file, &SimulationOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome.retired.as_deref(), Some("webapp-17"));
}
