//! Integration tests for playbooks
//!
//! Each test runs a [`Playbook`] built from a parsed topology against the
//! fake cluster and checks the remote commands it produced.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use clusterdeck::error::Error;
use clusterdeck::executor::{ExecOptions, StepStatus};
use clusterdeck::factory::common::ServiceStatus;
use clusterdeck::factory::{CleanItem, StepOptions, StepType};
use clusterdeck::playbook::{Playbook, PlaybookStep};
use clusterdeck::progress::ProgressReporter;
use clusterdeck::storage::{Storage, CLEANED_CONTAINER_ID};
use common::*;

fn playbook(cluster: &Arc<FakeCluster>, cluster_id: &str) -> (Playbook, Arc<clusterdeck::storage::MemoryStorage>) {
    let (factory, storage) = factory(cluster_id);
    let playbook = Playbook::new(factory, connector(cluster)).with_progress(ProgressReporter::hidden());
    (playbook, storage)
}

fn step(step_type: StepType, dcs: &[Arc<clusterdeck::topology::DeployConfig>]) -> PlaybookStep {
    PlaybookStep::new(step_type, dcs.to_vec()).with_exec_options(ExecOptions::new().silent())
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[tokio::test]
async fn test_pull_image_once_per_host() {
    let cluster = FakeCluster::new();
    let dcs = deploy_configs(&["h1", "h2", "h3"], 0);
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(step(StepType::PullImage, &dcs));

    let report = playbook.run().await.unwrap();

    let outcome = report.outcome(StepType::PullImage).unwrap();
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.status, StepStatus::Success);

    let pulls = cluster.matching("docker pull");
    assert_eq!(pulls.len(), 3);
    let mut hosts: Vec<_> = pulls.iter().map(|e| e.host.clone()).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["h1", "h2", "h3"]);
    assert!(pulls.iter().all(|e| e.command == format!("docker pull {}", IMAGE)));
}

#[tokio::test]
async fn test_once_per_host_steps_deduplicate() {
    let cluster = FakeCluster::new();
    // Two etcd services plus two chunkserver replicas on h1, one etcd on h2.
    let dcs = deploy_configs(&["h1", "h2"], 2);
    assert_eq!(dcs.len(), 4);
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(step(StepType::PullImage, &dcs));

    let report = playbook.run().await.unwrap();

    assert_eq!(report.outcomes[0].records.len(), 2);
    assert_eq!(cluster.matching("docker pull").len(), 2);
}

#[tokio::test]
async fn test_create_container_skips_existing() {
    let cluster = FakeCluster::new();
    cluster.reply("docker create", "f00dfeed1234");
    let dcs = deploy_configs(&["h1", "h2", "h3"], 0);
    let (factory, storage) = factory("c1");
    storage
        .insert_service("c1", &factory.service_id(&dcs[1]), "abc123")
        .unwrap();
    let mut playbook =
        Playbook::new(factory, connector(&cluster)).with_progress(ProgressReporter::hidden());
    playbook.add_step(step(StepType::CreateContainer, &dcs));

    let report = playbook.run().await.unwrap();

    let creates = cluster.matching("docker create");
    let mut hosts: Vec<_> = creates.iter().map(|e| e.host.clone()).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["h1", "h3"]);
    assert!(cluster.executed().iter().all(|e| e.host != "h2"));

    let summary = report.outcomes[0].summary;
    assert_eq!(summary.success, 2);
    assert_eq!(summary.skipped, 1);

    let services = storage.services("c1").unwrap();
    assert_eq!(services.len(), 3);
    assert_eq!(
        services.iter().filter(|s| s.container_id == "f00dfeed1234").count(),
        2
    );
}

#[tokio::test]
async fn test_create_conflict_leaves_existing_container_alone() {
    let cluster = FakeCluster::new();
    cluster.fail("docker create", "Conflict. The container name is already in use");
    let dcs = deploy_configs(&["h1"], 0);
    let (mut playbook, storage) = playbook(&cluster, "c1");
    playbook.add_step(step(StepType::CreateContainer, &dcs));

    let err = playbook.run().await.unwrap_err();

    assert!(matches!(err, Error::StepFailed { ref step, .. } if step == "CREATE_CONTAINER"));
    assert_eq!(cluster.matching("docker ps -aq --filter label=clusterdeck.create=").len(), 1);
    assert!(cluster.matching("rm -f").is_empty());
    assert!(storage.services("c1").unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_pipeline_flows_container_ids() {
    let cluster = FakeCluster::new();
    cluster.reply("docker create", "c0ffee000001");
    let dcs = deploy_configs(&["h1"], 0);
    let (mut playbook, storage) = playbook(&cluster, "c1");
    for step_type in [
        StepType::PullImage,
        StepType::CreateContainer,
        StepType::SyncConfig,
        StepType::StartService,
    ] {
        playbook.add_step(step(step_type, &dcs));
    }

    let report = playbook.run().await.unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.outcomes.iter().all(|o| o.status == StepStatus::Success));
    assert_eq!(
        cluster.matching("docker start").last().map(|e| e.command.clone()),
        Some("docker start c0ffee000001".to_string())
    );
    assert_eq!(cluster.matching("docker cp").len(), 1);
    assert!(cluster
        .uploads()
        .iter()
        .any(|(host, path, _)| host == "h1" && path.starts_with("/tmp/clusterdeck-")));
    assert_eq!(storage.services("c1").unwrap()[0].container_id, "c0ffee000001");
}

#[tokio::test]
async fn test_start_skips_services_without_container() {
    let cluster = FakeCluster::new();
    let dcs = deploy_configs(&["h1", "h2"], 0);
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(step(StepType::StartService, &dcs));

    let report = playbook.run().await.unwrap();

    assert_eq!(report.outcomes[0].status, StepStatus::Skip);
    assert!(cluster.matching("docker start").is_empty());
}

// ============================================================================
// Ordering and Failure Tests
// ============================================================================

#[tokio::test]
async fn test_failed_step_stops_later_steps() {
    let cluster = FakeCluster::new();
    cluster.fail("hostname", "permission denied");
    let dcs = deploy_configs(&["h1", "h2"], 0);
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(step(StepType::CheckSshConnect, &dcs));
    playbook.add_step(step(StepType::PullImage, &dcs));
    playbook.add_step(step(StepType::CreateContainer, &dcs));

    let err = playbook.run().await.unwrap_err();

    match err {
        Error::StepFailed { step, summary, .. } => {
            assert_eq!(step, "CHECK_SSH_CONNECT");
            assert!(summary.failed >= 1);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(cluster.matching("docker").is_empty());
}

#[tokio::test]
async fn test_skip_error_keeps_going() {
    let cluster = FakeCluster::new();
    cluster.fail("hostname", "permission denied");
    let dcs = deploy_configs(&["h1", "h2"], 0);
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(
        PlaybookStep::new(StepType::CheckSshConnect, dcs.clone())
            .with_exec_options(ExecOptions::new().silent().with_skip_error(true)),
    );
    playbook.add_step(step(StepType::PullImage, &dcs));

    let report = playbook.run().await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].summary.failed, 2);
    assert_eq!(report.outcomes[0].status, StepStatus::Error);
    assert_eq!(cluster.matching("docker pull").len(), 2);
}

#[tokio::test]
async fn test_post_steps_run_after_failure() {
    let cluster = FakeCluster::new();
    cluster.fail("docker pull", "manifest unknown");
    let dcs = deploy_configs(&["h1"], 0);
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(step(StepType::PullImage, &dcs));
    playbook.add_post_step(step(StepType::GetHostDate, &dcs));

    let err = playbook.run().await.unwrap_err();

    assert!(matches!(err, Error::StepFailed { ref step, .. } if step == "PULL_IMAGE"));
    assert_eq!(cluster.matching("date +%s").len(), 1);
}

#[tokio::test]
async fn test_mismatched_configs_fail_before_dispatch() {
    let cluster = FakeCluster::new();
    let (mut playbook, _) = playbook(&cluster, "c1");
    playbook.add_step(PlaybookStep::new(StepType::FormatChunkfilePool, deploy_configs(&["h1"], 0)));

    let err = playbook.run().await.unwrap_err();

    assert!(matches!(err, Error::UnknownTaskType { .. }));
    assert_eq!(cluster.connects(), 0);
}

#[tokio::test]
async fn test_playbook_command_timeout_applies() {
    let cluster = FakeCluster::new();
    cluster.slow(Duration::from_secs(5));
    let dcs = deploy_configs(&["h1"], 0);
    let (playbook, _) = playbook(&cluster, "c1");
    let mut playbook = playbook.with_command_timeout(Some(Duration::from_millis(50)));
    playbook.add_step(step(StepType::PullImage, &dcs));

    let err = playbook.run().await.unwrap_err();

    match err {
        Error::StepFailed { source, .. } => assert!(matches!(*source, Error::Timeout { .. })),
        other => panic!("unexpected error {:?}", other),
    }
}

// ============================================================================
// Status and Clean Tests
// ============================================================================

#[tokio::test]
async fn test_status_reports_each_service() {
    let cluster = FakeCluster::new();
    cluster.reply("docker inspect", "running");
    let dcs = deploy_configs(&["h1", "h2"], 0);
    let (factory, storage) = factory("c1");
    storage
        .insert_service("c1", &factory.service_id(&dcs[0]), "0123456789abcdef")
        .unwrap();
    storage
        .insert_service("c1", &factory.service_id(&dcs[1]), CLEANED_CONTAINER_ID)
        .unwrap();
    let mut playbook =
        Playbook::new(factory, connector(&cluster)).with_progress(ProgressReporter::hidden());
    playbook.add_step(step(StepType::GetServiceStatus, &dcs));

    let report = playbook.run().await.unwrap();

    let mut rows: Vec<ServiceStatus> = report.outcomes[0]
        .records
        .iter()
        .filter_map(|r| ServiceStatus::from_register(&r.register))
        .collect();
    rows.sort_by(|a, b| a.host.cmp(&b.host));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, "Running");
    assert_eq!(rows[0].container_id, "0123456789ab");
    assert_eq!(rows[1].status, "Cleaned");
    assert!(rows.iter().all(|r| r.started_at.is_none()));
    assert_eq!(cluster.matching("docker inspect").len(), 1);
}

#[tokio::test]
async fn test_verbose_status_reports_start_time() {
    let cluster = FakeCluster::new();
    cluster.reply("docker inspect", "running");
    cluster.reply(".State.StartedAt", "2026-10-17T08:00:00Z");
    let dcs = deploy_configs(&["h1"], 0);
    let (factory, storage) = factory("c1");
    storage
        .insert_service("c1", &factory.service_id(&dcs[0]), "0123456789abcdef")
        .unwrap();
    let mut playbook =
        Playbook::new(factory, connector(&cluster)).with_progress(ProgressReporter::hidden());
    playbook.add_step(
        step(StepType::GetServiceStatus, &dcs)
            .with_options(StepOptions::default().with_verbose(true)),
    );

    let report = playbook.run().await.unwrap();

    let row = ServiceStatus::from_register(&report.outcomes[0].records[0].register).unwrap();
    assert_eq!(row.status, "Running");
    assert_eq!(row.started_at.as_deref(), Some("2026-10-17T08:00:00Z"));
}

#[tokio::test]
async fn test_clean_marks_container_removed() {
    let cluster = FakeCluster::new();
    let dcs = deploy_configs(&["h1"], 0);
    let (factory, storage) = factory("c1");
    let service_id = factory.service_id(&dcs[0]);
    storage.insert_service("c1", &service_id, "deadbeef").unwrap();
    let mut playbook =
        Playbook::new(factory, connector(&cluster)).with_progress(ProgressReporter::hidden());
    playbook.add_step(
        step(StepType::CleanService, &dcs)
            .with_options(StepOptions::default().with_clean_items(CleanItem::ALL)),
    );

    playbook.run().await.unwrap();

    assert_eq!(cluster.matching("docker rm").len(), 1);
    assert_eq!(cluster.matching("rm -rf /data/logs/etcd0").len(), 1);
    assert_eq!(
        storage.container_id(&service_id).unwrap().as_deref(),
        Some(CLEANED_CONTAINER_ID)
    );
}
