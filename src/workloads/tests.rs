use std::time::Duration;

use indoc::indoc;
use similar_asserts::assert_eq;
use tokio::time::Instant;

use super::{
    DeviceRequest, GpuBurn, SuccessCriteriaError, ValidationError, VectorAdd, WorkloadBuilder,
    WorkloadError, WorkloadState, gpu_burn, vector_add,
};
use crate::{
    cluster::QueryError, dra, test_util::mock::MockCluster, test_util::trace_init,
    wait::TerminalPhase,
};

const NAMESPACE: &str = "test-gpu-burn";
const INTERVAL: Duration = Duration::from_secs(5);
const TIMEOUT: Duration = Duration::from_secs(60);

const BURN_LOGS: &str = indoc! {"
    GPU 0: NVIDIA A100-SXM4-40GB (UUID: GPU-5ac1c7c6)
    Initialized device 0 with 40339 MB of memory
    100.0%  proc'd: 9660 (17398 Gflop/s)   errors: 0   temps: 56 C
    Tested 1 GPUs:
    \tGPU 0: OK
"};

fn burn(name: &str) -> GpuBurn {
    GpuBurn::new(name, "img:arch")
        .with_devices(DeviceRequest::Gpus(1))
        .with_duration(Duration::from_secs(5))
}

fn seed_run(cluster: &MockCluster, name: &str, phases: &[&str], logs: Option<&str>) {
    cluster.script_pod_phases(NAMESPACE, name, phases);
    if let Some(logs) = logs {
        cluster.set_logs(NAMESPACE, name, gpu_burn::CONTAINER_NAME, logs);
    }
}

#[tokio::test(start_paused = true)]
async fn passing_run_has_no_error() {
    trace_init();
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Pending", "Running", "Succeeded"], Some(BURN_LOGS));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.create().await;
    assert_eq!(run.state(), WorkloadState::Submitted);
    assert!(run.error().is_none());

    let start = Instant::now();
    run.wait_until_success(TIMEOUT).await;

    assert!(run.error().is_none(), "{:?}", run.error());
    assert_eq!(run.state(), WorkloadState::Succeeded);
    assert_eq!(run.phase(), Some(TerminalPhase::Succeeded));
    assert_eq!(start.elapsed(), 2 * INTERVAL);

    let created = cluster.created_pods();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].metadata.name.as_deref(), Some("w1"));
    assert_eq!(
        created[0].spec.as_ref().unwrap().containers[0].command,
        Some(vec!["./gpu_burn".to_owned(), "5".to_owned()])
    );
}

#[tokio::test(start_paused = true)]
async fn missing_device_marker_is_named() {
    let cluster = MockCluster::new();
    let logs = BURN_LOGS.replace("GPU 0: OK", "GPU 0: FAULTY");
    seed_run(&cluster, "w1", &["Running", "Succeeded"], Some(logs.as_str()));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.create().await.wait_until_success(TIMEOUT).await;

    match run.error() {
        Some(WorkloadError::SuccessCriteria {
            source: SuccessCriteriaError::MissingMarker { marker },
            ..
        }) => assert_eq!(marker, "GPU 0: OK"),
        other => panic!("unexpected verdict: {other:?}"),
    }
    assert_eq!(run.state(), WorkloadState::Failed);
    // The pod itself ran to completion.
    assert_eq!(run.phase(), Some(TerminalPhase::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn failed_pod_skips_log_check() {
    let cluster = MockCluster::new();
    // No logs seeded: reading them would surface as a `Logs` error.
    seed_run(&cluster, "w1", &["Running", "Failed"], None);

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.create().await.wait_until_success(TIMEOUT).await;

    assert!(
        matches!(run.error(), Some(WorkloadError::PodFailed { name, .. }) if name == "w1"),
        "{:?}",
        run.error()
    );
    assert_eq!(run.phase(), Some(TerminalPhase::Failed));
    assert_eq!(run.state(), WorkloadState::Failed);
}

#[tokio::test(start_paused = true)]
async fn pod_that_never_finishes_times_out() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Running"], Some(BURN_LOGS));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.create().await;
    let start = Instant::now();
    run.wait_until_success(TIMEOUT).await;
    let elapsed = start.elapsed();

    assert!(elapsed >= TIMEOUT && elapsed <= TIMEOUT + INTERVAL, "{elapsed:?}");
    match run.error() {
        Some(WorkloadError::Timeout {
            timeout,
            last_observed,
            ..
        }) => {
            assert_eq!(*timeout, TIMEOUT);
            assert_eq!(last_observed, "phase Running");
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
    assert_eq!(run.state(), WorkloadState::TimedOut);
    assert_eq!(run.phase(), None);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_is_terminal() {
    let cluster = MockCluster::new();
    cluster.fail("create", "Pod", 403, "forbidden");

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1"));
    run.create().await;
    assert_eq!(run.state(), WorkloadState::SubmissionFailed);
    assert_eq!(cluster.calls(), 1);

    let start = Instant::now();
    run.wait_until_success(TIMEOUT).await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(cluster.calls(), 1);
    match run.error() {
        Some(WorkloadError::Submission {
            source: QueryError::Rejected { code, .. },
            ..
        }) => assert_eq!(*code, 403),
        other => panic!("unexpected verdict: {other:?}"),
    }
    assert_eq!(run.pod_name(), None);
}

#[tokio::test]
async fn invalid_workload_never_contacts_cluster() {
    let cluster = MockCluster::new();

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, GpuBurn::new("", "img:arch"));
    run.create().await.wait_until_success(TIMEOUT).await;

    assert_eq!(cluster.calls(), 0);
    assert!(matches!(
        run.error(),
        Some(WorkloadError::Validation {
            source: ValidationError::EmptyName
        })
    ));
    assert_eq!(run.state(), WorkloadState::SubmissionFailed);
}

#[tokio::test]
async fn waiting_requires_submission() {
    let cluster = MockCluster::new();

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1"));
    run.wait_until_success(TIMEOUT).await;

    assert!(matches!(run.error(), Some(WorkloadError::NotSubmitted)));
    assert_eq!(run.state(), WorkloadState::SubmissionFailed);
    assert_eq!(cluster.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn create_after_premature_wait_keeps_the_verdict() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Succeeded"], Some(BURN_LOGS));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.wait_until_success(TIMEOUT).await;
    run.create().await.wait_until_success(TIMEOUT).await;

    assert!(matches!(run.error(), Some(WorkloadError::NotSubmitted)));
    assert_eq!(run.state(), WorkloadState::SubmissionFailed);
    assert_eq!(run.pod_name(), None);
    assert_eq!(cluster.calls(), 0);
    assert!(cluster.created_pods().is_empty());
}

#[tokio::test(start_paused = true)]
async fn query_failure_while_waiting_aborts() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Running", "Succeeded"], Some(BURN_LOGS));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.create().await;
    cluster.fail("get", "Pod", 500, "etcdserver: request timed out");

    let start = Instant::now();
    run.wait_until_success(TIMEOUT).await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(
        matches!(
            run.error(),
            Some(WorkloadError::Poll {
                source: QueryError::Rejected { code: 500, .. },
                ..
            })
        ),
        "{:?}",
        run.error()
    );
    assert_eq!(run.state(), WorkloadState::Failed);
}

#[tokio::test(start_paused = true)]
async fn unreadable_logs_fail_the_run() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Succeeded"], None);

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    run.create().await.wait_until_success(TIMEOUT).await;

    assert!(
        matches!(
            run.error(),
            Some(WorkloadError::Logs { container, .. }) if container == gpu_burn::CONTAINER_NAME
        ),
        "{:?}",
        run.error()
    );
}

#[tokio::test(start_paused = true)]
async fn second_create_is_ignored() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Succeeded"], Some(BURN_LOGS));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1"));
    run.create().await;
    let calls = cluster.calls();
    run.create().await;

    assert_eq!(cluster.calls(), calls);
    assert!(run.error().is_none());
    assert_eq!(cluster.created_pods().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn vector_add_with_mig_claim() {
    let cluster = MockCluster::new();
    dra::create_mig_claim_template(&cluster, NAMESPACE, "mig-claim-template")
        .await
        .unwrap();
    cluster.script_pod_phases(NAMESPACE, "vectoradd", &["Pending", "Succeeded"]);
    cluster.set_logs(
        NAMESPACE,
        "vectoradd",
        vector_add::CONTAINER_NAME,
        "[Vector addition of 50000 elements]\nTest PASSED\nDone\n",
    );

    let workload = VectorAdd::new("vectoradd")
        .with_resource_claims(vec![dra::pod_claim("mig-claim", "mig-claim-template")]);
    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, workload).with_poll_interval(INTERVAL);
    run.create().await.wait_until_success(TIMEOUT).await;

    assert!(run.error().is_none(), "{:?}", run.error());
    let spec = cluster.created_pods()[0].spec.clone().unwrap();
    assert_eq!(spec.resource_claims.map(|claims| claims.len()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn independent_builders_run_concurrently() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Running", "Running", "Succeeded"], Some(BURN_LOGS));
    seed_run(&cluster, "w2", &["Running", "Failed"], None);

    let mut first = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1")).with_poll_interval(INTERVAL);
    let mut second =
        WorkloadBuilder::new(&cluster, NAMESPACE, burn("w2")).with_poll_interval(INTERVAL);

    let start = Instant::now();
    tokio::join!(
        async {
            first.create().await.wait_until_success(TIMEOUT).await;
        },
        async {
            second.create().await.wait_until_success(TIMEOUT).await;
        },
    );

    // Waits overlap: the slower run bounds the total.
    assert_eq!(start.elapsed(), 2 * INTERVAL);
    assert!(first.error().is_none(), "{:?}", first.error());
    assert!(matches!(second.error(), Some(WorkloadError::PodFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn delete_removes_pod_once() {
    let cluster = MockCluster::new();
    seed_run(&cluster, "w1", &["Succeeded"], Some(BURN_LOGS));

    let mut run = WorkloadBuilder::new(&cluster, NAMESPACE, burn("w1"));
    run.create().await.wait_until_success(TIMEOUT).await;
    assert_eq!(run.pod_name(), Some("w1"));

    run.delete().await.unwrap();
    run.delete().await.unwrap();
    assert_eq!(
        cluster.deleted_pods(),
        vec![(NAMESPACE.to_owned(), "w1".to_owned())]
    );
}
