//! Integration tests for RaceBench
//!
//! These drive a real sandbox (on a thread) through the host controller and
//! check the end-to-end behavior of runs, aborts and reporting.

use racebench::prelude::*;
use racebench::{
    BenchStatus, CandidateStatus, CandidateView, HostController, Report, SamplerConfig,
    SandboxOptions, SuiteReport, spawn_thread_sandbox,
};
use racebench_report::{CandidateInfo, ReportConfig, ReportMeta, SCHEMA_VERSION, SystemInfo};
use std::hint::black_box;
use std::time::Instant;

fn quick_options() -> SandboxOptions {
    SandboxOptions {
        config: SamplerConfig {
            min_time: Duration::from_millis(20),
            max_time: Duration::from_millis(200),
            min_cycle_time: Duration::from_millis(2),
            min_samples: 3,
            target_rme_percent: 50.0,
            throttle_interval: Duration::from_millis(5),
        },
        pin_cpu: None,
    }
}

fn spin(n: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..n {
        acc = acc.wrapping_add(black_box(i));
    }
    acc
}

fn racing_suite() -> Suite {
    let mut suite = Suite::new("race");
    suite
        .add(Candidate::sync("noop", || {
            black_box(1u64);
        }))
        .unwrap();
    suite
        .add(Candidate::sync("spin", || {
            black_box(spin(20_000));
        }))
        .unwrap();
    suite
}

/// Start a thread sandbox for `build` and return a ready controller
fn start<F>(build: F, options: SandboxOptions) -> (HostController, std::thread::JoinHandle<()>)
where
    F: Fn() -> Suite + Send + 'static,
{
    let views: Vec<CandidateView> = build()
        .candidates()
        .iter()
        .map(|c| CandidateView::new(c.id(), c.title()))
        .collect();
    let sandbox = spawn_thread_sandbox(build, options).unwrap();
    let handle = sandbox.handle;
    let joiner = std::thread::spawn(move || {
        handle.join().unwrap().unwrap();
    });
    let mut controller = HostController::new(sandbox.endpoint).with_candidates(views);
    controller.wait_until_ready(Duration::from_secs(10)).unwrap();
    (controller, joiner)
}

fn run_once(controller: &mut HostController) -> SuiteReport {
    assert!(controller.start(None).unwrap());
    controller
        .wait_for_completion(Duration::from_secs(30), None)
        .unwrap()
        .expect("run was stopped")
}

fn finish(controller: HostController, joiner: std::thread::JoinHandle<()>) {
    controller.shutdown();
    joiner.join().unwrap();
}

#[test]
fn test_end_to_end_ranking() {
    let (mut controller, joiner) = start(racing_suite, quick_options());
    assert_eq!(controller.status(), BenchStatus::Ready);

    let report = run_once(&mut controller);
    assert_eq!(report.len(), 2);

    let fastest = report.fastest().unwrap();
    let slowest = report.slowest().unwrap();
    assert_eq!(fastest.candidate_id, CandidateId(0));
    assert_eq!(slowest.candidate_id, CandidateId(1));
    assert_eq!(fastest.percent_slower_than_fastest, Some(0.0));
    assert!(slowest.percent_slower_than_fastest.unwrap() > 0.0);
    assert!(report.results.iter().all(|r| r.sample_count >= 3));

    // Every candidate reached exactly one terminal state
    assert!(
        controller
            .candidates()
            .iter()
            .all(|c| c.status == CandidateStatus::Completed)
    );
    assert_eq!(controller.status(), BenchStatus::Complete);
    assert_eq!(controller.status_message(), "Done. Ready to run again.");

    finish(controller, joiner);
}

#[test]
fn test_panicking_candidate_is_isolated() {
    fn build() -> Suite {
        let mut suite = Suite::new("errors");
        suite
            .add(Candidate::sync("ok", || {
                black_box(spin(100));
            }))
            .unwrap();
        suite
            .add(Candidate::sync("boom", || panic!("boom")))
            .unwrap();
        suite
    }

    let (mut controller, joiner) = start(build, quick_options());
    let report = run_once(&mut controller);

    let ok = report.get(CandidateId(0)).unwrap();
    assert!(ok.error.is_none());
    assert!(ok.is_fastest && ok.is_slowest);

    let boom = report.get(CandidateId(1)).unwrap();
    assert!(boom.error.as_deref().unwrap().contains("boom"));
    assert!(boom.rate_per_second.is_none());
    assert!(!boom.is_fastest && !boom.is_slowest);
    assert_eq!(
        controller.candidate(CandidateId(1)).unwrap().status,
        CandidateStatus::Error
    );

    // A second run skips the errored candidate but keeps its error
    let again = run_once(&mut controller);
    assert!(again.get(CandidateId(1)).unwrap().error.is_some());
    assert!(again.get(CandidateId(0)).unwrap().error.is_none());

    finish(controller, joiner);
}

#[test]
fn test_stop_aborts_in_flight_candidate() {
    let mut options = quick_options();
    options.config.min_time = Duration::from_secs(30);
    options.config.max_time = Duration::from_secs(60);

    let (mut controller, joiner) = start(racing_suite, options);
    assert!(controller.start(None).unwrap());

    let deadline = Instant::now() + Duration::from_secs(10);
    while !controller
        .candidates()
        .iter()
        .any(|c| c.status.is_active())
    {
        assert!(Instant::now() < deadline, "no candidate started");
        controller.pump().unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(controller.stop().unwrap());
    assert_eq!(controller.status(), BenchStatus::Ready);
    assert_eq!(controller.action_label(), "Run tests");

    let deadline = Instant::now() + Duration::from_secs(10);
    while controller.candidate(CandidateId(0)).unwrap().status != CandidateStatus::Aborted {
        assert!(Instant::now() < deadline, "abort never arrived");
        controller.pump().unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(controller.report().is_none());
    assert_eq!(
        controller.candidate(CandidateId(1)).unwrap().status,
        CandidateStatus::Pending
    );

    finish(controller, joiner);
}

#[test]
fn test_async_candidates_complete() {
    fn build() -> Suite {
        let mut suite = Suite::new("async");
        suite
            .add(Candidate::future("future", || async {
                tokio::task::yield_now().await;
            }))
            .unwrap();
        suite
            .add(Candidate::deferred("deferred", |deferred| deferred.resolve()))
            .unwrap();
        suite
            .add(Candidate::deferred("rejects", |deferred| {
                deferred.reject("nope")
            }))
            .unwrap();
        suite
    }

    let (mut controller, joiner) = start(build, quick_options());
    let report = run_once(&mut controller);

    assert!(report.get(CandidateId(0)).unwrap().rate_per_second.is_some());
    assert!(report.get(CandidateId(1)).unwrap().rate_per_second.is_some());
    let rejected = report.get(CandidateId(2)).unwrap();
    assert!(rejected.error.as_deref().unwrap().contains("nope"));

    finish(controller, joiner);
}

#[test]
fn test_report_from_live_run() {
    let (mut controller, joiner) = start(racing_suite, quick_options());
    let ranked = run_once(&mut controller);

    let candidates: Vec<CandidateInfo> = controller
        .candidates()
        .iter()
        .map(|c| CandidateInfo {
            id: c.id,
            name: c.title.clone(),
            status: c.status,
        })
        .collect();
    let meta = ReportMeta {
        schema_version: SCHEMA_VERSION,
        version: "test".to_string(),
        timestamp: chrono::Utc::now(),
        suite: "race".to_string(),
        system: SystemInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu: "test".to_string(),
            cpu_cores: 1,
        },
        config: ReportConfig::default(),
    };
    let report = Report::from_suite(meta, &ranked, &candidates);
    assert!(!report.has_errors());
    assert_eq!(report.summary.fastest.as_deref(), Some("noop"));
    assert_eq!(report.summary.slowest.as_deref(), Some("spin"));

    let json = racebench_report::generate_json_report(&report).unwrap();
    let parsed = racebench_report::parse_json_report(&json).unwrap();
    assert_eq!(parsed.results.len(), 2);

    let human = racebench_cli::format_human_output(&report);
    assert!(human.contains("fastest"));
    assert!(human.contains("% slower"));

    finish(controller, joiner);
}
