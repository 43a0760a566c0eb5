use std::collections::HashSet;
use std::time::Duration;

use infinitrain::job::{generate_job_id, JobRequest, JobStatus, JobType, DEFAULT_JOB_TIMEOUT};

#[test]
fn test_to_job_produces_pending_job_with_defaults() {
    let mut request = JobRequest::command("echo hi");

    let job = request.to_job().unwrap();

    assert!(!job.id.is_empty());
    assert!(job.id.starts_with("job-"));
    assert_eq!(job.job_type, JobType::Command);
    assert_eq!(job.command, "echo hi");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.timeout, DEFAULT_JOB_TIMEOUT);
    assert_eq!(job.timeout, Duration::from_secs(300));
    assert_eq!(job.priority, 1);
    assert!(job.worker_id.is_none());
    assert!(job.started_at.is_none());
    assert!(job.completed_at.is_none());
}

#[test]
fn test_to_job_parses_timeout() {
    let mut request = JobRequest::command("sleep 1").with_timeout("1m30s");
    let job = request.to_job().unwrap();
    assert_eq!(job.timeout, Duration::from_secs(90));

    let mut request = JobRequest::command("sleep 1").with_timeout("50ms");
    let job = request.to_job().unwrap();
    assert_eq!(job.timeout, Duration::from_millis(50));
}

#[test]
fn test_to_job_rejects_malformed_timeout() {
    let mut request = JobRequest::command("echo hi").with_timeout("ten seconds");

    let err = request.to_job().unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("invalid timeout format"));
}

#[test]
fn test_to_job_uses_supplied_default_timeout() {
    let mut request = JobRequest::command("echo hi");
    let job = request
        .to_job_with_default_timeout(Duration::from_secs(7))
        .unwrap();
    assert_eq!(job.timeout, Duration::from_secs(7));
}

#[test]
fn test_to_job_copies_payload_fields() {
    let mut request = JobRequest::command("env")
        .with_priority(7)
        .with_tag("nightly")
        .with_tag("batch")
        .with_env("MODE", "fast");
    request.retries = 3;

    let job = request.to_job().unwrap();

    assert_eq!(job.priority, 7);
    assert_eq!(job.retries, 3);
    assert_eq!(job.tags, vec!["nightly".to_string(), "batch".to_string()]);
    assert_eq!(job.environment.get("MODE").map(String::as_str), Some("fast"));
}

#[test]
fn test_zero_priority_is_treated_as_unset() {
    let mut request = JobRequest::command("echo hi").with_priority(0);
    assert_eq!(request.to_job().unwrap().priority, 1);

    let mut request = JobRequest::command("echo hi").with_priority(-2);
    assert_eq!(request.to_job().unwrap().priority, -2);
}

#[test]
fn test_validate_requires_type() {
    let mut request = JobRequest::default();
    let err = request.validate().unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("job type is required"));
}

#[test]
fn test_validate_rejects_unknown_type() {
    let mut request = JobRequest {
        job_type: "docker".to_string(),
        command: "run".to_string(),
        ..Default::default()
    };
    let err = request.validate().unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("unsupported job type"));
}

#[test]
fn test_validate_requires_type_specific_payload() {
    for job_type in JobType::ALL {
        let mut request = JobRequest {
            job_type: job_type.to_string(),
            ..Default::default()
        };
        let err = request.validate().unwrap_err();
        assert!(err.is_validation(), "{} without payload must fail", job_type);
    }
}

#[test]
fn test_to_job_propagates_validation_error_unchanged() {
    let mut request = JobRequest::script("");
    let from_validate = request.clone().validate().unwrap_err().to_string();
    let from_to_job = request.to_job().unwrap_err().to_string();
    assert_eq!(from_validate, from_to_job);
}

#[test]
fn test_http_method_defaults_to_get() {
    let mut request = JobRequest::http("http://localhost/health", "");

    request.validate().unwrap();
    assert_eq!(request.method, "GET");

    let job = request.to_job().unwrap();
    assert_eq!(job.method, "GET");
    assert_eq!(job.url, "http://localhost/health");
}

#[test]
fn test_http_keeps_explicit_method() {
    let mut request = JobRequest::http("http://localhost/items", "DELETE");
    assert_eq!(request.to_job().unwrap().method, "DELETE");
}

#[test]
fn test_request_deserializes_from_json() {
    let mut request: JobRequest = serde_json::from_str(
        r#"{
            "type": "file",
            "file_path": "data/input.txt",
            "timeout": "10s",
            "tags": ["io"],
            "environment": {"FILE_OPERATION": "stat"}
        }"#,
    )
    .unwrap();

    let job = request.to_job().unwrap();

    assert_eq!(job.job_type, JobType::File);
    assert_eq!(job.file_path, "data/input.txt");
    assert_eq!(job.timeout, Duration::from_secs(10));
    assert_eq!(job.tags, vec!["io".to_string()]);
}

#[test]
fn test_generated_ids_are_unique() {
    let ids: HashSet<String> = (0..10_000).map(|_| generate_job_id()).collect();
    assert_eq!(ids.len(), 10_000);
    assert!(ids.iter().all(|id| id.len() >= 10));
}

#[test]
fn test_generated_ids_are_unique_across_threads() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(|| (0..1_000).map(|_| generate_job_id()).collect::<Vec<_>>()))
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "duplicate job id generated");
        }
    }
    assert_eq!(ids.len(), 8_000);
}
