//! Integration tests for the command execution layer.
//!
//! These tests use the mock runner so they do not require Terraform,
//! Ansible or a container runtime.

use std::sync::Arc;

use range_runner::{
    CommandRunner, CommandSpec, ContainerImage, MockResponse, MockRunner, RunConfig, RunnerError,
};

/// Runners are used behind trait objects by the drivers.
#[tokio::test]
async fn test_runner_as_trait_object() {
    let runner: Arc<dyn CommandRunner> =
        Arc::new(MockRunner::new().add_response(MockResponse::success("Terraform v1.6.6")));

    let result = runner
        .run(&CommandSpec::new("terraform").arg("version"), &RunConfig::default())
        .await
        .unwrap();

    assert!(result.success());
    assert!(result.stdout.contains("v1.6.6"));
}

/// Container-wrapped specs are recorded with the wrapped program.
#[tokio::test]
async fn test_container_spec_is_recorded() {
    let runner = MockRunner::new();
    let spec = CommandSpec::new("terraform")
        .args(["init", "-input=false"])
        .workdir("/state/terraform/ring")
        .in_container(ContainerImage::parse("hashicorp/terraform:1.6"));

    runner.run(&spec, &RunConfig::default()).await.unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "terraform");
    assert_eq!(calls[0].command_line, "terraform init -input=false");
}

/// Failing tools return a result, not an error.
#[tokio::test]
async fn test_non_zero_exit_is_a_result() {
    let runner = MockRunner::new().add_response(MockResponse::failure(
        1,
        "Error: Quota exceeded for instances\n",
    ));

    let result = runner
        .run(&CommandSpec::new("terraform").arg("apply"), &RunConfig::default())
        .await
        .unwrap();

    assert!(!result.success());
    assert_eq!(result.error_summary(), "Error: Quota exceeded for instances");
}

/// Timeouts surface as a dedicated error carrying the budget.
#[tokio::test]
async fn test_timeout_error_carries_budget() {
    let runner = MockRunner::new().simulate_timeout();

    let err = runner
        .run(&CommandSpec::new("terraform").arg("apply"), &RunConfig::default().timeout(42))
        .await
        .unwrap_err();

    match err {
        RunnerError::Timeout { seconds, command } => {
            assert_eq!(seconds, 42);
            assert_eq!(command, "terraform apply");
        }
        other => panic!("unexpected error: {other}"),
    }
}
