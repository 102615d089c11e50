/// Integration tests against a real Docker daemon
///
/// These need the `csharp-runner` and `python-runner` images built locally
/// and should run single-threaded:
///
/// ```text
/// cargo test -p exambox-engine -- --ignored --test-threads=1
/// ```
///
/// They cover what the unit tests cannot:
/// 1. Output capture from a real container
/// 2. Source code reaching the runner byte-for-byte
/// 3. Network isolation
/// 4. Timeouts killing and removing the container

#[cfg(test)]
mod docker_tests {
    use crate::config::ProfileConfigManager;
    use crate::engine::{DockerEngine, ExecutionEngine};
    use crate::executor::Executor;
    use bollard::container::ListContainersOptions;
    use bollard::Docker;
    use exambox_common::config::Config;
    use exambox_common::types::{ExecutionRequest, ExecutionResult, Profile};
    use std::collections::HashMap;

    fn test_config(timeout_secs: u64) -> Config {
        Config {
            timeout_secs,
            ..Config::default()
        }
    }

    fn create_executor(timeout_secs: u64) -> Executor<DockerEngine> {
        let config = test_config(timeout_secs);
        let engine = DockerEngine::new(ProfileConfigManager::builtin(), &config)
            .expect("Failed to create Docker engine");
        Executor::new(engine, &config)
    }

    async fn sandbox_containers() -> usize {
        let docker = Docker::connect_with_local_defaults().expect("Failed to connect to Docker");
        let mut filters = HashMap::new();
        filters.insert("name", vec!["exambox-"]);
        docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .expect("Failed to list containers")
            .len()
    }

    /// Test: Python program output is captured and trimmed
    #[tokio::test]
    #[ignore] // Requires Docker and the runner images
    async fn test_python_success() {
        let executor = create_executor(10);
        executor.engine().ping().await.expect("Docker not reachable");

        let result = executor
            .execute(ExecutionRequest::new(
                "for i in range(3):\n    print(i * 2)\n",
                Profile::InterpretedScript,
            ))
            .await;

        assert_eq!(
            result,
            ExecutionResult::Success {
                output: "0\n2\n4".to_string()
            }
        );
    }

    /// Test: Shell metacharacters in the source are not interpreted
    #[tokio::test]
    #[ignore] // Requires Docker and the runner images
    async fn test_source_is_not_shell_interpreted() {
        let executor = create_executor(10);

        let source = r#"print("quote\" `echo backtick` $(echo subshell) $HOME '; echo injected")"#;
        let result = executor
            .execute(ExecutionRequest::new(source, Profile::InterpretedScript))
            .await;

        assert_eq!(
            result,
            ExecutionResult::Success {
                output: r#"quote" `echo backtick` $(echo subshell) $HOME '; echo injected"#.to_string()
            }
        );
    }

    /// Test: Python runtime error reports type and line
    #[tokio::test]
    #[ignore] // Requires Docker and the runner images
    async fn test_python_runtime_error() {
        let executor = create_executor(10);

        let result = executor
            .execute(ExecutionRequest::new(
                "x = 1\ny = 0\nprint(x / y)\n",
                Profile::InterpretedScript,
            ))
            .await;

        match result {
            ExecutionResult::RuntimeError(err) => {
                assert_eq!(err.error_type, "ZeroDivisionError");
                assert_eq!(err.line, 3);
            }
            other => panic!("expected RuntimeError, got {:?}", other),
        }
    }

    /// Test: No network inside the sandbox
    #[tokio::test]
    #[ignore] // Requires Docker and the runner images
    async fn test_network_is_disabled() {
        let executor = create_executor(10);

        let source = "import urllib.request\nurllib.request.urlopen('http://example.com', timeout=3)\n";
        let result = executor
            .execute(ExecutionRequest::new(source, Profile::InterpretedScript))
            .await;

        assert!(
            matches!(result, ExecutionResult::RuntimeError(_)),
            "network call should fail, got {:?}",
            result
        );
    }

    /// Test: C# compile errors come back as diagnostics
    #[tokio::test]
    #[ignore] // Requires Docker and the runner images
    async fn test_csharp_build_failure() {
        let executor = create_executor(60);

        let source = r#"
using System;
class Program {
    static void Main() {
        Console.WriteLine(missing);
    }
}
"#;
        let result = executor
            .execute(ExecutionRequest::new(source, Profile::CompiledManaged))
            .await;

        match result {
            ExecutionResult::BuildFailed { diagnostics, error_count } => {
                assert_eq!(diagnostics[0].code, "CS0103");
                assert_eq!(diagnostics[0].line, 5);
                assert!(error_count >= 1);
            }
            other => panic!("expected BuildFailed, got {:?}", other),
        }
    }

    /// Test: Infinite loop times out and leaves no container behind
    #[tokio::test]
    #[ignore] // Requires Docker and the runner images
    async fn test_timeout_removes_container() {
        let executor = create_executor(2);

        let result = executor
            .execute(ExecutionRequest::new(
                "while True:\n    pass\n",
                Profile::InterpretedScript,
            ))
            .await;

        assert!(
            matches!(result, ExecutionResult::Timeout { .. }),
            "expected Timeout, got {:?}",
            result
        );
        assert_eq!(sandbox_containers().await, 0, "timed-out container leaked");
    }

    /// Test: Missing image is a launch failure, not a program failure
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_missing_image_is_launch_failure() {
        let profiles = ProfileConfigManager::from_json(
            r#"{"profiles": [{"profile": "python", "image": "exambox-does-not-exist:never", "memory_limit_mb": 64, "cpu_limit": 0.5}]}"#,
        )
        .unwrap();
        let config = test_config(5);
        let engine = DockerEngine::new(profiles, &config).unwrap();

        let request = ExecutionRequest::new("print(1)", Profile::InterpretedScript);
        assert!(engine.run(&request).await.is_err());

        let executor = Executor::new(engine, &config);
        assert!(matches!(
            executor.execute(request).await,
            ExecutionResult::LaunchFailure { .. }
        ));
    }
}
