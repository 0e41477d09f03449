/// End-to-end tests against a local Docker daemon
///
/// These tests verify that the real execution path works:
/// 1. Every generated harness compiles and calls the user's function,
///    within realistic time limits since compilation is not timed
/// 2. Compile failures end the pass as COMPILE_ERROR
/// 3. `long` parameters carry values past the 32-bit range
/// 4. Sleeping past the time limit is TIME_LIMIT_EXCEEDED
/// 5. Scratch runs see raw stdin
///
/// Run with `cargo test -p arbiter-judge -- --ignored` (pulls runner images).

#[cfg(test)]
mod docker_tests {
    use std::sync::Arc;

    use arbiter_common::config::{SandboxConfig, ScratchConfig};
    use arbiter_common::memory::MemoryStore;
    use arbiter_common::types::{ComparisonMode, FunctionSignature, SubmissionStatus, TestCase};
    use serde_json::json;

    use crate::config::LanguageRegistry;
    use crate::docker::DockerRuntime;
    use crate::engine::SandboxExecutor;
    use crate::executor::{Judge, JudgeRequest, ProgramMode};
    use crate::runner::{RunService, ScratchStatus};

    fn judge(work_root: &std::path::Path) -> Judge {
        let runtime = DockerRuntime::connect().expect("Failed to connect to Docker");
        let config = SandboxConfig {
            work_root: work_root.to_path_buf(),
            memory_ceiling_mb: 512,
            cpus: 1.0,
            pids_limit: 128,
            timeout_grace_ms: 1000,
            compile_timeout_ms: 60_000,
        };
        Judge::new(
            SandboxExecutor::new(Arc::new(runtime), work_root),
            Arc::new(LanguageRegistry::builtin().expect("Failed to load languages")),
            config,
        )
    }

    fn add_signature() -> FunctionSignature {
        FunctionSignature {
            function_name: "add".to_string(),
            parameter_types: vec!["integer".to_string(), "integer".to_string()],
            return_type: "integer".to_string(),
        }
    }

    fn test_case(id: i64, input: Vec<serde_json::Value>, expected: &str, time_limit_ms: u64) -> TestCase {
        TestCase {
            id,
            problem_id: 1,
            input,
            expected_output: expected.to_string(),
            comparison_mode: ComparisonMode::Exact,
            epsilon: None,
            time_limit_ms,
            memory_limit_kb: 256 * 1024,
            weight: None,
            order: id as i32,
            is_example: true,
            is_hidden: false,
            depends_on: None,
        }
    }

    const ADD_SOLUTIONS: &[(&str, &str)] = &[
        (
            "python",
            "class Solution:\n    def add(self, a, b):\n        return a + b\n",
        ),
        (
            "java",
            "class Solution {\n    public int add(int a, int b) {\n        return a + b;\n    }\n}\n",
        ),
        (
            "cpp",
            "class Solution {\npublic:\n    int add(int a, int b) {\n        return a + b;\n    }\n};\n",
        ),
        (
            "rust",
            "impl Solution {\n    pub fn add(a: i32, b: i32) -> i32 {\n        a + b\n    }\n}\n",
        ),
    ];

    /// Test: add(1, 2) prints 3 through every language's harness
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_add_harness_every_language() {
        let dir = tempfile::tempdir().unwrap();
        let judge = judge(dir.path());
        let signature = add_signature();
        let cases = vec![
            test_case(1, vec![json!(1), json!(2)], "3", 2000),
            test_case(2, vec![json!(-5), json!(12)], "7", 2000),
        ];

        for (language, source) in ADD_SOLUTIONS {
            let request = JudgeRequest {
                problem_id: 1,
                submission_id: None,
                language,
                source_code: source,
                mode: ProgramMode::Harness(&signature),
            };
            let verdict = judge.judge(request, &cases).await.unwrap();
            assert_eq!(
                verdict.status,
                SubmissionStatus::Accepted,
                "{}: {:?}",
                language,
                verdict.results
            );
            assert_eq!(verdict.results[0].output.trim(), "3", "{}", language);
        }
    }

    const LONG_SOLUTIONS: &[(&str, &str)] = &[
        (
            "java",
            "class Solution {\n    public long add(long a, long b) {\n        return a + b;\n    }\n}\n",
        ),
        (
            "cpp",
            "class Solution {\npublic:\n    long long add(long long a, long long b) {\n        return a + b;\n    }\n};\n",
        ),
        (
            "rust",
            "impl Solution {\n    pub fn add(a: i64, b: i64) -> i64 {\n        a + b\n    }\n}\n",
        ),
    ];

    /// Test: 64-bit values pass through the compiled harnesses intact
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_long_params_compiled_languages() {
        let dir = tempfile::tempdir().unwrap();
        let judge = judge(dir.path());
        let signature = FunctionSignature {
            function_name: "add".to_string(),
            parameter_types: vec!["long".to_string(), "long".to_string()],
            return_type: "long".to_string(),
        };
        let cases = vec![test_case(1, vec![json!(3_000_000_000i64), json!(1)], "3000000001", 2000)];

        for (language, source) in LONG_SOLUTIONS {
            let request = JudgeRequest {
                problem_id: 1,
                submission_id: None,
                language,
                source_code: source,
                mode: ProgramMode::Harness(&signature),
            };
            let verdict = judge.judge(request, &cases).await.unwrap();
            assert_eq!(
                verdict.status,
                SubmissionStatus::Accepted,
                "{}: {:?}",
                language,
                verdict.results
            );
        }
    }

    /// Test: array and string parameters round-trip through the Python harness
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_python_array_and_string_params() {
        let dir = tempfile::tempdir().unwrap();
        let judge = judge(dir.path());
        let signature = FunctionSignature {
            function_name: "label".to_string(),
            parameter_types: vec!["integer[]".to_string(), "string".to_string()],
            return_type: "string[]".to_string(),
        };
        let source = "class Solution:\n    def label(self, nums, prefix):\n        return [prefix + str(n) for n in nums]\n";
        let cases = vec![test_case(1, vec![json!([1, 2]), json!("n")], r#"["n1","n2"]"#, 2000)];

        let request = JudgeRequest {
            problem_id: 1,
            submission_id: None,
            language: "python",
            source_code: source,
            mode: ProgramMode::Harness(&signature),
        };
        let verdict = judge.judge(request, &cases).await.unwrap();
        assert_eq!(verdict.status, SubmissionStatus::Accepted, "{:?}", verdict.results);
    }

    /// Test: a Java syntax error is a compile error with no test results
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_java_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let judge = judge(dir.path());
        let signature = add_signature();
        let source = "class Solution {\n    public int add(int a, int b) {\n        return a + b\n    }\n}\n";
        let cases = vec![
            test_case(1, vec![json!(1), json!(2)], "3", 2000),
            test_case(2, vec![json!(2), json!(2)], "4", 2000),
        ];

        let request = JudgeRequest {
            problem_id: 1,
            submission_id: None,
            language: "java",
            source_code: source,
            mode: ProgramMode::Harness(&signature),
        };
        let verdict = judge.judge(request, &cases).await.unwrap();
        assert_eq!(verdict.status, SubmissionStatus::CompileError);
        assert!(verdict.results.is_empty());
        assert!(verdict.compile_error.is_some());
    }

    /// Test: sleeping past the limit is TLE with runtime at or over the limit
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sleep_is_time_limit_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let judge = judge(dir.path());
        let signature = add_signature();
        let source = "import time\n\nclass Solution:\n    def add(self, a, b):\n        time.sleep(10)\n        return a + b\n";
        let cases = vec![test_case(1, vec![json!(1), json!(2)], "3", 1000)];

        let request = JudgeRequest {
            problem_id: 1,
            submission_id: None,
            language: "python",
            source_code: source,
            mode: ProgramMode::Harness(&signature),
        };
        let verdict = judge.judge(request, &cases).await.unwrap();
        assert_eq!(verdict.status, SubmissionStatus::TimeLimitExceeded);
        assert!(verdict.results[0].runtime_ms >= 1000);
    }

    /// Test: scratch code reads raw stdin and runs without network
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_scratch_python() {
        let dir = tempfile::tempdir().unwrap();
        let judge = Arc::new(judge(dir.path()));
        let service = RunService::new(
            judge,
            Arc::new(MemoryStore::new()),
            ScratchConfig {
                time_limit_ms: 10_000,
                memory_limit_kb: 256 * 1024,
            },
        );

        let result = service
            .run_scratch("name = input()\nprint(f'hello {name}')\n", "python", "arbiter\n")
            .await
            .unwrap();
        assert_eq!(result.status, ScratchStatus::Success);
        assert_eq!(result.output.trim(), "hello arbiter");
        assert!(result.memory_kb > 0);

        let result = service
            .run_scratch(
                "import urllib.request\nurllib.request.urlopen('http://example.com', timeout=2)\n",
                "python",
                "",
            )
            .await
            .unwrap();
        assert_eq!(result.status, ScratchStatus::RuntimeError);
    }
}
