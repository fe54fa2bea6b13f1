//! Validation and execution of generated files.
//!
//! Generated files pass through [`CodeValidator::validate_file`] before they
//! are written. Files with hard errors are skipped unless the validator had
//! no way to check them (for example `python3` is not installed). After the
//! write, interpretable files are executed best-effort and, when a test file
//! was produced, the project's test suite is run.

use crate::config::ValidationConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;
use walkdir::WalkDir;

/// Parses stdin and prints `line N: message` on a syntax error.
const PY_SYNTAX_CHECK: &str = "import ast, sys
src = sys.stdin.read()
try:
    ast.parse(src)
except SyntaxError as e:
    print(f'line {e.lineno}: {e.msg}')
    sys.exit(1)
";

/// Substrings flagged as risky in code files. Warnings only.
const RISKY_PATTERNS: [(&str, &str); 5] = [
    ("eval(", "eval"),
    ("exec(", "exec"),
    ("__import__", "__import__"),
    ("os.system", "os.system"),
    ("subprocess.", "subprocess"),
];

const CODE_EXTENSIONS: [&str; 6] = ["py", "js", "ts", "jsx", "tsx", "sh"];

static PASSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) passed").expect("Failed to compile passed regex"));
static FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) failed").expect("Failed to compile failed regex"));
static UNITTEST_RAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Ran (\d+) tests?").expect("Failed to compile unittest regex"));
static UNITTEST_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FAILED \((?:failures=(\d+))?(?:, )?(?:errors=(\d+))?\)")
        .expect("Failed to compile unittest failure regex")
});

// =============================================================================
// Reports
// =============================================================================

/// Outcome of pre-write validation for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub path: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// False when no checker was available for a language that needs one.
    pub checked: bool,
}

impl ValidationReport {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            checked: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Write unless there are hard errors from an actual check.
    #[must_use]
    pub fn should_write(&self) -> bool {
        self.is_valid() || !self.checked
    }
}

/// Result of running one generated file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Result of a test suite run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub success: bool,
    pub tests_found: bool,
    pub passed: u32,
    pub failed: u32,
    pub output: String,
    pub error: Option<String>,
}

// =============================================================================
// Helpers
// =============================================================================

fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Whether a file name suggests a test (`test_x.py`, `x_test.py`, `x.test.js`, `x.spec.ts`).
#[must_use]
pub fn is_test_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    let stem = name.split('.').next().unwrap_or("");

    stem.starts_with("test_")
        || stem.ends_with("_test")
        || name.contains(".test.")
        || name.contains(".spec.")
}

/// Check JSON, tolerating `//` line comments.
pub fn check_json_syntax(content: &str) -> std::result::Result<(), String> {
    let stripped: String = content
        .lines()
        .map(|line| line.find("//").map_or(line, |idx| &line[..idx]))
        .collect::<Vec<_>>()
        .join("\n");

    serde_json::from_str::<serde_json::Value>(&stripped)
        .map(|_| ())
        .map_err(|e| format!("line {}: {}", e.line(), e))
}

/// Risky-pattern warnings for code files.
#[must_use]
pub fn risky_pattern_warnings(path: &str, content: &str) -> Vec<String> {
    if !CODE_EXTENSIONS.contains(&extension_of(path).as_str()) {
        return Vec::new();
    }
    RISKY_PATTERNS
        .iter()
        .filter(|(pattern, _)| content.contains(pattern))
        .map(|(_, name)| format!("Contains potentially unsafe code: {}", name))
        .collect()
}

/// Extract pass/fail counts from pytest or unittest output.
#[must_use]
pub fn parse_test_counts(output: &str) -> (u32, u32) {
    let capture = |re: &Regex, group: usize| {
        re.captures_iter(output)
            .last()
            .and_then(|c| c.get(group))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    };

    if let Some(passed) = capture(&PASSED, 1) {
        return (passed, capture(&FAILED, 1).unwrap_or(0));
    }
    if let Some(failed) = capture(&FAILED, 1) {
        return (0, failed);
    }

    // unittest: "Ran 3 tests" + optional "FAILED (failures=1, errors=1)"
    if let Some(ran) = capture(&UNITTEST_RAN, 1) {
        let failed = capture(&UNITTEST_FAILED, 1).unwrap_or(0) + capture(&UNITTEST_FAILED, 2).unwrap_or(0);
        return (ran.saturating_sub(failed), failed);
    }

    (0, 0)
}

// =============================================================================
// Code Validator
// =============================================================================

/// Validates, executes and tests generated files inside one project.
#[derive(Debug, Clone)]
pub struct CodeValidator {
    root: PathBuf,
    python: String,
    timeout: Duration,
}

impl CodeValidator {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &ValidationConfig::default())
    }

    #[must_use]
    pub fn from_config(root: impl Into<PathBuf>, config: &ValidationConfig) -> Self {
        Self {
            root: root.into(),
            python: config.python.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_python(mut self, python: &str) -> Self {
        self.python = python.to_string();
        self
    }

    fn python_available(&self) -> bool {
        which::which(&self.python).is_ok()
    }

    /// Validate one file before it is written.
    pub async fn validate_file(&self, path: &str, content: &str) -> ValidationReport {
        let mut report = ValidationReport::new(path);

        if content.trim().is_empty() {
            report.warnings.push("File is empty".to_string());
            return report;
        }

        match extension_of(path).as_str() {
            "py" => match self.check_python_syntax(content).await {
                Some(Ok(())) => {}
                Some(Err(message)) => report.errors.push(format!("Syntax error: {}", message)),
                None => {
                    report.checked = false;
                    report
                        .warnings
                        .push(format!("{} not available, syntax not checked", self.python));
                }
            },
            "json" => {
                if let Err(message) = check_json_syntax(content) {
                    report.errors.push(format!("JSON syntax error: {}", message));
                }
            }
            _ => {}
        }

        report.warnings.extend(risky_pattern_warnings(path, content));
        report
    }

    /// `None` when no interpreter could be run.
    pub async fn check_python_syntax(&self, content: &str) -> Option<std::result::Result<(), String>> {
        if !self.python_available() {
            return None;
        }

        let mut child = AsyncCommand::new(&self.python)
            .args(["-c", PY_SYNTAX_CHECK])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .ok()?;

        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(content.as_bytes()).await.is_err() {
                return None;
            }
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .ok()?
            .ok()?;

        if output.status.success() {
            Some(Ok(()))
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let message = if stdout.is_empty() {
                String::from_utf8_lossy(&output.stderr).trim().to_string()
            } else {
                stdout
            };
            Some(Err(message))
        }
    }

    /// Interpreter for a written file, if it is one we run.
    fn interpreter_for(&self, relative: &Path) -> Option<String> {
        match relative.extension().and_then(|e| e.to_str()) {
            Some("py") => Some(self.python.clone()),
            Some("sh") => Some("sh".to_string()),
            Some("js") => Some("node".to_string()),
            _ => None,
        }
    }

    /// Whether [`Self::execute_file`] knows how to run this file.
    #[must_use]
    pub fn is_executable(&self, relative: &Path) -> bool {
        self.interpreter_for(relative).is_some()
    }

    /// Run a written file from the project root.
    pub async fn execute_file(&self, relative: &Path) -> ExecutionResult {
        let target = self.root.join(relative);
        if !target.exists() {
            return ExecutionResult::failed(format!("File not found: {}", relative.display()));
        }

        let Some(interpreter) = self.interpreter_for(relative) else {
            return ExecutionResult::failed(format!("No interpreter for {}", relative.display()));
        };
        if which::which(&interpreter).is_err() {
            return ExecutionResult::failed(format!("{} not found on PATH", interpreter));
        }

        debug!("Executing {} with {}", relative.display(), interpreter);
        let run = AsyncCommand::new(&interpreter)
            .arg(relative)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let success = output.status.success();
                let error = (!success).then(|| {
                    let head: String = stderr.chars().take(200).collect();
                    format!(
                        "Execution failed with exit code {}: {}",
                        output.status.code().unwrap_or(-1),
                        head.trim()
                    )
                });
                ExecutionResult {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr,
                    exit_code: output.status.code(),
                    success,
                    error,
                }
            }
            Ok(Err(e)) => ExecutionResult::failed(format!("Error executing file: {}", e)),
            Err(_) => ExecutionResult::failed(format!(
                "Execution timed out after {} seconds",
                self.timeout.as_secs()
            )),
        }
    }

    /// Whether the project has any Python test files.
    #[must_use]
    pub fn has_tests(&self) -> bool {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with('.') || n == "__pycache__" || n == "venv")
            })
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file() && is_test_file(e.path()))
    }

    /// Run the project's tests with pytest, falling back to unittest.
    pub async fn run_tests(&self) -> TestRunResult {
        if !self.has_tests() {
            return TestRunResult {
                error: Some("No test files found".to_string()),
                ..TestRunResult::default()
            };
        }
        if !self.python_available() {
            return TestRunResult {
                tests_found: true,
                error: Some(format!("{} not found on PATH", self.python)),
                ..TestRunResult::default()
            };
        }

        let timeout = self.timeout.saturating_mul(2);
        let mut result = self.run_test_command(&["-m", "pytest", "-q"], timeout).await;

        if result.output.contains("No module named pytest") {
            debug!("pytest unavailable, falling back to unittest");
            result = self
                .run_test_command(&["-m", "unittest", "discover", "-p", "test_*.py"], timeout)
                .await;
        }

        result
    }

    async fn run_test_command(&self, args: &[&str], timeout: Duration) -> TestRunResult {
        let run = AsyncCommand::new(&self.python)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => {
                let text = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                let (passed, failed) = parse_test_counts(&text);
                TestRunResult {
                    success: output.status.success(),
                    tests_found: true,
                    passed,
                    failed,
                    output: text,
                    error: None,
                }
            }
            Ok(Err(e)) => TestRunResult {
                tests_found: true,
                error: Some(format!("Could not run tests: {}", e)),
                ..TestRunResult::default()
            },
            Err(_) => TestRunResult {
                tests_found: true,
                error: Some(format!(
                    "Test execution timed out after {} seconds",
                    timeout.as_secs()
                )),
                ..TestRunResult::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn python_present() -> bool {
        which::which("python3").is_ok()
    }

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file(Path::new("tests/test_hello.py")));
        assert!(is_test_file(Path::new("hello_test.py")));
        assert!(is_test_file(Path::new("web/app.test.js")));
        assert!(is_test_file(Path::new("web/app.spec.ts")));
        assert!(!is_test_file(Path::new("src/contest.py")));
        assert!(!is_test_file(Path::new("hello.py")));
    }

    #[test]
    fn test_check_json_syntax() {
        assert!(check_json_syntax("{\"a\": 1}").is_ok());
        assert!(check_json_syntax("{\n  // comment\n  \"a\": 1\n}").is_ok());
        assert!(check_json_syntax("{\"a\": }").is_err());
    }

    #[test]
    fn test_risky_patterns() {
        let warnings = risky_pattern_warnings("x.py", "eval(input())\nimport subprocess\nsubprocess.run([])");
        assert_eq!(warnings.len(), 2);
        assert!(risky_pattern_warnings("notes.md", "eval(x)").is_empty());
    }

    #[test]
    fn test_parse_pytest_counts() {
        assert_eq!(parse_test_counts("==== 3 passed in 0.01s ===="), (3, 0));
        assert_eq!(parse_test_counts("==== 1 failed, 2 passed in 0.02s ===="), (2, 1));
        assert_eq!(parse_test_counts("==== 4 failed in 0.02s ===="), (0, 4));
        assert_eq!(parse_test_counts("Ran 3 tests in 0.001s\n\nOK"), (3, 0));
        assert_eq!(
            parse_test_counts("Ran 3 tests in 0.001s\n\nFAILED (failures=1)"),
            (2, 1)
        );
        assert_eq!(parse_test_counts("nothing"), (0, 0));
    }

    #[test]
    fn test_report_should_write() {
        let mut report = ValidationReport::new("a.py");
        assert!(report.should_write());
        report.errors.push("bad".into());
        assert!(!report.should_write());
        report.checked = false;
        assert!(report.should_write());
    }

    #[tokio::test]
    async fn test_validate_empty_file_warns() {
        let temp = TempDir::new().unwrap();
        let report = CodeValidator::new(temp.path()).validate_file("a.py", "   ").await;
        assert!(report.is_valid());
        assert_eq!(report.warnings, vec!["File is empty"]);
    }

    #[tokio::test]
    async fn test_validate_invalid_json_rejected() {
        let temp = TempDir::new().unwrap();
        let report = CodeValidator::new(temp.path())
            .validate_file("data.json", "{not json")
            .await;
        assert!(!report.should_write());
    }

    #[tokio::test]
    async fn test_validate_python_syntax() {
        let temp = TempDir::new().unwrap();
        let validator = CodeValidator::new(temp.path());

        let good = validator.validate_file("ok.py", "print('hi')\n").await;
        assert!(good.is_valid());

        let bad = validator.validate_file("bad.py", "def broken(:\n").await;
        if python_present() {
            assert!(!bad.is_valid());
            assert!(bad.errors[0].contains("line 1"));
        } else {
            assert!(!bad.checked);
            assert!(bad.should_write());
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_gives_no_signal() {
        let temp = TempDir::new().unwrap();
        let validator = CodeValidator::new(temp.path()).with_python("definitely-not-python-xyz");
        let report = validator.validate_file("bad.py", "def broken(:\n").await;
        assert!(!report.checked);
        assert!(report.should_write());
        assert!(report.warnings[0].contains("syntax not checked"));
    }

    #[tokio::test]
    async fn test_execute_python_file() {
        if !python_present() {
            return;
        }
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("hello.py"), "print('Hello, World!')\n").unwrap();

        let result = CodeValidator::new(temp.path())
            .execute_file(Path::new("hello.py"))
            .await;
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("Hello, World!"));
    }

    #[tokio::test]
    async fn test_execute_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = CodeValidator::new(temp.path())
            .execute_file(Path::new("nope.py"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn test_run_tests_without_tests() {
        let temp = TempDir::new().unwrap();
        let result = CodeValidator::new(temp.path()).run_tests().await;
        assert!(!result.tests_found);
        assert_eq!(result.error.as_deref(), Some("No test files found"));
    }
}
