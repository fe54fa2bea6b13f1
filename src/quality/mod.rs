//! Quality checks for generated code.
//!
//! - [`validator`] - Pre-write validation, execution of written files and test runs
//!
//! # Architecture
//!
//! ```text
//! GeneratedFile ──validate_file──> ValidationReport ──should_write?──> Workspace
//!                                                                        │
//!                                  execute_file <────────────────────────┤
//!                                  run_tests    <── test file written ───┘
//! ```

pub mod validator;

pub use validator::{
    check_json_syntax, is_test_file, parse_test_counts, risky_pattern_warnings, CodeValidator,
    ExecutionResult, TestRunResult, ValidationReport,
};
