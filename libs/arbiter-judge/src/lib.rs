pub mod comparator;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod harness;
pub mod runner;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod engine_tests;

pub use config::{LanguageConfig, LanguageRegistry};
pub use engine::{Build, ExecutionLimits, ExecutionOutcome, PreparedProgram, SandboxExecutor};
pub use error::{HarnessError, JudgeError, SandboxError};
pub use evaluator::Verdict;
pub use executor::{Judge, JudgeRequest, ProgramMode};
pub use runner::{RunCodeResult, RunService, ScratchResult, ScratchStatus};
pub use runtime::ContainerRuntime;
