// Language registry for the judge: one capability record per language
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::JudgeError;

/// Directory inside the sandbox where program files and input are mounted
pub const SANDBOX_DIR: &str = "/sandbox";
/// Name of the encoded input file next to the program files
pub const INPUT_FILE: &str = "input.txt";
/// Subdirectory the build step writes its artifacts into
pub const BUILD_DIR: &str = "build";

const BUILTIN_LANGUAGES: &str = include_str!("../../../config/languages.json");

/// Which harness generator drives a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarnessKind {
    Python,
    Java,
    Cpp,
    Rust,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageExecution {
    pub command: String,
    pub args: Vec<String>,
    pub file_extension: String,
}

/// Build step run once before any test executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_time_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    pub harness: HarnessKind,
    pub execution: LanguageExecution,
    /// Absent for interpreted languages
    #[serde(default)]
    pub compile: Option<CompileStep>,
    /// File the runner command compiles or executes
    pub entry_file: String,
    /// File holding the user's code when a harness drives it
    pub solution_file: String,
    /// Stderr fragments that mark a failure as a compile error
    #[serde(default)]
    pub compile_error_patterns: Vec<String>,
    /// Exit code a runner reserves for compile failures, if it has one
    #[serde(default)]
    pub compile_failure_exit_code: Option<i64>,
    /// Scales a test's time limit into the sandbox deadline
    #[serde(default = "default_time_multiplier")]
    pub time_multiplier: f64,
    #[serde(default)]
    pub env: Vec<String>,
}

impl LanguageConfig {
    /// Full command run inside the container
    pub fn command(&self) -> Vec<String> {
        let mut cmd = Vec::with_capacity(self.execution.args.len() + 1);
        cmd.push(self.execution.command.clone());
        cmd.extend(self.execution.args.iter().cloned());
        cmd
    }

    /// Full build command, if the language has a build step
    pub fn compile_command(&self) -> Option<Vec<String>> {
        self.compile.as_ref().map(|step| {
            let mut cmd = Vec::with_capacity(step.args.len() + 1);
            cmd.push(step.command.clone());
            cmd.extend(step.args.iter().cloned());
            cmd
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language registry, keyed by lowercase language name
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// The language set shipped in config/languages.json, compiled in
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_LANGUAGES).context("Embedded languages.json is invalid")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;
        Self::from_configs(languages_json.languages)
    }

    pub fn from_configs(languages: Vec<LanguageConfig>) -> Result<Self> {
        let mut configs = HashMap::new();
        for lang in languages {
            let key = lang.name.to_lowercase();
            if configs.insert(key, lang).is_some() {
                bail!("Duplicate language entry in registry");
            }
        }
        if configs.is_empty() {
            bail!("No languages configured");
        }
        Ok(Self { configs })
    }

    /// Get configuration for a language identifier
    pub fn get(&self, language: &str) -> Result<&LanguageConfig, JudgeError> {
        self.configs
            .get(&language.trim().to_lowercase())
            .ok_or_else(|| JudgeError::Validation(format!("Unsupported language: {}", language)))
    }

    /// List all supported languages, sorted
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}
