//! Harness generation.
//!
//! A harness is the driver program placed in a language's entry file. It
//! reads one encoded value per parameter from stdin, calls the user's
//! function from the solution file, and prints the return value in the
//! same line encoding. Each language has its own [`HarnessGenerator`],
//! selected through the language's registry record.

mod cpp;
mod java;
mod python;
mod rust;

use arbiter_common::encoding::ParamType;
use arbiter_common::types::FunctionSignature;
use handlebars::Handlebars;
use serde_json::Value;

use crate::config::{HarnessKind, LanguageConfig};
use crate::engine::ProgramFile;
use crate::error::HarnessError;

pub use cpp::CppHarness;
pub use java::JavaHarness;
pub use python::PythonHarness;
pub use rust::RustHarness;

/// A function signature resolved against the type vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessPlan {
    pub function_name: String,
    pub params: Vec<ParamType>,
    pub return_type: ParamType,
}

impl HarnessPlan {
    /// Resolve every declared type, failing on the first one outside the vocabulary
    pub fn from_signature(signature: &FunctionSignature) -> Result<Self, HarnessError> {
        let name = signature.function_name.trim();
        if !is_identifier(name) {
            return Err(HarnessError::InvalidFunctionName(signature.function_name.clone()));
        }

        let params = signature
            .parameter_types
            .iter()
            .map(|t| t.parse::<ParamType>().map_err(HarnessError::from))
            .collect::<Result<Vec<_>, _>>()?;
        let return_type = signature.return_type.parse::<ParamType>()?;

        Ok(Self {
            function_name: name.to_string(),
            params,
            return_type,
        })
    }

    pub fn check_arity(&self, actual: usize) -> Result<(), HarnessError> {
        if self.params.len() != actual {
            return Err(HarnessError::ArityMismatch {
                expected: self.params.len(),
                actual,
            });
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub trait HarnessGenerator: Send + Sync {
    /// Driver source for the language's entry file
    fn render(&self, plan: &HarnessPlan) -> Result<String, HarnessError>;
}

pub fn generator_for(kind: HarnessKind) -> &'static dyn HarnessGenerator {
    match kind {
        HarnessKind::Python => &PythonHarness,
        HarnessKind::Java => &JavaHarness,
        HarnessKind::Cpp => &CppHarness,
        HarnessKind::Rust => &RustHarness,
    }
}

/// Generate driver source for `signature` in `language`.
///
/// `encodings` are the ordered parameter lines of a test case; their count
/// must match the signature's arity.
pub fn generate(
    language: &LanguageConfig,
    signature: &FunctionSignature,
    encodings: &[String],
) -> Result<String, HarnessError> {
    let plan = HarnessPlan::from_signature(signature)?;
    plan.check_arity(encodings.len())?;
    generator_for(language.harness).render(&plan)
}

/// Driver in the entry file, user code in the solution file
pub fn harness_files(language: &LanguageConfig, driver: String, source_code: &str) -> Vec<ProgramFile> {
    vec![
        ProgramFile::new(&language.entry_file, driver),
        ProgramFile::new(&language.solution_file, source_code),
    ]
}

/// User code is the whole program
pub fn whole_program_files(language: &LanguageConfig, source_code: &str) -> Vec<ProgramFile> {
    vec![ProgramFile::new(&language.entry_file, source_code)]
}

pub(crate) fn render_template(template: &str, data: &Value) -> Result<String, HarnessError> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .render_template(template, data)
        .map_err(|e| HarnessError::Template(e.to_string()))
}

/// One declaration per parameter, named `arg0..argN` in declared order
pub(crate) fn argument_lines<F>(plan: &HarnessPlan, indent: &str, declare: F) -> String
where
    F: Fn(&str, &ParamType) -> String,
{
    plan.params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("{}{}", indent, declare(&format!("arg{}", i), ty)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn call_arguments(plan: &HarnessPlan) -> String {
    (0..plan.params.len())
        .map(|i| format!("arg{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
