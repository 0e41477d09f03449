use arbiter_common::encoding::{ParamType, ScalarType};
use serde_json::json;

use super::{argument_lines, call_arguments, render_template, HarnessGenerator, HarnessPlan};
use crate::error::HarnessError;

const TEMPLATE: &str = include_str!("../../templates/rust_main.hbs");

/// Rust driver: declares `struct Solution`, includes the user's `impl Solution`
/// block and calls the associated function
pub struct RustHarness;

fn rust_type(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::Scalar(ScalarType::Integer) => "i32",
        ParamType::Scalar(ScalarType::Long) => "i64",
        ParamType::Scalar(ScalarType::Float) => "f64",
        ParamType::Scalar(ScalarType::Boolean) => "bool",
        ParamType::Scalar(ScalarType::String) => "String",
        ParamType::Array(ScalarType::Integer) => "Vec<i32>",
        ParamType::Array(ScalarType::Long) => "Vec<i64>",
        ParamType::Array(ScalarType::Float) => "Vec<f64>",
        ParamType::Array(ScalarType::Boolean) => "Vec<bool>",
        ParamType::Array(ScalarType::String) => "Vec<String>",
    }
}

fn parser(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::Scalar(ScalarType::Integer) => "parse_int",
        ParamType::Scalar(ScalarType::Long) => "parse_long",
        ParamType::Scalar(ScalarType::Float) => "parse_float",
        ParamType::Scalar(ScalarType::Boolean) => "parse_bool",
        ParamType::Scalar(ScalarType::String) => "parse_string",
        ParamType::Array(ScalarType::Integer) => "parse_int_array",
        ParamType::Array(ScalarType::Long) => "parse_long_array",
        ParamType::Array(ScalarType::Float) => "parse_float_array",
        ParamType::Array(ScalarType::Boolean) => "parse_bool_array",
        ParamType::Array(ScalarType::String) => "parse_string_array",
    }
}

impl HarnessGenerator for RustHarness {
    fn render(&self, plan: &HarnessPlan) -> Result<String, HarnessError> {
        let lines = argument_lines(plan, "    ", |name, ty| {
            format!(
                "let {}: {} = arbiter_harness::{}(&input.next_line());",
                name,
                rust_type(ty),
                parser(ty)
            )
        });

        render_template(
            TEMPLATE,
            &json!({
                "function_name": plan.function_name,
                "argument_lines": lines,
                "call_arguments": call_arguments(plan),
            }),
        )
    }
}
