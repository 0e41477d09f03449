use arbiter_common::encoding::{ParamType, ScalarType};
use serde_json::json;

use super::{argument_lines, call_arguments, render_template, HarnessGenerator, HarnessPlan};
use crate::error::HarnessError;

const TEMPLATE: &str = include_str!("../../templates/cpp_main.hbs");

/// C++ driver: includes the solution file and calls a public method of `Solution`
pub struct CppHarness;

fn cpp_type(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::Scalar(ScalarType::Integer) => "int",
        ParamType::Scalar(ScalarType::Long) => "long long",
        ParamType::Scalar(ScalarType::Float) => "double",
        ParamType::Scalar(ScalarType::Boolean) => "bool",
        ParamType::Scalar(ScalarType::String) => "std::string",
        ParamType::Array(ScalarType::Integer) => "std::vector<int>",
        ParamType::Array(ScalarType::Long) => "std::vector<long long>",
        ParamType::Array(ScalarType::Float) => "std::vector<double>",
        ParamType::Array(ScalarType::Boolean) => "std::vector<bool>",
        ParamType::Array(ScalarType::String) => "std::vector<std::string>",
    }
}

fn parser(ty: &ParamType) -> Option<&'static str> {
    match ty {
        ParamType::Scalar(ScalarType::Integer) => Some("parse_int"),
        ParamType::Scalar(ScalarType::Long) => Some("parse_long"),
        ParamType::Scalar(ScalarType::Float) => Some("parse_double"),
        ParamType::Scalar(ScalarType::Boolean) => Some("parse_bool"),
        ParamType::Scalar(ScalarType::String) => None,
        ParamType::Array(ScalarType::Integer) => Some("parse_int_array"),
        ParamType::Array(ScalarType::Long) => Some("parse_long_array"),
        ParamType::Array(ScalarType::Float) => Some("parse_double_array"),
        ParamType::Array(ScalarType::Boolean) => Some("parse_bool_array"),
        ParamType::Array(ScalarType::String) => Some("parse_string_array"),
    }
}

impl HarnessGenerator for CppHarness {
    fn render(&self, plan: &HarnessPlan) -> Result<String, HarnessError> {
        let lines = argument_lines(plan, "    ", |name, ty| match parser(ty) {
            Some(parse) => format!(
                "{} {} = arbiter_harness::{}(arbiter_harness::read_line());",
                cpp_type(ty),
                name,
                parse
            ),
            None => format!("{} {} = arbiter_harness::read_line();", cpp_type(ty), name),
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
