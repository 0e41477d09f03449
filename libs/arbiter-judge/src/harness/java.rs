use arbiter_common::encoding::{ParamType, ScalarType};
use serde_json::json;

use super::{argument_lines, call_arguments, render_template, HarnessGenerator, HarnessPlan};
use crate::error::HarnessError;

const TEMPLATE: &str = include_str!("../../templates/java_main.hbs");

/// Java driver: `Main` calls an instance method of the user's `Solution` class
pub struct JavaHarness;

fn java_type(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::Scalar(ScalarType::Integer) => "int",
        ParamType::Scalar(ScalarType::Long) => "long",
        ParamType::Scalar(ScalarType::Float) => "double",
        ParamType::Scalar(ScalarType::Boolean) => "boolean",
        ParamType::Scalar(ScalarType::String) => "String",
        ParamType::Array(ScalarType::Integer) => "int[]",
        ParamType::Array(ScalarType::Long) => "long[]",
        ParamType::Array(ScalarType::Float) => "double[]",
        ParamType::Array(ScalarType::Boolean) => "boolean[]",
        ParamType::Array(ScalarType::String) => "String[]",
    }
}

fn parse_expr(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::Scalar(ScalarType::Integer) => "Integer.parseInt(readLine(reader).trim())",
        ParamType::Scalar(ScalarType::Long) => "Long.parseLong(readLine(reader).trim())",
        ParamType::Scalar(ScalarType::Float) => "Double.parseDouble(readLine(reader).trim())",
        ParamType::Scalar(ScalarType::Boolean) => "readLine(reader).trim().equalsIgnoreCase(\"true\")",
        ParamType::Scalar(ScalarType::String) => "readLine(reader)",
        ParamType::Array(ScalarType::Integer) => "parseIntArray(readLine(reader))",
        ParamType::Array(ScalarType::Long) => "parseLongArray(readLine(reader))",
        ParamType::Array(ScalarType::Float) => "parseDoubleArray(readLine(reader))",
        ParamType::Array(ScalarType::Boolean) => "parseBooleanArray(readLine(reader))",
        ParamType::Array(ScalarType::String) => "parseStringArray(readLine(reader))",
    }
}

impl HarnessGenerator for JavaHarness {
    fn render(&self, plan: &HarnessPlan) -> Result<String, HarnessError> {
        let lines = argument_lines(plan, "        ", |name, ty| {
            format!("{} {} = {};", java_type(ty), name, parse_expr(ty))
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
