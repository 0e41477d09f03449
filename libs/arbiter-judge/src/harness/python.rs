use serde_json::json;

use super::{render_template, HarnessGenerator, HarnessPlan};
use crate::error::HarnessError;

const TEMPLATE: &str = include_str!("../../templates/python_main.hbs");

/// Python driver: imports the solution module and calls either a
/// `Solution` method or a top-level function of the same name
pub struct PythonHarness;

impl HarnessGenerator for PythonHarness {
    fn render(&self, plan: &HarnessPlan) -> Result<String, HarnessError> {
        let param_kinds = plan
            .params
            .iter()
            .map(|ty| format!("\"{}\"", ty))
            .collect::<Vec<_>>()
            .join(", ");

        render_template(
            TEMPLATE,
            &json!({
                "function_name": plan.function_name,
                "param_kinds": param_kinds,
            }),
        )
    }
}
