//! Built-in arithmetic tools.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value, json};

use crate::tools::{Tool, ToolRegistry};

type MathFn = fn(&[f64]) -> Result<f64>;

/// A tool over a fixed list of numeric parameters.
pub struct MathTool {
    name: &'static str,
    description: &'static str,
    params: &'static [&'static str],
    func: MathFn,
}

impl MathTool {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        params: &'static [&'static str],
        func: MathFn,
    ) -> Self {
        Self {
            name,
            description,
            params,
            func,
        }
    }
}

impl Tool for MathTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.to_string(), json!({"type": "number"})))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.params,
            "additionalProperties": false
        })
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let values = self
            .params
            .iter()
            .map(|p| number_arg(args, p))
            .collect::<Result<Vec<f64>>>()?;
        let result = (self.func)(&values)?;
        // JSON has no inf/NaN; they would serialize as null.
        if result.is_nan() {
            bail!("{} has no real result", self.name);
        }
        if result.is_infinite() {
            bail!("{} result out of range", self.name);
        }
        Ok(json!(result))
    }
}

fn number_arg(args: &Map<String, Value>, key: &str) -> Result<f64> {
    let value = args
        .get(key)
        .ok_or_else(|| anyhow!("missing argument '{key}'"))?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| anyhow!("argument '{key}' must be a number, got {value}"))
}

fn sum(v: &[f64]) -> Result<f64> {
    Ok(v[0] + v[1])
}

fn multiply(v: &[f64]) -> Result<f64> {
    Ok(v[0] * v[1])
}

fn subtract(v: &[f64]) -> Result<f64> {
    Ok(v[0] - v[1])
}

fn divide(v: &[f64]) -> Result<f64> {
    if v[1] == 0.0 {
        bail!("Division by zero");
    }
    Ok(v[0] / v[1])
}

fn power(v: &[f64]) -> Result<f64> {
    Ok(v[0].powf(v[1]))
}

fn square_root(v: &[f64]) -> Result<f64> {
    if v[0] < 0.0 {
        bail!("Square root of negative number");
    }
    Ok(v[0].sqrt())
}

pub const SUM_NUMBERS: MathTool =
    MathTool::new("sum_numbers", "Sum two numbers", &["a", "b"], sum);
pub const MULTIPLY_NUMBERS: MathTool =
    MathTool::new("multiply_numbers", "Multiply two numbers", &["a", "b"], multiply);
pub const SUBTRACT_NUMBERS: MathTool =
    MathTool::new("subtract_numbers", "Subtract two numbers", &["a", "b"], subtract);
pub const DIVIDE_NUMBERS: MathTool =
    MathTool::new("divide_numbers", "Divide two numbers", &["a", "b"], divide);
pub const POWER: MathTool = MathTool::new(
    "power",
    "Raise a number to a power",
    &["base", "exponent"],
    power,
);
pub const SQUARE_ROOT: MathTool = MathTool::new(
    "square_root",
    "Take the square root of a number",
    &["x"],
    square_root,
);

/// Registry with all six arithmetic tools.
pub fn math_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in [
        SUM_NUMBERS,
        MULTIPLY_NUMBERS,
        SUBTRACT_NUMBERS,
        DIVIDE_NUMBERS,
        POWER,
        SQUARE_ROOT,
    ] {
        registry.register(Arc::new(tool))?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn registry_exposes_all_tools() {
        let registry = math_registry().expect("registry");
        assert_eq!(
            registry.names(),
            vec![
                "divide_numbers",
                "multiply_numbers",
                "power",
                "square_root",
                "subtract_numbers",
                "sum_numbers"
            ]
        );
    }

    #[test]
    fn parameters_list_required_numbers() {
        let schema = POWER.parameters();
        assert_eq!(schema["required"], json!(["base", "exponent"]));
        assert_eq!(schema["properties"]["base"]["type"], "number");
    }

    #[test]
    fn arithmetic_results() {
        assert_eq!(
            SUM_NUMBERS.invoke(&args(json!({"a": 2, "b": 2}))).expect("sum"),
            json!(4.0)
        );
        assert_eq!(
            POWER
                .invoke(&args(json!({"base": 2, "exponent": 10})))
                .expect("power"),
            json!(1024.0)
        );
        assert_eq!(
            SQUARE_ROOT.invoke(&args(json!({"x": "9"}))).expect("sqrt"),
            json!(3.0)
        );
    }

    #[test]
    fn failures_carry_reason() {
        let err = DIVIDE_NUMBERS
            .invoke(&args(json!({"a": 1, "b": 0})))
            .unwrap_err();
        assert_eq!(err.to_string(), "Division by zero");

        let err = SQUARE_ROOT.invoke(&args(json!({"x": -1}))).unwrap_err();
        assert_eq!(err.to_string(), "Square root of negative number");

        let err = SUBTRACT_NUMBERS.invoke(&args(json!({"a": 1}))).unwrap_err();
        assert_eq!(err.to_string(), "missing argument 'b'");

        let err = MULTIPLY_NUMBERS
            .invoke(&args(json!({"a": 1, "b": "x"})))
            .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn non_finite_results_are_failures() {
        let registry = math_registry().expect("registry");

        assert_eq!(
            registry.invoke("power", &args(json!({"base": 10, "exponent": 400}))),
            json!("Error: power result out of range")
        );
        assert_eq!(
            registry.invoke("power", &args(json!({"base": -8, "exponent": 0.5}))),
            json!("Error: power has no real result")
        );
        assert_eq!(
            registry.invoke("multiply_numbers", &args(json!({"a": 1e308, "b": 10}))),
            json!("Error: multiply_numbers result out of range")
        );
    }
}
