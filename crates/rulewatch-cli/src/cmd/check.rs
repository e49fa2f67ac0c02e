use crate::output::print_json;
use anyhow::Context;
use rulewatch_core::{Condition, Metrics};

#[derive(serde::Serialize)]
struct CheckOutput<'a> {
    condition: String,
    metrics: &'a Metrics,
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation_error: Option<String>,
}

/// Parse `source` and evaluate it against the given values.
///
/// A parse failure is an error (exit 1). An evaluation failure such as a
/// division by zero counts as no match, the same as in the evaluation loop.
pub fn run(source: &str, spend: f64, ctr: f64, roas: f64, json: bool) -> anyhow::Result<()> {
    let condition = Condition::parse(source).context("invalid condition syntax")?;
    let metrics = Metrics { spend, ctr, roas };

    let (matched, evaluation_error) = match condition.evaluate(&metrics) {
        Ok(matched) => (matched, None),
        Err(e) => (false, Some(e.to_string())),
    };

    if json {
        return print_json(&CheckOutput {
            condition: condition.to_string(),
            metrics: &metrics,
            matched,
            evaluation_error,
        });
    }

    println!("condition: {condition}");
    println!("metrics:   spend={spend} ctr={ctr} roas={roas}");
    match evaluation_error {
        Some(err) => println!("result:    no match (evaluation error: {err})"),
        None if matched => println!("result:    match"),
        None => println!("result:    no match"),
    }
    Ok(())
}
