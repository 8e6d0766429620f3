use luova::model::experiment::ExperimentConfig;
use luova::model::rotation::RotationConfig;
use luova::model::selection::{MarketContext, SelectionCriteria};
use schemars::schema_for;
use serde_json::{json, Value};

fn main() -> anyhow::Result<()> {
    // Prints one JSON document keyed by type name.
    // Use: cargo run --bin gen-schema > schemas.json
    let schemas: Value = json!({
        "ExperimentConfig": serde_json::to_value(schema_for!(ExperimentConfig))?,
        "RotationConfig": serde_json::to_value(schema_for!(RotationConfig))?,
        "SelectionCriteria": serde_json::to_value(schema_for!(SelectionCriteria))?,
        "MarketContext": serde_json::to_value(schema_for!(MarketContext))?,
    });

    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
