pub mod extract;
pub mod generate;
pub mod label_clusters;
pub mod prompt;
pub mod query;

use schemars::{JsonSchema, schema_for};
use serde_json::Value;

/// Schema metadata for types the model is asked to produce.
pub trait SchemaInfo {
    fn schema_value() -> Value;
    fn title() -> String;
    fn description() -> String;
}

impl<T: JsonSchema> SchemaInfo for T {
    fn schema_value() -> Value {
        schema_for!(T).as_value().to_owned()
    }

    fn title() -> String {
        Self::schema_value()
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| T::schema_name().into_owned())
    }

    fn description() -> String {
        Self::schema_value()
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_default()
    }
}
