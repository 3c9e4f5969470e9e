use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::SchemaInfo;
use super::extract::{Extracted, extract_json_object};
use super::prompt::PromptTemplate;
use crate::AppResult;

/// A structured answer the model is asked to produce, with the prompt that asks for it.
pub trait Query: JsonSchema + Serialize + for<'de> Deserialize<'de> + SchemaInfo + Sized {
    /// zstd-compressed prompt template.
    const PROMPT: &'static [u8];

    /// The decompressed template, unrendered.
    fn template() -> AppResult<String> {
        let bytes = zstd::decode_all(std::io::Cursor::new(Self::PROMPT))?;
        Ok(String::from_utf8(bytes)?)
    }

    fn prompt(vars: &HashMap<&str, &str>) -> AppResult<String> {
        Ok(PromptTemplate::new(Self::template()?).render(vars))
    }

    /// Checks serde cannot express. `Err` carries the reason.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Parse a response into `Self`, falling back to the untouched response text when no valid
    /// object can be recovered.
    fn extract(response: &str) -> Extracted<Self> {
        trace!("Raw content: {response}");
        let Some(value) = extract_json_object(response) else {
            warn!("No JSON object found in {} response", Self::title());
            return Extracted::raw(response);
        };

        match serde_path_to_error::deserialize::<_, Self>(value) {
            Ok(parsed) => match parsed.validate() {
                Ok(()) => Extracted::Parsed(parsed),
                Err(reason) => {
                    warn!("Rejected {}: {reason}", Self::title());
                    Extracted::raw(response)
                }
            },
            Err(e) => {
                warn!("Failed to deserialize {}: {e}", Self::title());
                warn!("Failed to parse JSON at path: {}", e.path());
                Extracted::raw(response)
            }
        }
    }
}

#[macro_export]
#[allow(clippy::crate_in_macro_def)]
macro_rules! impl_query {
    ($struct_name:ident, $prompt:ident) => {
        impl crate::ai::query::Query for $struct_name {
            const PROMPT: &'static [u8] = $prompt;
        }
    };
    ($struct_name:ident, $prompt:ident, validate = $validate:path) => {
        impl crate::ai::query::Query for $struct_name {
            const PROMPT: &'static [u8] = $prompt;

            fn validate(&self) -> Result<(), String> {
                $validate(self)
            }
        }
    };
}
