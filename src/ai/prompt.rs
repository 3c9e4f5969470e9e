use std::borrow::Cow;
use std::collections::HashMap;

use tracing::warn;

/// A prompt template with `{{key}}` placeholders.
pub struct PromptTemplate<'t> {
    template: Cow<'t, str>,
}

impl<'t> PromptTemplate<'t> {
    pub fn new(template: impl Into<Cow<'t, str>>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the template by replacing `{{key}}` with the corresponding value.
    /// Placeholders without a value are left in place and logged.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> String {
        let mut output = self.template.to_string();
        for (k, v) in vars {
            let placeholder = format!("{{{{{}}}}}", k);
            output = output.replace(&placeholder, v);
        }
        if let Some(start) = output.find("{{")
            && let Some(len) = output[start..].find("}}")
        {
            warn!("Unfilled prompt placeholder: {}", &output[start..start + len + 2]);
        }
        output
    }
}
