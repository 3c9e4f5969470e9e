use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::{Client, config::Config};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::AppResult;
use crate::error::AppError;

/// A text-generation backend.
pub trait Generator: Send + Sync {
    /// Send one prompt and return the reply text. When `json_mode` is set the backend is asked to
    /// reply with a JSON object; a backend that cannot do so fails with
    /// [`AppError::UnsupportedResponseFormat`].
    fn generate<'a>(&'a self, prompt: &'a str, json_mode: bool) -> BoxFuture<'a, AppResult<String>>;
}

/// [`Generator`] over an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OAIGenerator<'a, C: Config> {
    client: &'a Client<C>,
    model: String,
    temperature: Option<f32>,
}

impl<'a, C: Config> OAIGenerator<'a, C> {
    pub fn new(client: &'a Client<C>, model: String, temperature: Option<f32>) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }
}

impl<'c, C: Config> Generator for OAIGenerator<'c, C> {
    fn generate<'a>(&'a self, prompt: &'a str, json_mode: bool) -> BoxFuture<'a, AppResult<String>> {
        async move {
            let mut args = CreateChatCompletionRequestArgs::default();
            args.model(&self.model).messages(vec![
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ]);
            if json_mode {
                args.response_format(ResponseFormat::JsonObject);
            }
            if let Some(t) = self.temperature {
                args.temperature(t);
            }
            let request = args.build()?;

            let response = match self.client.chat().create(request).await {
                Ok(r) => r,
                Err(e) if json_mode && rejects_response_format(&e) => {
                    return Err(AppError::UnsupportedResponseFormat(e.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            debug!("Chat response id {}", response.id);

            let content = response
                .choices
                .into_iter()
                .find_map(|c| c.message.content)
                .unwrap_or_default();
            trace!("Chat response content: {content}");
            Ok(content)
        }
        .boxed()
    }
}

/// Whether the server refused the request because of `response_format`.
fn rejects_response_format(e: &OpenAIError) -> bool {
    match e {
        OpenAIError::ApiError(api) => {
            api.param.as_deref() == Some("response_format")
                || api.message.contains("response_format")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use async_openai::error::ApiError;

    use super::*;

    fn api_error(message: &str, param: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: Some("invalid_request_error".to_string()),
            param: param.map(str::to_string),
            code: None,
        })
    }

    #[test]
    fn response_format_rejection_is_recognised() {
        assert!(rejects_response_format(&api_error(
            "unsupported value",
            Some("response_format")
        )));
        assert!(rejects_response_format(&api_error(
            "'response_format' of type 'json_object' is not supported with this model",
            None
        )));
    }

    #[test]
    fn other_failures_are_not_a_rejection() {
        assert!(!rejects_response_format(&api_error(
            "model not found",
            Some("model")
        )));
        assert!(!rejects_response_format(&OpenAIError::InvalidArgument(
            "response_format".to_string()
        )));
    }
}
