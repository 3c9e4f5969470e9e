use async_openai::types::embeddings::CreateEmbeddingRequestArgs;
use async_openai::{Client, config::Config};
use futures::FutureExt;

use crate::AppResult;
use crate::classify::traits::Embedder;
use crate::error::AppError;

/// Embedding implementation that uses an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OAIEmbedder<'a, C: Config> {
    client: &'a Client<C>,
    model: String,
}

impl<'a, C: Config> OAIEmbedder<'a, C> {
    pub fn new(client: &'a Client<C>, model: String) -> Self {
        Self { client, model }
    }
}

impl<'a, C: Config> Embedder for OAIEmbedder<'a, C> {
    fn embed<'e>(&'e self, text: &'e str) -> futures::future::BoxFuture<'e, AppResult<Vec<f32>>> {
        async move {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(text)
                .build()?;

            let response = self.client.embeddings().create(request).await?;

            response
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| AppError::Other("embedding response contained no data".to_string()))
        }
        .boxed()
    }
}
