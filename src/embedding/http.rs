//! HTTP embedding provider
//!
//! Talks to an external inference service:
//! - `POST {base}/embed/text` `{"model", "texts"}` -> `{"embeddings": [[..], ..]}`
//! - `POST {base}/embed/image?model=` raw bytes -> `{"embedding": [..]}`
//!
//! Returned vectors are L2-normalised before they leave this module.

use super::{l2_normalize, Embedder, InputKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    embedding: Vec<f32>,
}

/// Embedding service client
pub struct HttpEmbedder {
    client: reqwest::Client,
    name: String,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(name: &str, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(name, base_url, client))
    }

    pub fn with_client(name: &str, base_url: String, client: reqwest::Client) -> Self {
        Self {
            client,
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        if !resp.status().is_success() {
            return Err(Error::Embedding(format!(
                "{}: embedding service returned {}",
                self.name,
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_input_kind(&self) -> InputKind {
        InputKind::Image
    }

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed/text", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TextRequest {
                model: &self.name,
                texts,
            })
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("{}: {}", self.name, e)))?;

        let body: TextResponse = self
            .check(resp)?
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("{}: invalid response: {}", self.name, e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "{}: expected {} embeddings, got {}",
                self.name,
                texts.len(),
                body.embeddings.len()
            )));
        }

        let mut embeddings = body.embeddings;
        embeddings.iter_mut().for_each(|v| l2_normalize(v));
        Ok(embeddings)
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let url = format!("{}/embed/image", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("model", self.name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("{}: {}", self.name, e)))?;

        let body: ImageResponse = self
            .check(resp)?
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("{}: invalid response: {}", self.name, e)))?;

        let mut embedding = body.embedding;
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}
