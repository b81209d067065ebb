//! Embedding - Feature extractor capability and registry
//!
//! ## Responsibilities
//!
//! - `Embedder` trait: text/image embedding behind one interface
//! - Registry mapping provider keys to constructors
//! - `FeatureModality`: a named embedder plus the index fields it searches
//!
//! Model inference itself is external; the bundled provider talks HTTP.

mod http;

pub use http::HttpEmbedder;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Media the index field was embedded from
///
/// Every bundled index is built from keyframe images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
}

/// Feature extractor capability
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn required_input_kind(&self) -> InputKind;

    /// One vector per input text
    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>>;
}

/// Provider settings handed to a registry constructor
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    /// Modality name, also passed to the provider as the model key
    pub name: String,
    /// Registry key, e.g. `http`
    pub provider: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

type Constructor = Box<dyn Fn(&ProviderSpec) -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Provider key -> constructor
pub struct EmbedderRegistry {
    constructors: HashMap<String, Constructor>,
}

impl EmbedderRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the bundled `http` provider
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("http", |spec| {
            let endpoint = spec.endpoint.clone().ok_or_else(|| {
                Error::Config(format!("modality {} needs EMBEDDING_URL", spec.name))
            })?;
            Ok(Arc::new(HttpEmbedder::new(&spec.name, endpoint, spec.timeout)?) as Arc<dyn Embedder>)
        });
        registry
    }

    pub fn register<F>(&mut self, key: &str, constructor: F)
    where
        F: Fn(&ProviderSpec) -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        self.constructors.insert(key.to_string(), Box::new(constructor));
    }

    pub fn build(&self, spec: &ProviderSpec) -> Result<Arc<dyn Embedder>> {
        let constructor = self.constructors.get(&spec.provider).ok_or_else(|| {
            Error::Config(format!(
                "modality {}: unknown embedding provider {}",
                spec.name, spec.provider
            ))
        })?;
        constructor(spec)
    }
}

/// A named feature type and the index fields it is searched against
#[derive(Clone)]
pub struct FeatureModality {
    pub name: String,
    pub embedder: Arc<dyn Embedder>,
    pub index_fields: Vec<String>,
}

impl FeatureModality {
    /// Embed one text and L2-normalise it
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed_text(&[text.to_string()]).await?;
        let mut vector = vectors.pop().ok_or_else(|| {
            Error::Embedding(format!("{} returned no embedding", self.name))
        })?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl std::fmt::Debug for FeatureModality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureModality")
            .field("name", &self.name)
            .field("embedder", &self.embedder.name())
            .field("index_fields", &self.index_fields)
            .finish()
    }
}

/// `name=provider:field[+field...]`, entries separated by `;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalitySpec {
    pub name: String,
    pub provider: String,
    pub index_fields: Vec<String>,
}

pub fn parse_modalities(raw: &str) -> Result<Vec<ModalitySpec>> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, rest) = entry
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid modality entry: {}", entry)))?;
            let (provider, fields) = rest
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("modality {} has no provider", name)))?;
            let index_fields: Vec<String> = fields
                .split('+')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            if index_fields.is_empty() {
                return Err(Error::Config(format!(
                    "modality {} does not have target features",
                    name
                )));
            }
            Ok(ModalitySpec {
                name: name.trim().to_string(),
                provider: provider.trim().to_string(),
                index_fields,
            })
        })
        .collect()
}

/// Scale to unit length; zero vectors are left alone
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl Embedder for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn required_input_kind(&self) -> InputKind {
            InputKind::Image
        }
        async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }
        async fn embed_image(&self, _image: &[u8]) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn spec(provider: &str) -> ProviderSpec {
        ProviderSpec {
            name: "clip".to_string(),
            provider: provider.to_string(),
            endpoint: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_parse_modalities() {
        let specs = parse_modalities("clip=http:clip_image+clip_video; siglip=http:siglip").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "clip");
        assert_eq!(specs[0].index_fields, vec!["clip_image", "clip_video"]);
        assert_eq!(specs[1].provider, "http");

        assert!(parse_modalities("clip").is_err());
        assert!(parse_modalities("clip=http:").is_err());
        assert!(parse_modalities("").unwrap().is_empty());
    }

    #[test]
    fn test_registry_unknown_provider_is_config_error() {
        let registry = EmbedderRegistry::with_defaults();
        assert!(matches!(registry.build(&spec("onnx")), Err(Error::Config(_))));
        // http without an endpoint
        assert!(matches!(registry.build(&spec("http")), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_custom_provider_and_normalised_query() {
        let mut registry = EmbedderRegistry::empty();
        registry.register("fixed", |_| Ok(Arc::new(Fixed) as Arc<dyn Embedder>));
        let embedder = registry.build(&spec("fixed")).unwrap();
        assert_eq!(embedder.required_input_kind(), InputKind::Image);

        let modality = FeatureModality {
            name: "clip".to_string(),
            embedder,
            index_fields: vec!["clip".to_string()],
        };
        let v = modality.embed_query("a cat").await.unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
