//! Application state
//!
//! Configuration is read from the environment once at startup; each role
//! builds its own shared state from it.

use crate::embedding::{parse_modalities, EmbedderRegistry, FeatureModality, ProviderSpec};
use crate::error::{Error, Result};
use crate::file_store::FileStore;
use crate::proxy_router::{BackendDescriptor, BackendRole, HttpProber, ProxyRouter, RolePolicy};
use crate::search_engine::SearchEngine;
use crate::vector_store::{MemoryVectorStore, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Search engine backend
    Search,
    /// Thumbnail and video backend
    File,
    /// Proxy router in front of both
    Core,
}

impl Role {
    pub fn default_port(&self) -> u16 {
        match self {
            Role::Core => 6900,
            Role::Search => 6901,
            Role::File => 6902,
        }
    }
}

/// Search backend settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Raw `MODALITIES` value
    pub modalities: Option<String>,
    pub embedding_url: Option<String>,
    pub embedding_timeout: Duration,
    pub ocr_enable: bool,
    pub ocr_field: String,
    pub vector_snapshot: Option<PathBuf>,
}

/// Router settings
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub search_servers: String,
    pub file_servers: String,
    pub search_policy: RolePolicy,
    pub file_policy: RolePolicy,
    pub sync_interval: Duration,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub role: Role,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Root holding `data/`
    pub work_dir: PathBuf,
    pub search: SearchConfig,
    pub core: CoreConfig,
}

impl AppConfig {
    /// Read the process environment
    pub fn from_env(role: Role) -> Result<Self> {
        Self::from_lookup(role, |key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(role: Role, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let parse = |key: &str| -> Result<Option<u64>> {
            get(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| Error::Config(format!("{} must be a non-negative integer: {}", key, v)))
                })
                .transpose()
        };

        let policy = |timeout_key: &str, concurrency_key: &str| -> Result<RolePolicy> {
            let defaults = RolePolicy::default();
            Ok(RolePolicy {
                timeout: parse(timeout_key)?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.timeout),
                max_concurrency: parse(concurrency_key)?
                    .map(|n| (n as usize).max(1))
                    .unwrap_or(defaults.max_concurrency),
            })
        };

        let port = match parse("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| Error::Config(format!("PORT out of range: {}", p)))?,
            None => role.default_port(),
        };

        Ok(Self {
            role,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            work_dir: get("WORK_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            search: SearchConfig {
                modalities: get("MODALITIES"),
                embedding_url: get("EMBEDDING_URL"),
                embedding_timeout: parse("EMBEDDING_TIMEOUT_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(Duration::from_secs(30)),
                ocr_enable: get("OCR_ENABLE")
                    .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                    .unwrap_or(false),
                ocr_field: get("OCR_FIELD").unwrap_or_else(|| "ocr".to_string()),
                vector_snapshot: get("VECTOR_SNAPSHOT").map(PathBuf::from),
            },
            core: CoreConfig {
                search_servers: get("SEARCH_SERVERS").unwrap_or_default(),
                file_servers: get("FILE_SERVERS").unwrap_or_default(),
                search_policy: policy("SEARCH_REQUEST_TIMEOUT_MS", "SEARCH_MAX_CONCURRENT_REQUESTS")?,
                file_policy: policy("FILE_REQUEST_TIMEOUT_MS", "FILE_MAX_CONCURRENT_REQUESTS")?,
                sync_interval: Duration::from_secs(parse("TARGET_FEATURES_SYNC_INTERVAL_SEC")?.unwrap_or(5).max(1)),
            },
        })
    }
}

/// Search backend state shared across handlers
#[derive(Clone)]
pub struct SearchState {
    pub engine: Arc<SearchEngine>,
    /// fps lookup for result rows
    pub files: Arc<FileStore>,
}

impl SearchState {
    pub async fn build(config: &AppConfig) -> Result<Self> {
        Self::build_with_registry(config, &EmbedderRegistry::with_defaults()).await
    }

    pub async fn build_with_registry(config: &AppConfig, registry: &EmbedderRegistry) -> Result<Self> {
        let search = &config.search;
        let raw = search
            .modalities
            .as_deref()
            .ok_or_else(|| Error::Config("MODALITIES is not set".to_string()))?;

        let mut modalities = Vec::new();
        for spec in parse_modalities(raw)? {
            let embedder = registry.build(&ProviderSpec {
                name: spec.name.clone(),
                provider: spec.provider.clone(),
                endpoint: search.embedding_url.clone(),
                timeout: search.embedding_timeout,
            })?;
            modalities.push(FeatureModality {
                name: spec.name,
                embedder,
                index_fields: spec.index_fields,
            });
        }

        let store = match &search.vector_snapshot {
            Some(path) => MemoryVectorStore::load_jsonl(path).await?,
            None => {
                tracing::warn!("VECTOR_SNAPSHOT is not set, starting with an empty store");
                MemoryVectorStore::new()
            }
        };
        let store: Arc<dyn VectorStore> = Arc::new(store);

        let ocr_field = search.ocr_enable.then(|| search.ocr_field.clone());
        let engine = SearchEngine::new(store, modalities, ocr_field)?;

        Ok(Self {
            engine: Arc::new(engine),
            files: Arc::new(FileStore::new(&config.work_dir)),
        })
    }
}

/// File backend state
#[derive(Clone)]
pub struct FileState {
    pub files: Arc<FileStore>,
}

impl FileState {
    pub fn build(config: &AppConfig) -> Self {
        Self {
            files: Arc::new(FileStore::new(&config.work_dir)),
        }
    }
}

/// Router state
#[derive(Clone)]
pub struct CoreState {
    pub router: Arc<ProxyRouter>,
}

impl CoreState {
    pub fn build(config: &AppConfig) -> Result<Self> {
        let core = &config.core;
        let mut backends = BackendDescriptor::parse_list(&core.search_servers, BackendRole::Search)?;
        backends.extend(BackendDescriptor::parse_list(&core.file_servers, BackendRole::File)?);

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        let router = ProxyRouter::new(
            backends,
            core.search_policy,
            core.file_policy,
            Arc::new(HttpProber::new(client)),
            core.sync_interval,
        );

        Ok(Self {
            router: Arc::new(router),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(role: Role, vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(role, |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_per_role() {
        let core = config(Role::Core, &[]).unwrap();
        assert_eq!(core.port, 6900);
        assert_eq!(core.host, "0.0.0.0");
        assert_eq!(core.core.search_policy.max_concurrency, 1);
        assert_eq!(core.core.sync_interval, Duration::from_secs(5));

        let file = config(Role::File, &[]).unwrap();
        assert_eq!(file.port, 6902);
        assert_eq!(file.search.ocr_field, "ocr");
        assert!(!file.search.ocr_enable);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(
            Role::Core,
            &[
                ("PORT", "7000"),
                ("SEARCH_SERVERS", "http://a:1,http://b:2"),
                ("SEARCH_REQUEST_TIMEOUT_MS", "250"),
                ("FILE_MAX_CONCURRENT_REQUESTS", "0"),
                ("OCR_ENABLE", "true"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.core.search_policy.timeout, Duration::from_millis(250));
        assert_eq!(cfg.core.file_policy.max_concurrency, 1);
        assert!(cfg.search.ocr_enable);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        assert!(matches!(config(Role::Core, &[("PORT", "abc")]), Err(Error::Config(_))));
        assert!(matches!(config(Role::Core, &[("PORT", "70000")]), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_search_state_requires_modalities() {
        let cfg = config(Role::Search, &[]).unwrap();
        assert!(matches!(SearchState::build(&cfg).await, Err(Error::Config(_))));

        let cfg = config(Role::Search, &[("MODALITIES", "clip=onnx:clip")]).unwrap();
        assert!(matches!(SearchState::build(&cfg).await, Err(Error::Config(_))));
    }

    #[test]
    fn test_core_state_parses_backends() {
        let cfg = config(
            Role::Core,
            &[("SEARCH_SERVERS", "http://s1:6901"), ("FILE_SERVERS", "http://f1:6902,http://f2:6902")],
        )
        .unwrap();
        let state = CoreState::build(&cfg).unwrap();
        assert_eq!(state.router.backends(BackendRole::Search).len(), 1);
        assert_eq!(state.router.backends(BackendRole::File).len(), 2);
    }
}
