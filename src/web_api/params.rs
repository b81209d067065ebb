//! Query-string parsing shared by the search handlers
//!
//! Handlers extract `Query<Vec<(String, String)>>` so repeated keys survive.

use crate::error::{Error, Result};
use crate::search_engine::SearchParams;
use std::str::FromStr;

pub type QueryPairs = Vec<(String, String)>;

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// First non-blank value of `key`
pub fn required(pairs: &[(String, String)], key: &str) -> Result<String> {
    first(pairs, key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("{} is required", key)))
}

fn number<T: FromStr>(pairs: &[(String, String)], key: &str, default: T) -> Result<T> {
    match first(pairs, key).map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Validation(format!("invalid {}: {}", key, raw))),
    }
}

/// `target_features=a&target_features=b`, `target_features[]=a` or `target_features=a,b`
pub fn target_features(pairs: &[(String, String)]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (key, value) in pairs {
        if key != "target_features" && key != "target_features[]" {
            continue;
        }
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Build [`SearchParams`] over the service defaults
pub fn search_params(pairs: &[(String, String)]) -> Result<SearchParams> {
    let defaults = SearchParams::default();
    let params = SearchParams {
        offset: number(pairs, "offset", defaults.offset)?,
        limit: number(pairs, "limit", defaults.limit)?,
        target_features: target_features(pairs),
        nprobe: number(pairs, "nprobe", defaults.nprobe)?,
        temporal_k: number(pairs, "temporal_k", defaults.temporal_k)?,
        ocr_weight: number(pairs, "ocr_weight", defaults.ocr_weight)?,
        max_interval: number(pairs, "max_interval", defaults.max_interval)?,
        selected: first(pairs, "selected")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    };

    if params.limit == 0 {
        return Err(Error::Validation("limit must be at least 1".to_string()));
    }
    if !params.ocr_weight.is_finite() {
        return Err(Error::Validation("invalid ocr_weight".to_string()));
    }
    Ok(params)
}
