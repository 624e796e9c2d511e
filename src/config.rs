use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};

use crate::aggregate::GroupKey;
use crate::classify::{Classifier, DEFAULT_KEYWORDS};

pub const DEFAULT_DATA: &str = "d2r_rwanda_2020.csv";

/// Settings read from a YAML file; every field falls back to its default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// CSV, ZIP, Parquet file or glob pattern.
    pub data: String,
    pub keywords: Vec<String>,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    pub top_sectors: usize,
    pub top_results: usize,
    /// `[result_name]`, or `[sector_name, result_name]` to keep results apart per sector.
    pub human_impact_grouping: Vec<GroupKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DEFAULT_DATA.to_string(),
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            top_sectors: 10,
            top_results: 20,
            human_impact_grouping: vec![GroupKey::ResultName],
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document is a valid "all defaults" config
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(&self.keywords)
    }
}
