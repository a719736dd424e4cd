use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::analyzis::AnalysisConfig;
use crate::error::Error;
use crate::error::Result;

/// Everything an index needs to know up front. There is no process-wide
/// default; every index is opened with its own config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub analysis: AnalysisConfig,
    pub merge: MergePolicy,
    /// Buffered documents that trigger a commit when auto commit is on.
    pub max_buffered_docs: usize,
    /// Whether closing the index merges it down to a single segment.
    pub optimize_on_close: bool,
}

impl Default for IndexConfig {
    fn default() -> IndexConfig {
        IndexConfig {
            analysis: AnalysisConfig::default(),
            merge: MergePolicy::default(),
            max_buffered_docs: 1000,
            optimize_on_close: true,
        }
    }
}

impl IndexConfig {
    pub fn from_json(json: &str) -> Result<IndexConfig> {
        let config: IndexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<IndexConfig> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::storage(format!("reading config {:?}", path), e))?;
        IndexConfig::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.merge.validate()?;
        if self.max_buffered_docs == 0 {
            return Err(Error::Configuration(
                "max_buffered_docs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Size tiered merging. Segments are grouped into tiers headed by the
/// largest remaining segment; a tier holds every following segment larger
/// than `size_ratio` times its head. Tiers with more than
/// `max_segments_per_tier` members get merged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    pub size_ratio: f64,
    pub max_segments_per_tier: usize,
}

impl Default for MergePolicy {
    fn default() -> MergePolicy {
        MergePolicy {
            size_ratio: 0.6,
            max_segments_per_tier: 10,
        }
    }
}

impl MergePolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.size_ratio > 0.0 && self.size_ratio <= 1.0) {
            return Err(Error::Configuration(format!(
                "merge size_ratio must be in (0, 1], got {}",
                self.size_ratio
            )));
        }
        if self.max_segments_per_tier < 1 {
            return Err(Error::Configuration(
                "max_segments_per_tier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzis::StemmerKind;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            IndexConfig::from_json(r#"{"analysis": {"stemmer": "none"}, "max_buffered_docs": 10}"#)
                .unwrap();
        assert_eq!(StemmerKind::None, config.analysis.stemmer);
        assert_eq!(255, config.analysis.max_token_length);
        assert_eq!(10, config.max_buffered_docs);
        assert_eq!(MergePolicy::default(), config.merge);
    }

    #[test]
    fn invalid_merge_ratio_is_rejected() {
        match IndexConfig::from_json(r#"{"merge": {"size_ratio": 1.5}}"#) {
            Err(Error::Configuration(_)) => (),
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }
}
