//! The persisted snapshot and its wire encodings.

use crate::model::{AnalysisResult, WorkspaceAnalysisResult};
use crate::IndexerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Everything that survives a restart, serialized as one value.
///
/// Keys are absolute path strings. There is no schema version; a layout
/// change requires `clear()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    #[serde(default)]
    pub file_analyses: BTreeMap<String, AnalysisResult>,
    #[serde(default)]
    pub workspace_analyses: BTreeMap<String, WorkspaceAnalysisResult>,
}

impl PersistedSnapshot {
    pub fn is_empty(&self) -> bool {
        self.file_analyses.is_empty() && self.workspace_analyses.is_empty()
    }

    /// First metric that is NaN or infinite, as `(key, metric name)`.
    ///
    /// Such values cannot be decoded again once encoded as JSON.
    pub fn non_finite_metric(&self) -> Option<(&str, &str)> {
        let files = self
            .file_analyses
            .iter()
            .map(|(key, analysis)| (key, &analysis.metrics));
        let workspaces = self
            .workspace_analyses
            .iter()
            .map(|(key, result)| (key, &result.metrics));

        files.chain(workspaces).find_map(|(key, metrics)| {
            metrics
                .iter()
                .find(|(_, value)| !value.is_finite())
                .map(|(name, _)| (key.as_str(), name.as_str()))
        })
    }
}

/// How the snapshot is encoded on the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Json,
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl SnapshotFormat {
    /// Encode a snapshot. Non-finite metrics are refused in every format.
    pub fn encode(&self, snapshot: &PersistedSnapshot) -> Result<Vec<u8>, IndexerError> {
        if let Some((key, metric)) = snapshot.non_finite_metric() {
            return Err(IndexerError::Serialization(format!(
                "metric {} of {} is not finite",
                metric, key
            )));
        }
        match self {
            SnapshotFormat::Json => Ok(serde_json::to_vec(snapshot)?),
            SnapshotFormat::MessagePack => Ok(rmp_serde::to_vec_named(snapshot)?),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<PersistedSnapshot, IndexerError> {
        match self {
            SnapshotFormat::Json => Ok(serde_json::from_slice(data)?),
            SnapshotFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
        }
    }
}

impl FromStr for SnapshotFormat {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SnapshotFormat::Json),
            "msgpack" | "messagepack" => Ok(SnapshotFormat::MessagePack),
            other => Err(IndexerError::Serialization(format!(
                "unknown snapshot format: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> PersistedSnapshot {
        let mut snapshot = PersistedSnapshot::default();
        snapshot.file_analyses.insert(
            "/proj/a.txt".into(),
            AnalysisResult {
                timestamp: Utc::now(),
                language_id: "plaintext".into(),
                metrics: BTreeMap::from([("lineCount".to_string(), 10.0)]),
            },
        );
        snapshot
    }

    #[test]
    fn test_json_layout_has_two_top_level_maps() {
        let bytes = SnapshotFormat::Json.encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert!(value["fileAnalyses"]["/proj/a.txt"].is_object());
        assert!(value["workspaceAnalyses"].is_object());
    }

    #[test]
    fn test_msgpack_decodes_what_it_encodes() {
        let snapshot = sample();
        let bytes = SnapshotFormat::MessagePack.encode(&snapshot).unwrap();
        assert_eq!(SnapshotFormat::MessagePack.decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_encode_refuses_non_finite_metrics() {
        for format in [SnapshotFormat::Json, SnapshotFormat::MessagePack] {
            let mut snapshot = sample();
            if let Some(analysis) = snapshot.file_analyses.get_mut("/proj/a.txt") {
                analysis.metrics.insert("ratio".into(), f64::NAN);
            }
            assert_eq!(snapshot.non_finite_metric(), Some(("/proj/a.txt", "ratio")));
            assert!(matches!(
                format.encode(&snapshot),
                Err(IndexerError::Serialization(_))
            ));
        }
        assert_eq!(sample().non_finite_metric(), None);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = SnapshotFormat::Json.decode(b"{not json");
        assert!(matches!(result, Err(IndexerError::Serialization(_))));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<SnapshotFormat>().unwrap(), SnapshotFormat::Json);
        assert_eq!(
            "msgpack".parse::<SnapshotFormat>().unwrap(),
            SnapshotFormat::MessagePack
        );
        assert!("xml".parse::<SnapshotFormat>().is_err());
    }
}
