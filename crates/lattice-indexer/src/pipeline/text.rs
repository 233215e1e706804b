//! Default language-agnostic pipeline: line statistics and content hashing.

use super::{identify, Analyzer, Parser};
use crate::model::{AnalysisResult, ParseResult};
use crate::IndexerError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-file statistics carried in [`ParseResult::data`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineStats {
    blank_lines: usize,
    comment_lines: usize,
    max_line_length: usize,
}

/// Parser that identifies the language and collects line statistics.
#[derive(Debug, Clone, Default)]
pub struct TextParser;

impl TextParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Parser for TextParser {
    async fn parse_file(&self, path: &Path, content: &str) -> Result<ParseResult, IndexerError> {
        let language = identify(path, content);
        let comment = language.line_comment();

        let mut stats = LineStats::default();
        let mut line_count = 0;
        for line in content.lines() {
            line_count += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                stats.blank_lines += 1;
            } else if comment.is_some_and(|c| trimmed.starts_with(c)) {
                stats.comment_lines += 1;
            }
            stats.max_line_length = stats.max_line_length.max(line.chars().count());
        }

        let data = serde_json::to_value(&stats).map_err(|e| IndexerError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(ParseResult {
            language_id: language.id().to_string(),
            content_hash: compute_hash(content),
            line_count,
            byte_len: content.len(),
            data,
        })
    }
}

/// Analyzer that turns [`TextParser`] output into numeric metrics.
#[derive(Debug, Clone, Default)]
pub struct TextAnalyzer;

impl TextAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for TextAnalyzer {
    async fn analyze_file(
        &self,
        path: &Path,
        parsed: &ParseResult,
    ) -> Result<AnalysisResult, IndexerError> {
        let stats: LineStats = if parsed.data.is_null() {
            LineStats::default()
        } else {
            serde_json::from_value(parsed.data.clone()).map_err(|e| IndexerError::Analysis {
                path: path.to_path_buf(),
                message: format!("unexpected parse payload: {}", e),
            })?
        };

        let code_lines = parsed
            .line_count
            .saturating_sub(stats.blank_lines + stats.comment_lines);

        let metrics = BTreeMap::from([
            ("lineCount".to_string(), parsed.line_count as f64),
            ("byteCount".to_string(), parsed.byte_len as f64),
            ("blankLines".to_string(), stats.blank_lines as f64),
            ("commentLines".to_string(), stats.comment_lines as f64),
            ("codeLines".to_string(), code_lines as f64),
            ("maxLineLength".to_string(), stats.max_line_length as f64),
        ]);

        Ok(AnalysisResult {
            timestamp: Utc::now(),
            language_id: parsed.language_id.clone(),
            metrics,
        })
    }
}

/// Compute SHA256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
