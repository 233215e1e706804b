//! The parse + analyze pipeline.
//!
//! Both stages are pluggable: the coordinator only depends on the
//! [`Parser`] and [`Analyzer`] traits. [`TextParser`] and [`TextAnalyzer`]
//! are the defaults used by the engine when nothing else is supplied.

mod language;
mod text;

pub use language::{detect_language, detect_language_from_content, identify, Language};
pub use text::{TextAnalyzer, TextParser};

use crate::model::{AnalysisResult, ParseResult};
use crate::IndexerError;
use async_trait::async_trait;
use std::path::Path;

/// Turns file content into a [`ParseResult`].
///
/// Implementations report failures as [`IndexerError::Parse`].
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse_file(&self, path: &Path, content: &str) -> Result<ParseResult, IndexerError>;
}

/// Turns a [`ParseResult`] into an [`AnalysisResult`].
///
/// Implementations report failures as [`IndexerError::Analysis`].
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_file(
        &self,
        path: &Path,
        parsed: &ParseResult,
    ) -> Result<AnalysisResult, IndexerError>;
}
