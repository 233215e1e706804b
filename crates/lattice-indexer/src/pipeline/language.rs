//! Language identification for indexed files.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Languages the default text pipeline recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    TypeScript,
    JavaScript,
    Python,
    Go,
    Json,
    Yaml,
    Toml,
    Markdown,
    Html,
    Css,
    Shell,
    PlainText,
}

impl Language {
    /// Language identifier stored in parse and analysis results.
    pub fn id(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Markdown => "markdown",
            Language::Html => "html",
            Language::Css => "css",
            Language::Shell => "shellscript",
            Language::PlainText => "plaintext",
        }
    }

    /// Prefix that starts a line comment, if the language has one.
    pub fn line_comment(&self) -> Option<&'static str> {
        match self {
            Language::Rust
            | Language::TypeScript
            | Language::JavaScript
            | Language::Go
            | Language::Css => Some("//"),
            Language::Python | Language::Yaml | Language::Toml | Language::Shell => Some("#"),
            Language::Json | Language::Markdown | Language::Html | Language::PlainText => None,
        }
    }
}

/// Extension → language, compared case-insensitively.
const EXTENSIONS: &[(&str, Language)] = &[
    ("rs", Language::Rust),
    ("ts", Language::TypeScript),
    ("tsx", Language::TypeScript),
    ("mts", Language::TypeScript),
    ("js", Language::JavaScript),
    ("jsx", Language::JavaScript),
    ("mjs", Language::JavaScript),
    ("cjs", Language::JavaScript),
    ("py", Language::Python),
    ("pyi", Language::Python),
    ("go", Language::Go),
    ("json", Language::Json),
    ("yaml", Language::Yaml),
    ("yml", Language::Yaml),
    ("toml", Language::Toml),
    ("md", Language::Markdown),
    ("html", Language::Html),
    ("htm", Language::Html),
    ("css", Language::Css),
    ("scss", Language::Css),
    ("sh", Language::Shell),
    ("bash", Language::Shell),
    ("zsh", Language::Shell),
    ("txt", Language::PlainText),
];

/// Interpreter name prefix → language, for shebang lines.
const INTERPRETERS: &[(&str, Language)] = &[
    ("python", Language::Python),
    ("node", Language::JavaScript),
    ("deno", Language::TypeScript),
    ("bash", Language::Shell),
    ("zsh", Language::Shell),
    ("sh", Language::Shell),
];

/// Language of a file by extension.
pub fn detect_language(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?;
    EXTENSIONS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, language)| *language)
}

/// Language named by a `#!` line, looking through `/usr/bin/env`.
pub fn detect_language_from_content(content: &str) -> Option<Language> {
    let shebang = content.lines().next()?.strip_prefix("#!")?;

    let mut words = shebang.split_whitespace();
    let mut program = words.next()?.rsplit('/').next()?;
    if program == "env" {
        program = words.find(|w| !w.starts_with('-'))?;
    }

    INTERPRETERS
        .iter()
        .find(|(name, _)| program.starts_with(name))
        .map(|(_, language)| *language)
}

/// Extension first, then shebang, then plain text.
pub fn identify(path: &Path, content: &str) -> Language {
    detect_language(path)
        .or_else(|| detect_language_from_content(content))
        .unwrap_or(Language::PlainText)
}
