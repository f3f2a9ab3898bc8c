//! Pluggable per-extension and per-kind analyzers.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::tokens::{ContentKind, TokenEstimator};

/// Analyzes the content of files with one extension
#[async_trait]
pub trait FileAnalyzer: Send + Sync {
    async fn analyze(&self, file_path: &str, content: &str) -> Result<Value>;
}

/// Analysis requested by kind name, independent of the file type
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, content: &str, file_path: &str) -> Result<Value>;
}

/// Lookup tables resolved once per `analyze` call.
///
/// Cloning is cheap; analyzers are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    file: HashMap<String, Arc<dyn FileAnalyzer>>,
    content: HashMap<String, Arc<dyn ContentAnalyzer>>,
}

/// ".PY", "py" and ".py" all register the same key
fn normalize_extension(extension: &str) -> String {
    let lower = extension.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

fn extension_of(file_path: &str) -> Option<String> {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the structure analyzers for Python and JavaScript/TypeScript
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let python: Arc<dyn FileAnalyzer> = Arc::new(PythonStructure);
        let script: Arc<dyn FileAnalyzer> = Arc::new(ScriptStructure);
        registry.file.insert(".py".into(), python);
        for ext in [".js", ".jsx", ".ts", ".tsx"] {
            registry.file.insert(ext.into(), script.clone());
        }
        registry
    }

    pub fn register_file_analyzer(&mut self, extension: &str, analyzer: Arc<dyn FileAnalyzer>) {
        self.file.insert(normalize_extension(extension), analyzer);
    }

    pub fn register_content_analyzer(&mut self, kind: &str, analyzer: Arc<dyn ContentAnalyzer>) {
        self.content.insert(kind.to_string(), analyzer);
    }

    pub fn file_extensions(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.file.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn content_kinds(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.content.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run the extension analyzer and every requested kind analyzer.
    ///
    /// Analyzer errors are recorded under `<name>_error` keys and do not fail
    /// the file. Falls back to [`basic_analysis`] when nothing applied.
    pub async fn run(
        &self,
        file_path: &str,
        content: &str,
        kinds: &[String],
        estimator: &TokenEstimator,
    ) -> Map<String, Value> {
        let mut results = Map::new();

        if let Some(analyzer) = extension_of(file_path).and_then(|ext| self.file.get(&ext)) {
            match analyzer.analyze(file_path, content).await {
                Ok(value) => {
                    results.insert("file_analysis".into(), value);
                }
                Err(e) => {
                    debug!("File analyzer failed for {}: {:#}", file_path, e);
                    results.insert("file_analysis_error".into(), Value::from(e.to_string()));
                }
            }
        }

        for kind in kinds {
            let Some(analyzer) = self.content.get(kind) else {
                continue;
            };
            match analyzer.analyze(content, file_path).await {
                Ok(value) => {
                    results.insert(kind.clone(), value);
                }
                Err(e) => {
                    debug!("Content analyzer {} failed for {}: {:#}", kind, file_path, e);
                    results.insert(format!("{}_error", kind), Value::from(e.to_string()));
                }
            }
        }

        if results.is_empty() {
            results = basic_analysis(file_path, content, estimator);
        }
        results
    }
}

/// Line and character counts, used when no analyzer applies
pub fn basic_analysis(file_path: &str, content: &str, estimator: &TokenEstimator) -> Map<String, Value> {
    let kind = ContentKind::from_path(Path::new(file_path));
    let line_count = content.split('\n').count();
    let empty_lines = content.split('\n').filter(|l| l.trim().is_empty()).count();
    let file_type = extension_of(file_path).unwrap_or_else(|| "unknown".to_string());

    let mut data = Map::new();
    data.insert("line_count".into(), json!(line_count));
    data.insert("char_count".into(), json!(content.chars().count()));
    data.insert("empty_lines".into(), json!(empty_lines));
    data.insert("file_type".into(), json!(file_type));
    data.insert("estimated_tokens".into(), json!(estimator.estimate(content, kind)));
    data
}

static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap());
static PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(\w+)").unwrap());
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:import|from)\s+([^\s,]+)").unwrap());

static JS_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"function\s*\*?\s*(\w+)\s*\(").unwrap());
static JS_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>").unwrap()
});
static JS_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bclass\s+(\w+)").unwrap());
static JS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"import[^;]*?from\s+['"]([^'"]+)['"]"#).unwrap());
static JS_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

fn captures(re: &Regex, content: &str) -> Vec<String> {
    re.captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn looks_like_test(file_path: &str) -> bool {
    let lower = file_path.to_lowercase();
    lower.contains("test") || lower.contains("spec")
}

/// Classes, functions and imports of a Python module
pub struct PythonStructure;

#[async_trait]
impl FileAnalyzer for PythonStructure {
    async fn analyze(&self, file_path: &str, content: &str) -> Result<Value> {
        Ok(json!({
            "classes": captures(&PY_CLASS, content),
            "functions": captures(&PY_DEF, content),
            "imports": captures(&PY_IMPORT, content),
            "has_main": content.contains("__main__"),
            "is_test": looks_like_test(file_path),
        }))
    }
}

/// Functions, classes and module references of a JavaScript/TypeScript file
pub struct ScriptStructure;

#[async_trait]
impl FileAnalyzer for ScriptStructure {
    async fn analyze(&self, file_path: &str, content: &str) -> Result<Value> {
        let is_jsx = file_path.ends_with(".jsx") || file_path.ends_with(".tsx");
        Ok(json!({
            "functions": captures(&JS_FUNCTION, content),
            "arrow_functions": captures(&JS_ARROW, content),
            "classes": captures(&JS_CLASS, content),
            "imports": captures(&JS_IMPORT, content),
            "requires": captures(&JS_REQUIRE, content),
            "has_exports": content.contains("export") || content.contains("module.exports"),
            "is_react": is_jsx || content.contains("React"),
        }))
    }
}
