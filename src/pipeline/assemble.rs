//! Output assembly: trade groups → the rules JSON document → a sink.
//!
//! The document is a single object keyed by trade, in first-seen order:
//!
//! ```json
//! {
//!   "plumber": [
//!     {
//!       "rule_id": "P-001",
//!       "description": "Pressure test supply piping",
//!       "requirements": ["150 psi", "2 hours"],
//!       "source_pages": [4, 5, 6],
//!       "source_chunk": "spec_chunk_1"
//!     }
//!   ]
//! }
//! ```
//!
//! Rendering is pure: the same groups always produce the same bytes.

use crate::error::RulesError;
use crate::output::{Rule, TradeGroups};
use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Default prefix for output keys.
pub const DEFAULT_OUTPUT_PREFIX: &str = "outputs";

/// One rule as written to the output document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRule {
    /// `""` when the model gave no id.
    pub rule_id: String,
    pub description: String,
    pub requirements: Vec<String>,
    /// Sorted, without duplicates.
    pub source_pages: Vec<usize>,
    pub source_chunk: String,
}

impl From<&Rule> for OutputRule {
    fn from(rule: &Rule) -> Self {
        Self {
            rule_id: rule.rule_id.clone().unwrap_or_default(),
            description: rule.description.clone(),
            requirements: rule.requirements.clone(),
            source_pages: rule.source_pages.iter().copied().collect(),
            source_chunk: rule.source_window.clone(),
        }
    }
}

/// The assembled output document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesDocument {
    trades: Vec<(String, Vec<OutputRule>)>,
}

impl RulesDocument {
    pub fn trades(&self) -> impl Iterator<Item = (&str, &[OutputRule])> {
        self.trades.iter().map(|(t, r)| (t.as_str(), r.as_slice()))
    }

    /// Pretty-printed JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, RulesError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| RulesError::Internal(format!("serialising rules document: {e}")))
    }
}

impl Serialize for RulesDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.trades.len()))?;
        for (trade, rules) in &self.trades {
            map.serialize_entry(trade, rules)?;
        }
        map.end()
    }
}

/// Build the output document from aggregated groups.
pub fn assemble(groups: &TradeGroups) -> RulesDocument {
    RulesDocument {
        trades: groups
            .iter()
            .map(|g| (g.trade.clone(), g.rules.iter().map(OutputRule::from).collect()))
            .collect(),
    }
}

/// Output key for a document: `{prefix}/{document_id}_rules.json`.
///
/// `document_id` is used as given; callers strip file extensions where a
/// path comes in. An empty prefix yields a bare file name.
pub fn output_key(prefix: &str, document_id: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{document_id}_rules.json")
    } else {
        format!("{prefix}/{document_id}_rules.json")
    }
}

/// Destination for assembled documents.
#[async_trait]
pub trait RuleSink: Send + Sync {
    async fn write(&self, key: &str, body: &[u8]) -> Result<(), RulesError>;
}

/// Writes each key as a file below a root directory.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a key is written to. Keys must be relative and stay below the
    /// root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, RulesError> {
        let rel = Path::new(key);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(RulesError::SinkWrite {
                key: key.to_string(),
                detail: "key must be a relative path below the output directory".into(),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl RuleSink for FileSink {
    async fn write(&self, key: &str, body: &[u8]) -> Result<(), RulesError> {
        let path = self.path_for(key)?;
        let fail = |e: std::io::Error| RulesError::SinkWrite {
            key: key.to_string(),
            detail: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, body).await.map_err(fail)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(fail)?;

        info!("Wrote {} ({} bytes)", path.display(), body.len());
        Ok(())
    }
}

/// Keeps written documents in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RuleSink for MemorySink {
    async fn write(&self, key: &str, body: &[u8]) -> Result<(), RulesError> {
        let mut entries = self.entries.lock().map_err(|_| RulesError::SinkWrite {
            key: key.to_string(),
            detail: "memory sink lock poisoned".into(),
        })?;
        debug!("MemorySink: {} ({} bytes)", key, body.len());
        entries.insert(key.to_string(), body.to_vec());
        Ok(())
    }
}
