use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::ClassificationResult;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub text_preview: String,
    pub prediction: String,
    pub score: f64,
    pub confidence: f64,
}

impl HistoryEntry {
    pub fn new(text: &str, result: &ClassificationResult) -> Self {
        Self {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            text_preview: preview(text),
            prediction: result.category.to_string(),
            score: result.confidence,
            confidence: result.model_confidence,
        }
    }
}

/// First line of `text`, cut at 100 characters.
pub fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > PREVIEW_CHARS {
        let cut: String = first_line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}

/// Append-only CSV log of classifications.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &HistoryEntry) -> anyhow::Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("history lock poisoned"))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        writer.serialize(entry)?;
        writer.flush()?;
        Ok(())
    }

    /// Logs instead of failing; history is best effort.
    pub fn record(&self, entry: &HistoryEntry) {
        if let Err(err) = self.append(entry) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to write history entry");
        }
    }

    /// Newest `limit` entries, oldest first. A missing file is an empty history.
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<HistoryEntry>> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let entries = reader
            .deserialize()
            .collect::<Result<Vec<HistoryEntry>, _>>()?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(preview_text: &str, prediction: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: "2026-10-16 09:30:00".to_string(),
            text_preview: preview(preview_text),
            prediction: prediction.to_string(),
            score: 0.91,
            confidence: 0.91,
        }
    }

    #[test]
    fn preview_takes_first_line() {
        assert_eq!(preview("Assunto: reunião\nCorpo do e-mail"), "Assunto: reunião");
        assert_eq!(preview(""), "");
    }

    #[test]
    fn preview_truncates_long_lines() {
        let long = "á".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 103);
        assert_eq!(preview(&"a".repeat(100)), "a".repeat(100));
    }

    #[test]
    fn append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("data").join("history.csv"));

        log.append(&entry("Primeiro, com vírgula", "Produtivo")).unwrap();
        log.append(&entry("Segundo", "Improdutivo")).unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.matches("timestamp,text_preview").count(), 1);
        assert!(raw.starts_with("timestamp,text_preview,prediction,score,confidence\n"));

        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text_preview, "Primeiro, com vírgula");
        assert_eq!(entries[1].prediction, "Improdutivo");
    }

    #[test]
    fn recent_returns_newest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("history.csv"));
        for i in 0..5 {
            log.append(&entry(&format!("email {i}"), "Produtivo")).unwrap();
        }

        let entries = log.recent(2).unwrap();
        let previews: Vec<_> = entries.iter().map(|e| e.text_preview.as_str()).collect();
        assert_eq!(previews, ["email 3", "email 4"]);
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("nope.csv"));
        assert!(log.recent(5).unwrap().is_empty());
    }
}
