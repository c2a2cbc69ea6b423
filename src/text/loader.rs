//! Loading grammar treatises from a data directory
//!
//! Expected layout (non-recursive):
//!
//! ```text
//! data/grammar/
//!     ashtadhyayi.txt       # sūtras, paragraph per rule
//!     kashika.txt           # commentary
//!     kale_grammar.txt      # English textbook
//!     custom_rules.json     # structured rule records
//! ```

use crate::config::ClassificationRules;
use crate::error::{Result, VedyutError};
use crate::text::chunking::{normalize_text, GrammarChunk, Language, ParagraphChunker};
use crate::text::inference::ReferenceExtractor;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One entry of a structured rule file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleRecord {
    #[serde(default, alias = "reference")]
    pub sutra: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub sanskrit: Option<String>,
    #[serde(default)]
    pub transliteration: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl RuleRecord {
    fn populated(field: &Option<String>) -> Option<&str> {
        field.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Language renderings present in this record, Sanskrit first
    pub fn renderings(&self) -> Vec<(Language, &str)> {
        let mut out = Vec::with_capacity(2);
        if let Some(text) = Self::populated(&self.sanskrit) {
            out.push((Language::Sanskrit, text));
        }
        if let Some(text) = Self::populated(&self.english) {
            out.push((Language::English, text));
        }
        out
    }

    fn chunk_text(&self, rendering: &str) -> String {
        format!(
            "{}: {}\n{}",
            self.sutra.as_deref().unwrap_or_default(),
            rendering,
            self.explanation.as_deref().unwrap_or_default()
        )
    }
}

/// A file that could not be loaded
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of loading a directory
#[derive(Debug, Default)]
pub struct LoadReport {
    pub chunks: Vec<GrammarChunk>,
    pub failures: Vec<LoadFailure>,
    /// Files that contributed to `chunks`
    pub files_loaded: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reads `.txt` treatises and `.json` rule files into grammar chunks
pub struct GrammarLoader {
    rules: ClassificationRules,
    chunker: ParagraphChunker,
    references: ReferenceExtractor,
    /// File name skipped while scanning `.json` files (the index artifact)
    skip_file: Option<String>,
}

impl GrammarLoader {
    pub fn new(rules: ClassificationRules) -> Result<Self> {
        Ok(Self {
            rules,
            chunker: ParagraphChunker::new()?,
            references: ReferenceExtractor::new()?,
            skip_file: None,
        })
    }

    /// Ignore a file with this name, typically the index artifact
    pub fn skipping(mut self, file_name: impl Into<String>) -> Self {
        self.skip_file = Some(file_name.into());
        self
    }

    /// Load every recognised file in `dir`.
    ///
    /// A missing directory is not an error: it yields an empty report. Files that
    /// fail to read or parse are listed in [`LoadReport::failures`] and skipped.
    pub fn load<P: AsRef<Path>>(&self, dir: P) -> Result<LoadReport> {
        let dir = dir.as_ref();
        let mut report = LoadReport::default();

        if !dir.is_dir() {
            log::warn!("Grammar data directory not found: {}", dir.display());
            log::warn!("Create it and add grammar texts to enable retrieval.");
            return Ok(report);
        }

        let (text_files, record_files) = self.scan(dir)?;

        for path in text_files {
            match self.load_text_file(&path) {
                Ok(chunks) => {
                    log::debug!("Loaded {} paragraphs from {}", chunks.len(), path.display());
                    report.chunks.extend(chunks);
                    report.files_loaded += 1;
                }
                Err(e) => record_failure(&mut report, path, e),
            }
        }

        for path in record_files {
            match self.load_record_file(&path) {
                Ok(chunks) => {
                    log::debug!("Loaded {} rule chunks from {}", chunks.len(), path.display());
                    report.chunks.extend(chunks);
                    report.files_loaded += 1;
                }
                Err(e) => record_failure(&mut report, path, e),
            }
        }

        log::info!(
            "Loaded {} grammar chunks from {} ({} file(s) failed)",
            report.chunks.len(),
            dir.display(),
            report.failures.len()
        );
        Ok(report)
    }

    fn scan(&self, dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut text_files = Vec::new();
        let mut record_files = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let file_name = path.file_name().and_then(|n| n.to_str());
            if file_name.is_some() && file_name == self.skip_file.as_deref() {
                continue;
            }
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("txt") => text_files.push(path),
                Some("json") => record_files.push(path),
                _ => {}
            }
        }

        text_files.sort();
        record_files.sort();
        Ok((text_files, record_files))
    }

    /// Chunk a free-form treatise by paragraph
    pub fn load_text_file(&self, path: &Path) -> Result<Vec<GrammarChunk>> {
        let source = source_name(path)?;
        let language = self.rules.language_for_source(&source);
        let content = std::fs::read_to_string(path)?;

        let chunks = self
            .chunker
            .split(&content)
            .into_iter()
            .enumerate()
            .map(|(i, paragraph)| {
                let reference = self.references.extract(&paragraph);
                let topic = self.rules.infer_topic(&paragraph);
                GrammarChunk::new(format!("{}_{}", source, i), paragraph, source.as_str(), language)
                    .with_reference(reference)
                    .with_topic(topic)
            })
            .collect();

        Ok(chunks)
    }

    /// Chunk a structured rule file: one chunk per populated language field
    pub fn load_record_file(&self, path: &Path) -> Result<Vec<GrammarChunk>> {
        let source = source_name(path)?;
        let content = std::fs::read_to_string(path)?;
        let records: Vec<RuleRecord> =
            serde_json::from_str(&content).map_err(|e| VedyutError::MalformedRecords {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(records_to_chunks(&source, &records))
    }
}

/// Convert parsed rule records into chunks; metadata is copied, never inferred
pub fn records_to_chunks(source: &str, records: &[RuleRecord]) -> Vec<GrammarChunk> {
    let mut chunks = Vec::new();
    for (i, record) in records.iter().enumerate() {
        for (language, rendering) in record.renderings() {
            let chunk = GrammarChunk::new(
                format!("{}_{}_{}", source, i, language.id_suffix()),
                normalize_text(&record.chunk_text(rendering)),
                source,
                language,
            )
            .with_reference(record.sutra.clone())
            .with_topic(record.topic.clone());
            chunks.push(chunk);
        }
    }
    chunks
}

fn source_name(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            VedyutError::TextProcessing(format!("Invalid source file name: {}", path.display()))
        })
}

fn record_failure(report: &mut LoadReport, path: PathBuf, error: VedyutError) {
    log::error!("Failed to load {}: {}", path.display(), error);
    report.failures.push(LoadFailure {
        path,
        message: error.to_string(),
    });
}
