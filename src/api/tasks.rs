//! Sanskrit-specific generation tasks built on retrieval
//!
//! Each task assembles a prompt from retrieved grammar chunks, calls the
//! completion provider, and parses the reply as far as it can. Replies that do
//! not have the expected shape degrade to a documented fallback; transport
//! failures are returned to the caller.
//!
//! Generated code and validation verdicts are heuristics and need human review.

use crate::api::rag::GrammarRag;
use crate::error::{Result, VedyutError};
use crate::llm::{ChatMessage, CompletionOptions, CompletionProvider, CompletionStream};
use crate::ml::{QueryFilter, ScoredChunk};
use crate::text::GrammarChunk;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How [`explain_rule`] finds the text to explain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleLookup {
    /// Exact rule reference such as "1.1.1"
    Reference(String),
    /// Free-text retrieval query
    Query(String),
}

/// One generated test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    #[serde(default)]
    pub description: String,
}

impl TestCase {
    /// Accepts objects with `input` and `expected`; other values are rejected
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            input: value_text(map.get("input")?)?,
            expected: value_text(map.get("expected")?)?,
            description: map.get("description").and_then(value_text).unwrap_or_default(),
        })
    }
}

/// Heuristic review of an implementation against retrieved rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// In [0, 1]
    pub confidence: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            issues: vec![format!("Validation failed: {}", reason)],
            suggestions: Vec::new(),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::failed("reply was not a JSON object");
        };

        Self {
            is_valid: map.get("is_valid").and_then(Value::as_bool).unwrap_or(false),
            confidence: map
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            issues: string_list(map.get("issues")),
            suggestions: string_list(map.get("suggestions")),
        }
    }
}

/// Generate code for `task`, grounded in `context` or the top 3 retrieved chunks
pub async fn generate_code(
    rag: &GrammarRag,
    task: &str,
    context: Option<&[GrammarChunk]>,
    language: &str,
) -> Result<String> {
    let retrieved;
    let context = match context {
        Some(chunks) => chunks,
        None => {
            retrieved = chunks_of(rag.query(task, 3, &QueryFilter::new()).await?);
            retrieved.as_slice()
        }
    };

    let prompt = format!(
        "You are a Sanskrit NLP expert. Using the Pāṇinian grammar references below, write {language} code for the task.\n\n\
         Grammar References:\n{references}\n\n\
         Task: {task}\n\n\
         Write clean, well-commented {language} code with:\n\
         1. A typed function signature\n\
         2. The implementation logic\n\
         3. Comments that cite the grammar rule being applied\n\
         4. Example usage in comments\n\n\
         {upper} CODE:\n",
        references = cited_context(context),
        upper = language.to_uppercase(),
    );

    rag.llm()
        .complete(&[ChatMessage::user(prompt)], &CompletionOptions::with_temperature(0.3))
        .await
}

/// Explain a rule in plain English
pub async fn explain_rule(rag: &GrammarRag, lookup: &RuleLookup) -> Result<String> {
    let context = match lookup {
        RuleLookup::Reference(reference) => {
            let mut matches = rag.chunks_by_reference(reference);
            if matches.is_empty() {
                return Ok(format!("Sūtra {} not found in loaded texts.", reference));
            }
            matches.truncate(3);
            matches
        }
        RuleLookup::Query(query) => chunks_of(rag.query(query, 3, &QueryFilter::new()).await?),
    };

    let grammar_text = context
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Explain this Pāṇinian grammar rule in simple, clear English.\n\n\
         Grammar Text:\n{grammar_text}\n\n\
         Cover:\n\
         1. What the rule says\n\
         2. When it applies\n\
         3. A simple example\n\
         4. Common mistakes\n\n\
         EXPLANATION:\n"
    );

    rag.llm()
        .complete(&[ChatMessage::user(prompt)], &CompletionOptions::with_temperature(0.5))
        .await
}

/// Pick the best segmentation of `text`; returns a 0-based index into `candidates`
pub async fn disambiguate_segmentation(
    llm: &dyn CompletionProvider,
    rag: Option<&GrammarRag>,
    text: &str,
    candidates: &[Vec<String>],
) -> Result<usize> {
    if candidates.is_empty() {
        return Err(VedyutError::InvalidInput(
            "At least one segmentation candidate is required".to_string(),
        ));
    }

    let rules = optional_context(
        rag,
        &format!("sandhi rules for: {}", text),
        2,
        &QueryFilter::new().topic("sandhi"),
    )
    .await?;
    let context = if rules.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = rules.iter().map(|r| format!("- {}", r.chunk.preview(200))).collect();
        format!("\n\nRelevant sandhi rules:\n{}", lines.join("\n"))
    };

    let listing: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, words)| format!("{}. {}", i + 1, words.join(" + ")))
        .collect();

    let prompt = format!(
        "You are a Sanskrit grammar expert. Given a Sanskrit text and several possible segmentations, \
         choose the one that is grammatically correct and makes the most sense.\n\n\
         Text: {text}\n\n\
         Possible segmentations:\n{listing}\n{context}\n\n\
         Reply with ONLY the number (1-{count}) of the best segmentation.\n\
         Number: ",
        listing = listing.join("\n"),
        count = candidates.len(),
    );

    let reply = llm
        .complete(
            &[ChatMessage::user(prompt)],
            &CompletionOptions::with_temperature(0.3).max_tokens(10),
        )
        .await?;

    Ok(parse_candidate_choice(&reply, candidates.len()))
}

/// Read a 1-based choice from the first token of `reply`, clamped into range.
///
/// Anything unparsable selects the first candidate.
pub fn parse_candidate_choice(reply: &str, count: usize) -> usize {
    let last = count.saturating_sub(1) as i64;
    reply
        .split_whitespace()
        .next()
        .map(|token| token.trim_end_matches(['.', ',', ')', ':']))
        .and_then(|token| token.parse::<i64>().ok())
        .map(|n| (n - 1).clamp(0, last) as usize)
        .unwrap_or(0)
}

/// Translate Sanskrit text, optionally with a word-by-word breakdown
pub async fn translate_sanskrit(
    llm: &dyn CompletionProvider,
    text: &str,
    target_lang: &str,
    with_explanation: bool,
) -> Result<String> {
    let prompt = translation_prompt(text, target_lang, with_explanation);
    llm.complete(&[ChatMessage::user(prompt)], &CompletionOptions::with_temperature(0.5))
        .await
}

/// [`translate_sanskrit`], streamed as the model writes it
pub async fn translate_sanskrit_stream(
    llm: &dyn CompletionProvider,
    text: &str,
    target_lang: &str,
    with_explanation: bool,
) -> Result<CompletionStream> {
    let prompt = translation_prompt(text, target_lang, with_explanation);
    llm.complete_stream(&[ChatMessage::user(prompt)], &CompletionOptions::with_temperature(0.5))
        .await
}

fn translation_prompt(text: &str, target_lang: &str, with_explanation: bool) -> String {
    if with_explanation {
        format!(
            "Translate this Sanskrit text to {target_lang} with a word-by-word explanation:\n\n\
             Sanskrit: {text}\n\n\
             Give:\n\
             1. A word-by-word breakdown with grammatical analysis\n\
             2. A fluent {target_lang} translation\n\n\
             FORMAT:\n\
             Word-by-word:\n\
             - word1 (grammatical info): meaning\n\
             - word2 (grammatical info): meaning\n\n\
             Translation: [full translation]\n"
        )
    } else {
        format!("Translate this Sanskrit text to {}: {}", target_lang, text)
    }
}

/// Beginner-friendly explanation of a word and its analysis.
///
/// `analysis` keeps its order in the prompt. When a grammar index is supplied
/// the `case` and `tense` entries steer retrieval of supporting rules.
pub async fn explain_grammar(
    llm: &dyn CompletionProvider,
    rag: Option<&GrammarRag>,
    word: &str,
    analysis: &[(&str, &str)],
) -> Result<String> {
    let analysis_text = analysis
        .iter()
        .map(|(key, value)| format!("- {}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n");

    let mut context = String::new();
    if !analysis.is_empty() {
        let mut query = format!("grammar for {}", word);
        for key in ["case", "tense"] {
            if let Some((_, value)) = analysis.iter().find(|(k, _)| *k == key) {
                query.push_str(&format!(" {} {}", key, value));
            }
        }

        let rules = optional_context(rag, &query, 2, &QueryFilter::new()).await?;
        if !rules.is_empty() {
            let lines: Vec<String> = rules
                .iter()
                .map(|r| format!("[{}] {}", r.chunk.source, r.chunk.preview(150)))
                .collect();
            context = format!("\n\nGrammar rules:\n{}", lines.join("\n"));
        }
    }

    let prompt = format!(
        "Explain the grammar of this Sanskrit word in simple terms for a beginner:\n\n\
         Word: {word}\n\n\
         Grammatical analysis:\n{analysis_text}\n{context}\n\n\
         Include:\n\
         1. What the word means\n\
         2. Its grammatical function (case, number, gender, tense, etc.)\n\
         3. Why it takes this form\n\
         4. A simple example sentence\n\n\
         EXPLANATION:\n"
    );

    llm.complete(&[ChatMessage::user(prompt)], &CompletionOptions::with_temperature(0.6))
        .await
}

/// Suggest an implementation of a rule described in prose
pub async fn suggest_implementation(
    rag: &GrammarRag,
    description: &str,
    language: &str,
    include_tests: bool,
) -> Result<String> {
    let context = chunks_of(rag.query(description, 3, &QueryFilter::new()).await?);
    if context.is_empty() {
        return Ok(format!("// No relevant grammar rules found for: {}", description));
    }

    let tests = if include_tests {
        "\n4. Test cases with examples"
    } else {
        ""
    };

    let prompt = format!(
        "You are a Sanskrit NLP expert implementing Pāṇinian grammar rules in code.\n\n\
         Grammar References:\n{references}\n\n\
         Task: {description}\n\n\
         Write production-quality {language} code with:\n\
         1. A clear, typed function signature\n\
         2. An implementation that follows the rules above\n\
         3. Comments explaining each step and citing sūtras{tests}\n\n\
         Be precise with the rules, handle edge cases, and call out ambiguities or limitations.\n\n\
         {upper} CODE:\n",
        references = cited_context(&context),
        upper = language.to_uppercase(),
    );

    rag.llm()
        .complete(
            &[ChatMessage::user(prompt)],
            &CompletionOptions::with_temperature(0.3).max_tokens(2000),
        )
        .await
}

/// Ask for `num_cases` test cases for a function described in prose
pub async fn generate_test_cases(
    llm: &dyn CompletionProvider,
    rag: Option<&GrammarRag>,
    description: &str,
    num_cases: usize,
) -> Result<Vec<TestCase>> {
    let references = optional_context(rag, description, 2, &QueryFilter::new()).await?;
    let context = if references.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = references.iter().map(|r| r.chunk.preview(200)).collect();
        format!("\n\nGrammar references:\n{}", lines.join("\n"))
    };

    let prompt = format!(
        "Generate {num_cases} diverse test cases for this Sanskrit NLP function:\n\n\
         Function: {description}\n{context}\n\n\
         Each test case needs the input (Sanskrit text or word), the expected output, \
         and a short description of what it checks.\n\n\
         Return a JSON object of this form:\n\
         {{\"test_cases\": [{{\"input\": \"...\", \"expected\": \"...\", \"description\": \"...\"}}]}}\n"
    );

    match llm
        .complete_json(&[ChatMessage::user(prompt)], &CompletionOptions::default())
        .await
    {
        Ok(value) => Ok(parse_test_cases(&value)),
        Err(VedyutError::ResponseShape(message)) => {
            log::warn!("Test case reply was not JSON: {}", message);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Accepts `{"test_cases": [...]}` or a bare array; malformed entries are skipped
pub fn parse_test_cases(value: &Value) -> Vec<TestCase> {
    let entries = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("test_cases") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => {
                log::warn!("Test case reply has no \"test_cases\" array");
                return Vec::new();
            }
        },
        _ => {
            log::warn!("Test case reply is neither an object nor an array");
            return Vec::new();
        }
    };

    let cases: Vec<TestCase> = entries.iter().filter_map(TestCase::from_value).collect();
    if cases.len() < entries.len() {
        log::warn!("Skipped {} malformed test case(s)", entries.len() - cases.len());
    }
    cases
}

/// Review `code` against the rules retrieved for `description`
pub async fn validate_rule_implementation(
    rag: &GrammarRag,
    code: &str,
    description: &str,
    language: &str,
) -> Result<ValidationReport> {
    let rules = chunks_of(rag.query(description, 2, &QueryFilter::new()).await?);
    let rule_text = rules
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Review this {language} code that implements a Pāṇinian grammar rule.\n\n\
         Grammar Rule:\n{rule_text}\n\n\
         Implementation:\n```{language}\n{code}\n```\n\n\
         Task: {description}\n\n\
         Decide whether the code implements the rule correctly. Return JSON:\n\
         {{\"is_valid\": true/false, \"confidence\": 0.0-1.0, \
         \"issues\": [\"...\"], \"suggestions\": [\"...\"]}}\n"
    );

    match rag
        .llm()
        .complete_json(&[ChatMessage::user(prompt)], &CompletionOptions::default())
        .await
    {
        Ok(value) => Ok(ValidationReport::from_value(&value)),
        Err(VedyutError::ResponseShape(message)) => {
            log::warn!("Validation reply was not JSON: {}", message);
            Ok(ValidationReport::failed(message))
        }
        Err(e) => Err(e),
    }
}

// Retrieval for tasks where grammar context is optional: no index means no context.
async fn optional_context(
    rag: Option<&GrammarRag>,
    query: &str,
    top_k: usize,
    filter: &QueryFilter,
) -> Result<Vec<ScoredChunk>> {
    let Some(rag) = rag else {
        return Ok(Vec::new());
    };
    match rag.query(query, top_k, filter).await {
        Err(e) if e.is_not_ready() => {
            log::warn!("Grammar index not ready; continuing without rule context");
            Ok(Vec::new())
        }
        other => other,
    }
}

fn chunks_of(results: Vec<ScoredChunk>) -> Vec<GrammarChunk> {
    results.into_iter().map(|r| r.chunk).collect()
}

fn cited_context(chunks: &[GrammarChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("{}\n{}", c.citation(), c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}
