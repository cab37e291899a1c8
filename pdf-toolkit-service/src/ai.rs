//! Document analysis: summaries, content analysis, classification, question
//! answering, translation and chat.
//!
//! Every task asks Ollama first when it is enabled and falls back to the
//! deterministic heuristics in [`heuristics`] when it is disabled or fails.
//! `data.engine` records which one answered.

mod chat;
mod heuristics;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, instrument, warn};

pub use chat::{ChatSession, ChatStore};
pub use heuristics::{Classification, detect_language, truncate_chars};

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::files::sanitize_filename;
use crate::ollama::{ChatMessage, OllamaClient};
use crate::operation::OperationResult;
use crate::pdf::extract::{document_title, join_pages, page_texts};
use crate::pdf::{load, stem};

pub const MIN_SUMMARY_WORDS: u32 = 50;
pub const MAX_SUMMARY_WORDS: u32 = 2000;
pub const DEFAULT_SUMMARY_WORDS: u32 = 500;

/// Characters of document text sent to the model
const MODEL_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Ollama,
    Heuristic,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Ollama => "ollama",
            Engine::Heuristic => "heuristic",
        }
    }
}

/// Text and title of a PDF, read on a blocking thread
async fn read_document(input: &Path) -> ServiceResult<(String, Option<String>)> {
    let input = input.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let doc = load(&input)?;
        let (pages, _) = page_texts(&doc);
        Ok((join_pages(&pages, false), document_title(&doc)))
    })
    .await
    .map_err(|e| ServiceError::internal(format!("text extraction task failed: {}", e)))?
}

fn no_text() -> OperationResult {
    OperationResult::failure("No text content found in PDF", "No extractable text content")
        .with_warning("Document appears to be empty or image-based")
}

async fn write_output(path: &Path, content: &str) -> ServiceResult<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| ProcessingError::Io(e).into())
}

fn pretty(value: &impl serde::Serialize) -> ServiceResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| ServiceError::internal(e.to_string()))
}

/// Parse the first `{...}` block of a model reply
fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

pub fn validate_summary_length(words: u32) -> ServiceResult<()> {
    if !(MIN_SUMMARY_WORDS..=MAX_SUMMARY_WORDS).contains(&words) {
        return Err(ServiceError::invalid(format!(
            "summary_length must be between {} and {}",
            MIN_SUMMARY_WORDS, MAX_SUMMARY_WORDS
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ModelAnalysis {
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    sentiment: Option<String>,
}

pub struct AiService {
    ollama: Arc<OllamaClient>,
    sessions: ChatStore,
}

impl AiService {
    pub fn new(ollama: Arc<OllamaClient>) -> Self {
        Self {
            ollama,
            sessions: ChatStore::new(),
        }
    }

    /// Ask the model; `None` when disabled, failing or empty
    async fn ask(&self, messages: Vec<ChatMessage>) -> Option<String> {
        if !self.ollama.is_enabled() {
            return None;
        }
        match self.ollama.chat(messages).await {
            Ok(reply) if !reply.trim().is_empty() => Some(reply.trim().to_string()),
            Ok(_) => {
                warn!("Ollama returned an empty reply, using heuristics");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ollama request failed, using heuristics");
                None
            }
        }
    }

    async fn ask_about(&self, instruction: String, text: &str) -> Option<String> {
        let excerpt = truncate_chars(text, MODEL_INPUT_CHARS);
        self.ask(vec![
            ChatMessage::system(instruction),
            ChatMessage::user(format!("Document text:\n{}", excerpt)),
        ])
        .await
    }

    #[instrument(skip_all, fields(input = %input.display(), length_words))]
    pub async fn summarize(
        &self,
        input: &Path,
        length_words: u32,
        output_dir: &Path,
    ) -> ServiceResult<OperationResult> {
        validate_summary_length(length_words)?;
        let (text, _) = read_document(input).await?;
        if text.trim().is_empty() {
            return Ok(no_text());
        }

        let instruction = format!(
            "Summarize the document in about {} words. Reply with the summary only.",
            length_words
        );
        let (summary, engine) = match self.ask_about(instruction, &text).await {
            Some(reply) => (reply, Engine::Ollama),
            None => (
                heuristics::summarize(&text, length_words as usize),
                Engine::Heuristic,
            ),
        };

        let output = output_dir.join(format!("{}_summary.txt", stem(input)));
        write_output(&output, &summary).await?;
        let words = summary.split_whitespace().count();
        info!(words, engine = engine.as_str(), "Document summarized");

        Ok(
            OperationResult::ok(format!("Document summarized ({} words)", words))
                .with_output(&output)
                .with_data(json!({
                    "summary": summary,
                    "word_count": words,
                    "target_words": length_words,
                    "engine": engine.as_str(),
                })),
        )
    }

    #[instrument(skip_all, fields(input = %input.display()))]
    pub async fn analyze(&self, input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
        let (text, _) = read_document(input).await?;
        if text.trim().is_empty() {
            return Ok(no_text());
        }

        let mut analysis = heuristics::analyze(&text);
        let instruction = "List the main topics of the document and its overall sentiment. \
            Reply with JSON only: {\"topics\": [up to 10 short topics], \
            \"sentiment\": \"positive\" | \"negative\" | \"neutral\"}"
            .to_string();
        let mut engine = Engine::Heuristic;
        if let Some(reply) = self.ask_about(instruction, &text).await {
            match parse_json_reply::<ModelAnalysis>(&reply) {
                Some(model) => {
                    if !model.topics.is_empty() {
                        analysis.topics = model.topics.into_iter().take(10).collect();
                    }
                    if let Some(sentiment) = model
                        .sentiment
                        .map(|s| s.to_lowercase())
                        .filter(|s| matches!(s.as_str(), "positive" | "negative" | "neutral"))
                    {
                        analysis.sentiment = sentiment;
                    }
                    engine = Engine::Ollama;
                }
                None => warn!("Unparseable analysis reply, keeping heuristics"),
            }
        }

        let output = output_dir.join(format!("{}_analysis.json", stem(input)));
        write_output(&output, &pretty(&analysis)?).await?;

        let mut data = serde_json::to_value(&analysis)
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        data["engine"] = json!(engine.as_str());
        Ok(OperationResult::ok("Content analysis complete")
            .with_output(&output)
            .with_data(data))
    }

    #[instrument(skip_all, fields(input = %input.display()))]
    pub async fn classify(&self, input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
        let (text, title) = read_document(input).await?;
        if text.trim().is_empty() {
            return Ok(no_text());
        }

        let instruction = format!(
            "Classify the document{}. Reply with JSON only: {{\"primary_category\": string, \
             \"document_type\": string, \"subject_area\": string, \"confidence\": number 0-1, \
             \"secondary_categories\": [string]}}",
            title
                .as_deref()
                .map(|t| format!(" titled \"{}\"", t))
                .unwrap_or_default()
        );
        let model = match self.ask_about(instruction, &text).await {
            Some(reply) => parse_json_reply::<Classification>(&reply),
            None => None,
        };
        let (mut classification, engine) = match model {
            Some(c) => (c, Engine::Ollama),
            None => (
                heuristics::classify(&text, title.as_deref()),
                Engine::Heuristic,
            ),
        };
        classification.confidence = classification.confidence.clamp(0.0, 1.0);

        let output = output_dir.join(format!("{}_classification.json", stem(input)));
        write_output(&output, &pretty(&classification)?).await?;

        let mut data = serde_json::to_value(&classification)
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        data["engine"] = json!(engine.as_str());
        Ok(OperationResult::ok(format!(
            "Classified as {} ({})",
            classification.primary_category, classification.document_type
        ))
        .with_output(&output)
        .with_data(data))
    }

    #[instrument(skip_all, fields(input = %input.display()))]
    pub async fn answer_question(
        &self,
        input: &Path,
        question: &str,
        output_dir: &Path,
    ) -> ServiceResult<OperationResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ServiceError::invalid("question cannot be empty"));
        }
        let (text, _) = read_document(input).await?;
        if text.trim().is_empty() {
            return Ok(no_text());
        }

        let instruction = format!(
            "Answer the question from the document. If the document does not contain \
             the answer, say so.\n\nQuestion: {}",
            question
        );
        let (answer, engine) = match self.ask_about(instruction, &text).await {
            Some(reply) => (reply, Engine::Ollama),
            None => (heuristics::answer_question(&text, question), Engine::Heuristic),
        };

        let output = output_dir.join(format!("{}_qa.txt", stem(input)));
        write_output(&output, &format!("Q: {}\n\nA: {}\n", question, answer)).await?;

        Ok(OperationResult::ok("Question answered")
            .with_output(&output)
            .with_data(json!({
                "question": question,
                "answer": answer,
                "engine": engine.as_str(),
            })))
    }

    #[instrument(skip_all, fields(input = %input.display(), target_language))]
    pub async fn translate(
        &self,
        input: &Path,
        target_language: &str,
        preserve_formatting: bool,
        output_dir: &Path,
    ) -> ServiceResult<OperationResult> {
        let target_language = target_language.trim();
        if target_language.is_empty() {
            return Err(ServiceError::invalid("target_language cannot be empty"));
        }
        let (text, _) = read_document(input).await?;
        if text.trim().is_empty() {
            return Ok(no_text());
        }

        let instruction = format!(
            "Translate the document into {}{}. Reply with the translation only.",
            target_language,
            if preserve_formatting {
                ", keeping its line breaks and structure"
            } else {
                ""
            }
        );
        let (translated, engine) = match self.ask_about(instruction, &text).await {
            Some(reply) => (reply, Engine::Ollama),
            None => (
                heuristics::translate(&text, target_language, preserve_formatting),
                Engine::Heuristic,
            ),
        };

        let output = output_dir.join(format!(
            "{}_translated_{}.txt",
            stem(input),
            sanitize_filename(&target_language.to_lowercase())
        ));
        write_output(&output, &translated).await?;

        let mut result = OperationResult::ok(format!("Content translated to {}", target_language))
            .with_output(&output)
            .with_data(json!({
                "target_language": target_language,
                "characters": translated.chars().count(),
                "engine": engine.as_str(),
            }));
        if engine == Engine::Heuristic {
            result = result.with_warning("Offline translation covers common words only");
        }
        Ok(result)
    }

    pub async fn start_chat(&self, file_id: &str, input: &Path) -> ServiceResult<ChatSession> {
        let (text, _) = read_document(input).await?;
        Ok(self.sessions.start(file_id, &text))
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn chat(&self, session_id: &str, message: &str) -> ServiceResult<OperationResult> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ServiceError::invalid("message cannot be empty"));
        }
        let session = self.sessions.get(session_id)?;

        let (reply, engine) = match self.ask(session.to_messages(message)).await {
            Some(reply) => (reply, Engine::Ollama),
            None => (
                heuristics::chat_reply(message, &session.context),
                Engine::Heuristic,
            ),
        };
        let turns = self.sessions.record_exchange(session_id, message, &reply)?;

        Ok(OperationResult::ok(reply.clone()).with_data(json!({
            "session_id": session_id,
            "response": reply,
            "turns": turns,
            "engine": engine.as_str(),
        })))
    }

    pub fn session(&self, session_id: &str) -> ServiceResult<ChatSession> {
        self.sessions.get(session_id)
    }

    pub fn purge_sessions(&self, ttl: Duration) -> usize {
        self.sessions.purge_idle(ttl)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::pdf::testing::write_pdf;
    use std::path::PathBuf;

    fn service(dir: &Path) -> AiService {
        let config = Arc::new(test_config(dir));
        AiService::new(Arc::new(OllamaClient::new(config).unwrap()))
    }

    fn report(dir: &Path) -> PathBuf {
        write_pdf(
            dir,
            "report.pdf",
            &[
                vec![
                    "The quarterly report covers revenue growth across all regions.",
                    "Revenue increased by 12 percent compared to last year.",
                ],
                vec![
                    "The sales team closed several large contracts with new customers.",
                    "Management expects revenue growth to continue next quarter.",
                ],
            ],
        )
    }

    #[tokio::test]
    async fn test_summarize_offline() {
        let dir = tempfile::tempdir().unwrap();
        let input = report(dir.path());
        let ai = service(dir.path());

        let result = ai.summarize(&input, 50, dir.path()).await.unwrap();
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["engine"], "heuristic");
        assert_eq!(data["target_words"], 50);
        let written = std::fs::read_to_string(&result.output_files[0]).unwrap();
        assert_eq!(written, data["summary"].as_str().unwrap());
        assert!(written.to_lowercase().contains("revenue"));
    }

    #[tokio::test]
    async fn test_summarize_rejects_length_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let input = report(dir.path());
        let ai = service(dir.path());
        assert!(matches!(
            ai.summarize(&input, 10, dir.path()).await,
            Err(ServiceError::InvalidRequest { .. })
        ));
        assert!(matches!(
            ai.summarize(&input, 5000, dir.path()).await,
            Err(ServiceError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_document_is_a_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_pdf(dir.path(), "blank.pdf", &[vec![]]);
        let ai = service(dir.path());

        let result = ai.analyze(&input, dir.path()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, vec!["No extractable text content"]);
    }

    #[tokio::test]
    async fn test_analyze_and_classify_offline() {
        let dir = tempfile::tempdir().unwrap();
        let input = report(dir.path());
        let ai = service(dir.path());

        let analysis = ai.analyze(&input, dir.path()).await.unwrap();
        let data = analysis.data.unwrap();
        assert_eq!(data["language"], "english");
        assert_eq!(data["engine"], "heuristic");
        assert!(data["topics"].as_array().unwrap().iter().any(|t| t == "revenue"));

        let classification = ai.classify(&input, dir.path()).await.unwrap();
        let data = classification.data.unwrap();
        assert_eq!(data["primary_category"], "legal");
        assert_eq!(data["subject_area"], "marketing");
        assert!(
            data["secondary_categories"]
                .as_array()
                .unwrap()
                .iter()
                .any(|c| c == "financial")
        );
    }

    #[tokio::test]
    async fn test_question_and_translate_offline() {
        let dir = tempfile::tempdir().unwrap();
        let input = report(dir.path());
        let ai = service(dir.path());

        let qa = ai
            .answer_question(&input, "How much did revenue increase?", dir.path())
            .await
            .unwrap();
        let answer = qa.data.unwrap()["answer"].as_str().unwrap().to_string();
        assert!(answer.contains("12 percent"));

        let translated = ai.translate(&input, "German", true, dir.path()).await.unwrap();
        assert!(translated.output_files[0].ends_with("report_translated_german.txt"));
        assert_eq!(translated.warnings.len(), 1);
        let text = std::fs::read_to_string(&translated.output_files[0]).unwrap();
        assert!(text.starts_with("[Basic translation to German]"));
        assert!(text.contains("bericht"));
    }

    #[tokio::test]
    async fn test_chat_session_flow() {
        let dir = tempfile::tempdir().unwrap();
        let input = report(dir.path());
        let ai = service(dir.path());

        let session = ai.start_chat("file-1", &input).await.unwrap();
        let reply = ai.chat(&session.id, "hello").await.unwrap();
        assert!(reply.message.starts_with("Hello!"));
        assert_eq!(reply.data.unwrap()["turns"], 2);
        assert_eq!(ai.session(&session.id).unwrap().history.len(), 2);

        assert!(matches!(
            ai.chat("missing", "hello").await,
            Err(ServiceError::SessionNotFound { .. })
        ));
        assert_eq!(ai.purge_sessions(Duration::ZERO), 1);
    }

    #[test]
    fn test_parse_json_reply_ignores_surrounding_text() {
        let reply = "Sure! Here it is:\n```json\n{\"topics\": [\"a\"], \"sentiment\": \"neutral\"}\n```";
        let parsed: ModelAnalysis = parse_json_reply(reply).unwrap();
        assert_eq!(parsed.topics, vec!["a"]);
        assert!(parse_json_reply::<ModelAnalysis>("no json here").is_none());
    }
}
