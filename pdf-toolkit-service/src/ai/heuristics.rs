//! Offline text analysis used when no language model is reachable.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const EMPTY_SUMMARY: &str = "No content available for summarization.";
pub const NO_ANSWER: &str = "I couldn't find information related to your question in the document.";
const ANSWER_MAX_CHARS: usize = 500;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "can", "this", "that", "these", "those", "from",
    "they", "their", "there", "which", "when", "what", "also", "into", "than", "then",
];

const ENGLISH: &[&str] = &["the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by"];
const SPANISH: &[&str] = &["el", "la", "y", "o", "pero", "en", "de", "con", "por", "para"];
const FRENCH: &[&str] = &["le", "la", "et", "ou", "mais", "dans", "de", "avec", "par", "pour"];
const GERMAN: &[&str] = &[
    "der", "die", "und", "oder", "aber", "mit", "von", "für", "zu", "das", "ist", "nicht",
];

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "positive", "success", "benefit", "advantage", "improve",
    "better", "best", "effective", "efficient", "valuable", "important", "significant",
];
const NEGATIVE: &[&str] = &[
    "bad", "poor", "negative", "problem", "issue", "concern", "disadvantage", "worse", "worst",
    "ineffective", "inefficient", "difficult", "challenge", "risk",
];

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("valid regex"));
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b")
        .expect("valid regex")
});
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$\d+(?:[.,]\d+)*|\b\d+[.,]\d+\b|\b\d+\s*(?:percent|million|billion|thousand|euros?)\b|\b\d+%",
    )
    .expect("valid regex")
});

/// Sentences split on terminal punctuation, trimmed, empties dropped
pub fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Extractive summary of roughly `target_words` words
pub fn summarize(text: &str, target_words: usize) -> String {
    let sentences = sentences(text);
    if sentences.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    let mut frequency: HashMap<String, usize> = HashMap::new();
    for word in text.to_lowercase().split_whitespace() {
        if word.chars().count() > 3 {
            *frequency.entry(word.to_string()).or_default() += 1;
        }
    }

    let total = sentences.len();
    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let lower = sentence.to_lowercase();
            let words: Vec<&str> = lower.split_whitespace().collect();
            let frequency_score: usize = words
                .iter()
                .filter_map(|w| frequency.get(*w))
                .sum();
            let score = frequency_score as f64 + (total - i) as f64 * 0.1;
            let penalty = if words.len() < 5 || words.len() > 50 { 0.5 } else { 1.0 };
            (i, score * penalty)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut chosen = Vec::new();
    let mut length = 0;
    for (index, _) in scored {
        let words = sentences[index].split_whitespace().count();
        if length + words <= target_words {
            chosen.push(index);
            length += words;
        }
        if length as f64 >= target_words as f64 * 0.8 {
            break;
        }
    }

    let summary = if chosen.is_empty() {
        sentences.iter().take(3).copied().collect::<Vec<_>>().join(". ")
    } else {
        chosen.sort_unstable();
        chosen
            .iter()
            .map(|i| sentences[*i])
            .collect::<Vec<_>>()
            .join(". ")
    };
    format!("{}.", summary)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readability {
    pub flesch_score: f64,
    pub grade_level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub word_count: usize,
    pub character_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub sentiment: String,
    pub readability: Readability,
    pub language: String,
}

pub fn analyze(text: &str) -> ContentAnalysis {
    ContentAnalysis {
        word_count: text.split_whitespace().count(),
        character_count: text.chars().count(),
        sentence_count: sentences(text).len(),
        paragraph_count: text.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
        topics: topics(text, 10),
        entities: entities(text),
        sentiment: sentiment(text).to_string(),
        readability: readability(text),
        language: detect_language(text).to_string(),
    }
}

/// Most frequent non-stopword words longer than 3 characters; ties keep first appearance
pub fn topics(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in text.split_whitespace().enumerate() {
        let word = clean_word(word);
        if word.chars().count() > 3 && !STOP_WORDS.contains(&word.as_str()) {
            counts.entry(word).or_insert((0, position)).0 += 1;
        }
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Capitalized name runs (first 10), dates and amounts, deduplicated in order
pub fn entities(text: &str) -> Vec<String> {
    let names = NAME_RE.find_iter(text).take(10);
    let dates = DATE_RE.find_iter(text);
    let amounts = AMOUNT_RE.find_iter(text);

    let mut out: Vec<String> = Vec::new();
    for m in names.chain(dates).chain(amounts) {
        let value = m.as_str().trim().to_string();
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

pub fn sentiment(text: &str) -> &'static str {
    let (mut positive, mut negative) = (0usize, 0usize);
    for word in text.split_whitespace().map(clean_word) {
        if POSITIVE.contains(&word.as_str()) {
            positive += 1;
        } else if NEGATIVE.contains(&word.as_str()) {
            negative += 1;
        }
    }
    if positive as f64 > negative as f64 * 1.2 {
        "positive"
    } else if negative as f64 > positive as f64 * 1.2 {
        "negative"
    } else {
        "neutral"
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn readability(text: &str) -> Readability {
    let sentence_count = sentences(text).len();
    let words: Vec<&str> = text.split_whitespace().collect();
    if sentence_count == 0 || words.is_empty() {
        return Readability {
            flesch_score: 0.0,
            grade_level: 0.0,
        };
    }

    let asl = words.len() as f64 / sentence_count as f64;
    let awl = words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
    let flesch = (206.835 - 1.015 * asl - 84.6 * (awl / 4.7)).max(0.0);
    let grade = (0.39 * asl + 11.8 * (awl / 4.7) - 15.59).max(1.0);
    Readability {
        flesch_score: round2(flesch),
        grade_level: round2(grade),
    }
}

/// Language by stopword counts: english, spanish, french, german or unknown.
///
/// English wins only with a strict lead; otherwise the best of the others
/// wins, earlier in the list on ties.
pub fn detect_language(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let count = |list: &[&str]| words.iter().filter(|w| list.contains(w)).count();

    let english = count(ENGLISH);
    let others = [
        ("spanish", count(SPANISH)),
        ("french", count(FRENCH)),
        ("german", count(GERMAN)),
    ];
    let (best, best_count) = others
        .iter()
        .fold(("unknown", 0), |acc, &(name, n)| if n > acc.1 { (name, n) } else { acc });

    if english > best_count {
        "english"
    } else if best_count > 0 {
        best
    } else {
        "unknown"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub primary_category: String,
    pub document_type: String,
    pub confidence: f64,
    pub subject_area: String,
    #[serde(default)]
    pub secondary_categories: Vec<String>,
}

struct CategoryRule {
    category: &'static str,
    document_type: &'static str,
    confidence: f64,
    keywords: &'static [&'static str],
}

const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: "legal",
        document_type: "contract",
        confidence: 0.8,
        keywords: &["contract", "agreement", "terms", "conditions", "legal"],
    },
    CategoryRule {
        category: "financial",
        document_type: "financial_report",
        confidence: 0.7,
        keywords: &["financial", "budget", "revenue", "profit", "expense", "accounting"],
    },
    CategoryRule {
        category: "academic",
        document_type: "research_paper",
        confidence: 0.7,
        keywords: &["research", "study", "analysis", "methodology", "results", "conclusion"],
    },
    CategoryRule {
        category: "technical",
        document_type: "manual",
        confidence: 0.6,
        keywords: &["manual", "instructions", "guide", "how to", "procedure", "steps"],
    },
    CategoryRule {
        category: "business",
        document_type: "report",
        confidence: 0.6,
        keywords: &["report", "summary", "overview", "findings", "recommendations"],
    },
];

const SUBJECT_RULES: &[(&str, &[&str])] = &[
    ("technology", &["technology", "software", "computer", "digital", "internet"]),
    ("healthcare", &["medical", "health", "patient", "treatment", "diagnosis"]),
    ("education", &["education", "learning", "student", "teacher", "curriculum"]),
    ("marketing", &["marketing", "sales", "customer", "product", "service"]),
];

/// Keyword classification; the first matching rule is primary, later matches secondary
pub fn classify(text: &str, title: Option<&str>) -> Classification {
    let lower = text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    let mut matched = CATEGORY_RULES.iter().filter(|rule| matches(rule.keywords));
    let mut classification = match matched.next() {
        Some(rule) => Classification {
            primary_category: rule.category.to_string(),
            document_type: rule.document_type.to_string(),
            confidence: rule.confidence,
            subject_area: "general".to_string(),
            secondary_categories: matched.map(|r| r.category.to_string()).collect(),
        },
        None => Classification {
            primary_category: "general".to_string(),
            document_type: "document".to_string(),
            confidence: 0.5,
            subject_area: "general".to_string(),
            secondary_categories: Vec::new(),
        },
    };

    if let Some((subject, _)) = SUBJECT_RULES.iter().find(|(_, keywords)| matches(keywords)) {
        classification.subject_area = subject.to_string();
    }

    let title_words: Vec<String> = title
        .map(|t| t.split_whitespace().map(clean_word).collect())
        .unwrap_or_default();
    let in_title = |w: &str| title_words.iter().any(|t| t.contains(w));
    let overridden = if in_title("invoice") || in_title("bill") {
        Some(("financial", "invoice"))
    } else if in_title("resume") || title_words.iter().any(|w| w == "cv") {
        Some(("personal", "resume"))
    } else {
        None
    };
    if let Some((category, document_type)) = overridden {
        if classification.primary_category != category
            && classification.primary_category != "general"
        {
            let previous = std::mem::take(&mut classification.primary_category);
            classification.secondary_categories.insert(0, previous);
        }
        classification.primary_category = category.to_string();
        classification.document_type = document_type.to_string();
        classification.confidence = 0.9;
    }

    classification
}

/// Best three sentences by question keyword hits, in document order
pub fn answer_question(text: &str, question: &str) -> String {
    let keywords: Vec<String> = question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| "?.,!".contains(c)).to_lowercase())
        .filter(|w| w.chars().count() > 3)
        .collect();

    let sentences = sentences(text);
    let mut scored: Vec<(usize, usize)> = sentences
        .iter()
        .enumerate()
        .filter_map(|(i, sentence)| {
            let lower = sentence.to_lowercase();
            let hits = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
            (hits > 0).then_some((i, hits))
        })
        .collect();
    if scored.is_empty() {
        return NO_ANSWER.to_string();
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut best: Vec<usize> = scored.into_iter().take(3).map(|(i, _)| i).collect();
    best.sort_unstable();

    let answer = best
        .iter()
        .map(|i| sentences[*i])
        .collect::<Vec<_>>()
        .join(" ");
    if answer.chars().count() > ANSWER_MAX_CHARS {
        format!("{}...", truncate_chars(&answer, ANSWER_MAX_CHARS))
    } else {
        answer
    }
}

fn phrase_map(language: &str) -> Option<&'static [(&'static str, &'static str)]> {
    let map: &'static [(&str, &str)] = match language {
        "spanish" | "es" => &[
            ("thank you", "gracias"),
            ("hello", "hola"),
            ("goodbye", "adiós"),
            ("please", "por favor"),
            ("yes", "sí"),
            ("document", "documento"),
            ("page", "página"),
            ("text", "texto"),
            ("content", "contenido"),
            ("information", "información"),
            ("data", "datos"),
            ("report", "informe"),
            ("analysis", "análisis"),
            ("summary", "resumen"),
            ("conclusion", "conclusión"),
        ],
        "french" | "fr" => &[
            ("thank you", "merci"),
            ("hello", "bonjour"),
            ("goodbye", "au revoir"),
            ("please", "s'il vous plaît"),
            ("yes", "oui"),
            ("no", "non"),
            ("text", "texte"),
            ("content", "contenu"),
            ("data", "données"),
            ("report", "rapport"),
            ("analysis", "analyse"),
            ("summary", "résumé"),
        ],
        "german" | "de" => &[
            ("thank you", "danke"),
            ("hello", "hallo"),
            ("goodbye", "auf wiedersehen"),
            ("please", "bitte"),
            ("yes", "ja"),
            ("no", "nein"),
            ("document", "dokument"),
            ("page", "seite"),
            ("content", "inhalt"),
            ("data", "daten"),
            ("report", "bericht"),
            ("analysis", "analyse"),
            ("summary", "zusammenfassung"),
            ("conclusion", "schlussfolgerung"),
        ],
        _ => return None,
    };
    Some(map)
}

/// Whole-word phrase substitution for a few languages.
///
/// Unsupported languages return the text unchanged behind a notice.
pub fn translate(text: &str, target_language: &str, preserve_formatting: bool) -> String {
    let source = if preserve_formatting {
        text.to_string()
    } else {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    };

    let Some(map) = phrase_map(&target_language.trim().to_lowercase()) else {
        return format!(
            "[Translation to {} not available in offline mode]\n\n{}",
            target_language, source
        );
    };

    let alternatives = map
        .iter()
        .map(|(from, _)| regex::escape(from))
        .collect::<Vec<_>>()
        .join("|");
    let translated = match Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives)) {
        Ok(pattern) => pattern
            .replace_all(&source, |caps: &regex::Captures| {
                let found = caps[0].to_lowercase();
                map.iter()
                    .find(|(from, _)| *from == found)
                    .map(|(_, to)| to.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned(),
        Err(_) => source,
    };
    format!("[Basic translation to {}]\n\n{}", target_language, translated)
}

const SUMMARY_WORDS: &[&str] = &["summary", "summarize", "overview", "main points", "key points"];
const GREETINGS: &[&str] = &["hello", "hi", "hey", "good morning", "good afternoon", "good evening"];
const QUESTION_WORDS: &[&str] = &["what", "when", "where", "who", "why", "how"];
const HELP_WORDS: &[&str] = &["help", "assist", "support", "guide"];

fn mentions(message: &[String], phrases: &[&str]) -> bool {
    let joined = message.join(" ");
    phrases.iter().any(|p| {
        if p.contains(' ') {
            joined.contains(p)
        } else {
            message.iter().any(|w| w == p)
        }
    })
}

/// Keyword-routed chat reply grounded in the document context
pub fn chat_reply(message: &str, context: &str) -> String {
    let words: Vec<String> = message.split_whitespace().map(clean_word).collect();

    if mentions(&words, SUMMARY_WORDS) {
        let opening = sentences(context).into_iter().take(3).collect::<Vec<_>>().join(". ");
        return format!(
            "Here's a brief summary of the document:\n\n{}.\n\nWould you like me to elaborate on any specific aspect?",
            opening
        );
    }

    if mentions(&words, GREETINGS) {
        return "Hello! I'm here to help you understand and analyze this PDF document. \
                What would you like to know about it?"
            .to_string();
    }

    if mentions(&words, QUESTION_WORDS) {
        let answer = answer_question(context, message);
        if answer != NO_ANSWER {
            return answer;
        }
    }

    if mentions(&words, HELP_WORDS) {
        return "I can help you with this PDF document:\n\n\
                - Ask questions about the content\n\
                - Request summaries or explanations\n\
                - Find specific information\n\
                - Analyze key topics and themes\n\
                - Translate content to other languages\n\n\
                What would you like to explore?"
            .to_string();
    }

    format!(
        "I understand you're asking about: \"{}\"\n\n\
         I can answer specific questions about the content, summarize it, \
         or look for particular information. Could you be more specific?",
        message.trim()
    )
}
