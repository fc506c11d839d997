use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// 生成任务种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AnalyzeEntry,
    EnrichVocabulary,
    ExplainSimply,
    MoreExamples,
    MiniQuiz,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AnalyzeEntry => "analyze_entry",
            TaskKind::EnrichVocabulary => "enrich_vocabulary",
            TaskKind::ExplainSimply => "explain_simply",
            TaskKind::MoreExamples => "more_examples",
            TaskKind::MiniQuiz => "mini_quiz",
        }
    }

    pub fn default_max_tokens(&self) -> u32 {
        match self {
            TaskKind::AnalyzeEntry => 1500,
            TaskKind::EnrichVocabulary => 2000,
            TaskKind::ExplainSimply => 400,
            TaskKind::MoreExamples => 600,
            TaskKind::MiniQuiz => 1200,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务以及任务特有的参数
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationTask {
    AnalyzeEntry,
    EnrichVocabulary,
    ExplainSimply,
    MoreExamples {
        existing_examples: Vec<String>,
        level: String,
        count: usize,
    },
    MiniQuiz {
        num_questions: usize,
        difficulty: String,
    },
}

impl GenerationTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            GenerationTask::AnalyzeEntry => TaskKind::AnalyzeEntry,
            GenerationTask::EnrichVocabulary => TaskKind::EnrichVocabulary,
            GenerationTask::ExplainSimply => TaskKind::ExplainSimply,
            GenerationTask::MoreExamples { .. } => TaskKind::MoreExamples,
            GenerationTask::MiniQuiz { .. } => TaskKind::MiniQuiz,
        }
    }
}

/// 单次调用构造的生成请求，不做持久化
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    /// 日记正文或单词
    pub input: String,
    /// 目标语言的完整名称，例如 "Spanish"
    pub language: String,
    pub context: Option<String>,
}

impl GenerationRequest {
    pub fn new(task: GenerationTask, input: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            task,
            input: input.into(),
            language: language.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }
}

// ============ 日记分析结果 ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tone {
    Reflective,
    Confident,
    #[default]
    Neutral,
}

impl Tone {
    /// 把模型给出的任意语气描述归到三种语气之一
    pub fn from_label(label: &str) -> Tone {
        let lower = label.trim().to_lowercase();
        if lower.contains("reflect") || lower.contains("thought") || lower.contains("introspect") {
            Tone::Reflective
        } else if lower.contains("confiden") || lower.contains("assert") || lower.contains("self-assured") {
            Tone::Confident
        } else {
            Tone::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Reflective => "Reflective",
            Tone::Confident => "Confident",
            Tone::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rubric {
    pub grammar: u8,
    pub vocabulary: u8,
    pub complexity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GrammarSuggestion {
    pub original: String,
    pub corrected: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedWord {
    pub term: String,
    pub part_of_speech: String,
    pub definition: String,
    pub reading: String,
    pub example: String,
    /// beginner / intermediate / advanced，未知时为空
    pub proficiency: String,
}

/// 日记分析的完整反馈，每个字段都有确定的值
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub corrected: String,
    pub rewritten: String,
    pub score: u8,
    pub tone: Tone,
    pub translation: String,
    pub explanation: String,
    pub rubric: Rubric,
    pub grammar_suggestions: Vec<GrammarSuggestion>,
    pub extracted_words: Vec<ExtractedWord>,
}

// ============ 词汇和缓存 ============

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct VocabularyItem {
    pub id: i64,
    pub user_id: i64,
    pub term: String,
    pub language: String,
    pub part_of_speech: String,
    pub definition: String,
    pub reading: String,
    pub example: String,
    pub status: String,
    pub entry_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

pub const STATUS_NEW: &str = "new";

// 用户保存单词时的输入
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewVocabularyItem {
    pub user_id: i64,
    pub term: String,
    pub language: String,
    pub part_of_speech: String,
    pub definition: String,
    pub reading: String,
    pub example: String,
    pub entry_id: Option<i64>,
}

impl NewVocabularyItem {
    pub fn new(user_id: i64, term: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            user_id,
            term: term.into(),
            language: language.into(),
            ..Default::default()
        }
    }

    pub fn from_extracted(user_id: i64, language: &str, word: &ExtractedWord, entry_id: Option<i64>) -> Self {
        Self {
            user_id,
            term: word.term.clone(),
            language: language.to_string(),
            part_of_speech: word.part_of_speech.clone(),
            definition: word.definition.clone(),
            reading: word.reading.clone(),
            example: word.example.clone(),
            entry_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Definition {
    pub part_of_speech: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommonMistake {
    pub mistake: String,
    pub correction: String,
    pub explanation: String,
}

/// 模型生成的单词扩展信息（不含缓存键）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichmentContent {
    pub example_sentences: Vec<String>,
    pub definitions: Vec<Definition>,
    pub synonyms: Vec<String>,
    pub antonyms: Vec<String>,
    pub related_phrases: Vec<String>,
    /// 变位表：形式名 -> 形式
    pub conjugations: BTreeMap<String, String>,
    pub cultural_note: String,
    pub pronunciation_guide: String,
    pub alternative_forms: Vec<String>,
    pub common_mistakes: Vec<CommonMistake>,
    pub emotion_tone: String,
    pub mnemonic: String,
    pub emoji: String,
}

/// 缓存行，(vocabulary_item_id, language) 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentCacheEntry {
    pub id: i64,
    pub vocabulary_item_id: i64,
    pub language: String,
    #[serde(flatten)]
    pub content: EnrichmentContent,
    pub source_provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// 写入缓存的一次成功生成
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnrichment {
    pub vocabulary_item_id: i64,
    pub language: String,
    pub content: EnrichmentContent,
    pub source_provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub language: String,
    pub feedback: FeedbackResult,
    pub created_at: DateTime<Utc>,
}

// ============ 即时生成任务 ============

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimpleExplanation {
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoreExamples {
    pub new_example_sentences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    /// 总是 options 的合法下标
    pub correct_answer_index: usize,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MiniQuiz {
    pub quiz_title: String,
    pub questions: Vec<QuizQuestion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_labels_collapse_to_three_values() {
        assert_eq!(Tone::from_label("Reflective"), Tone::Reflective);
        assert_eq!(Tone::from_label("quite thoughtful"), Tone::Reflective);
        assert_eq!(Tone::from_label("CONFIDENT"), Tone::Confident);
        assert_eq!(Tone::from_label("happy"), Tone::Neutral);
        assert_eq!(Tone::from_label(""), Tone::Neutral);
    }

    #[test]
    fn feedback_default_is_neutral() {
        let feedback = FeedbackResult::default();
        assert_eq!(feedback.score, 0);
        assert_eq!(feedback.tone, Tone::Neutral);
        assert_eq!(feedback.rubric, Rubric::default());
        assert!(feedback.grammar_suggestions.is_empty());
    }

    #[test]
    fn blank_context_is_dropped() {
        let request = GenerationRequest::new(GenerationTask::ExplainSimply, "gato", "Spanish")
            .with_context(Some("   ".to_string()));
        assert_eq!(request.context, None);
    }
}
