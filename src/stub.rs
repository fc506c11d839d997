use async_trait::async_trait;
use serde_json::json;

use crate::error::ProviderError;
use crate::models::TaskKind;
use crate::provider::{GenerationOptions, GenerationProvider};

pub const PLACEHOLDER_MARK: &str = "[Offline placeholder]";

#[derive(Debug, Clone, Copy, Default)]
pub struct StubProvider;

impl StubProvider {
    /// 每个任务的占位输出，格式和真实模型被要求的 JSON 格式一致
    pub fn placeholder(&self, task: TaskKind) -> String {
        let value = match task {
            TaskKind::AnalyzeEntry => json!({
                "corrected": format!("{PLACEHOLDER_MARK} Corrections are unavailable right now."),
                "rewritten": format!("{PLACEHOLDER_MARK} A native-like rewrite is unavailable right now."),
                "score": 0,
                "tone": "Neutral",
                "translation": format!("{PLACEHOLDER_MARK} Translation is unavailable right now."),
                "explanation": format!("{PLACEHOLDER_MARK} No feedback provider is reachable. Please try again later."),
                "rubric": { "grammar": 0, "vocabulary": 0, "complexity": 0 },
                "grammar_suggestions": [],
                "new_words": []
            }),
            TaskKind::EnrichVocabulary => json!({
                "example_sentences": [],
                "definitions": [],
                "synonyms": [],
                "antonyms": [],
                "related_phrases": [],
                "conjugations": {},
                "cultural_note": format!("{PLACEHOLDER_MARK} Enrichment is unavailable right now."),
                "pronunciation_guide": "",
                "alternative_forms": [],
                "common_mistakes": []
            }),
            TaskKind::ExplainSimply => json!({
                "explanation": format!("{PLACEHOLDER_MARK} A simple explanation is unavailable right now.")
            }),
            TaskKind::MoreExamples => json!({
                "new_example_sentences": []
            }),
            TaskKind::MiniQuiz => json!({
                "quiz_title": format!("{PLACEHOLDER_MARK} Quiz unavailable"),
                "questions": []
            }),
        };
        value.to_string()
    }
}

#[async_trait]
impl GenerationProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _prompt: &str, options: &GenerationOptions) -> Result<String, ProviderError> {
        Ok(self.placeholder(options.task))
    }
}
