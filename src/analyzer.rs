use anyhow::Result;
use tracing::{debug, info};

use crate::config::Config;
use crate::language::language_name;
use crate::models::*;
use crate::parser::{self, ParseQuality, Parsed};
use crate::prompts;
use crate::provider::{GenerationOptions, ProviderChain};

pub const DEFAULT_QUIZ_QUESTIONS: usize = 3;
pub const MAX_QUIZ_QUESTIONS: usize = 10;
pub const DEFAULT_DIFFICULTY: &str = "medium";
pub const DEFAULT_LEVEL: &str = "intermediate";
pub const DEFAULT_EXAMPLES: usize = 3;
pub const MAX_EXAMPLES: usize = 10;

/// 一次生成的解析结果以及它的来源
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub provider: String,
    pub quality: ParseQuality,
    /// 所有 provider 都失败，内容来自占位 provider
    pub placeholder: bool,
}

impl<T> Generated<T> {
    /// 占位内容或纯启发式解析的结果，不应该被缓存
    pub fn is_degraded(&self) -> bool {
        self.placeholder || self.quality == ParseQuality::Fallback
    }
}

/// 日记分析和即时生成任务的编排器：构造 prompt -> provider 链生成 -> 解析。
/// 所有公开方法都不会返回错误，最坏情况下得到带标记的占位内容。
pub struct FeedbackEngine {
    chain: ProviderChain,
    pub config: Config,
}

impl FeedbackEngine {
    pub fn new(config: Config) -> Result<Self> {
        let chain = ProviderChain::from_config(&config)?;
        Ok(Self::with_chain(chain, config))
    }

    pub fn with_chain(chain: ProviderChain, config: Config) -> Self {
        FeedbackEngine { chain, config }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.chain.provider_names()
    }

    async fn run<T>(&self, request: GenerationRequest, parse: impl FnOnce(&str) -> Parsed<T>) -> Generated<T> {
        let kind = request.task.kind();
        let prompt = prompts::build(&request);
        let options = GenerationOptions::for_task(kind, &self.config);
        debug!(task = %kind, prompt_chars = prompt.chars().count(), "开始生成");

        let generation = self.chain.generate(&prompt, &options).await;
        let parsed = parse(&generation.text);

        info!(
            task = %kind,
            provider = %generation.provider,
            quality = %parsed.quality,
            placeholder = generation.placeholder,
            "生成完成"
        );

        Generated {
            value: parsed.value,
            provider: generation.provider,
            quality: parsed.quality,
            placeholder: generation.placeholder,
        }
    }

    /// 分析一篇日记，返回纠正、改写、评分、语气、翻译和生词
    pub async fn analyze_entry(&self, text: &str, language: &str) -> Generated<FeedbackResult> {
        let request = GenerationRequest::new(GenerationTask::AnalyzeEntry, text, language_name(language));
        self.run(request, parser::parse_feedback).await
    }

    /// 为单词生成完整的扩展信息（例句、释义、近反义词、变位等）
    pub async fn enrich_term(&self, term: &str, language: &str, context: Option<&str>) -> Generated<EnrichmentContent> {
        let request = GenerationRequest::new(GenerationTask::EnrichVocabulary, term, language_name(language))
            .with_context(context.map(str::to_string));
        self.run(request, parser::parse_enrichment).await
    }

    pub async fn explain_simply(&self, term: &str, language: &str, context: Option<&str>) -> Generated<SimpleExplanation> {
        let request = GenerationRequest::new(GenerationTask::ExplainSimply, term, language_name(language))
            .with_context(context.map(str::to_string));
        self.run(request, parser::parse_explanation).await
    }

    /// 新例句不会和 `existing` 中的句子重复，句数默认 3，限制在 1..=10
    pub async fn more_examples(
        &self,
        term: &str,
        language: &str,
        existing: &[String],
        level: Option<&str>,
        count: Option<usize>,
    ) -> Generated<MoreExamples> {
        let existing_examples: Vec<String> = existing
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        let level = non_blank(level).unwrap_or(DEFAULT_LEVEL).to_string();
        let count = count.unwrap_or(DEFAULT_EXAMPLES).clamp(1, MAX_EXAMPLES);

        let task = GenerationTask::MoreExamples {
            existing_examples: existing_examples.clone(),
            level,
            count,
        };
        let request = GenerationRequest::new(task, term, language_name(language));
        let mut generated = self.run(request, |raw| parser::parse_examples(raw, &existing_examples)).await;
        generated.value.new_example_sentences.truncate(count);
        generated
    }

    /// 题目数默认 3，限制在 1..=10
    pub async fn mini_quiz(
        &self,
        term: &str,
        language: &str,
        num_questions: Option<usize>,
        difficulty: Option<&str>,
    ) -> Generated<MiniQuiz> {
        let num_questions = num_questions
            .unwrap_or(DEFAULT_QUIZ_QUESTIONS)
            .clamp(1, MAX_QUIZ_QUESTIONS);
        let difficulty = non_blank(difficulty).unwrap_or(DEFAULT_DIFFICULTY).to_string();

        let request = GenerationRequest::new(
            GenerationTask::MiniQuiz { num_questions, difficulty },
            term,
            language_name(language),
        );
        let mut generated = self.run(request, |raw| parser::parse_quiz(raw, term)).await;
        generated.value.questions.truncate(num_questions);
        generated
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
