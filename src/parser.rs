// 三级解析：JSON -> key: value 行 -> 启发式，任何输入都返回完整记录

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::models::{
    CommonMistake, Definition, EnrichmentContent, ExtractedWord, FeedbackResult, GenerationRequest,
    GenerationTask, GrammarSuggestion, MiniQuiz, MoreExamples, QuizQuestion, Rubric, SimpleExplanation,
    TaskKind, Tone,
};

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

// **Corrected:** text / - score = 85 / "tone": "Neutral", / 'tone': 'Neutral',
static KEY_VALUE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[\s>*#\-\d.)]*["']?([A-Za-z][A-Za-z _\-]{0,40}?)["']?\s*\**\s*[:=]\s*\**\s*(.*?)\s*,?\s*$"#)
        .unwrap()
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());

static SCORE_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:score|fluency)\D{0,20}?(\d{1,3}(?:\.\d+)?)").unwrap());

static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]+|\d+[.)])\s*").unwrap());

static LETTER_ANSWER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:option\s+)?\(?([a-j])\)?[.):]?(?:\s|$)").unwrap());

/// 解析结果的可信度，只出现在日志中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseQuality {
    Structured,
    KeyValue,
    Fallback,
}

impl ParseQuality {
    pub fn is_degraded(&self) -> bool {
        *self != ParseQuality::Structured
    }
}

impl fmt::Display for ParseQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseQuality::Structured => write!(f, "structured"),
            ParseQuality::KeyValue => write!(f, "key_value"),
            ParseQuality::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub quality: ParseQuality,
}

impl<T> Parsed<T> {
    fn new(task: TaskKind, value: T, quality: ParseQuality) -> Self {
        if quality.is_degraded() {
            warn!(task = %task, quality = %quality, "模型输出不是合法 JSON，已降级解析");
        }
        Self { value, quality }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed {
            value: f(self.value),
            quality: self.quality,
        }
    }
}

/// 任意任务的解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Feedback(FeedbackResult),
    Enrichment(EnrichmentContent),
    Explanation(SimpleExplanation),
    Examples(MoreExamples),
    Quiz(MiniQuiz),
}

pub fn parse(raw: &str, request: &GenerationRequest) -> Parsed<TaskOutput> {
    match &request.task {
        GenerationTask::AnalyzeEntry => parse_feedback(raw).map(TaskOutput::Feedback),
        GenerationTask::EnrichVocabulary => parse_enrichment(raw).map(TaskOutput::Enrichment),
        GenerationTask::ExplainSimply => parse_explanation(raw).map(TaskOutput::Explanation),
        GenerationTask::MoreExamples { existing_examples, .. } => {
            parse_examples(raw, existing_examples).map(TaskOutput::Examples)
        }
        GenerationTask::MiniQuiz { .. } => parse_quiz(raw, &request.input).map(TaskOutput::Quiz),
    }
}

// ============ 字段别名 ============

const CORRECTED: &[&str] = &["corrected", "corrected_text", "correction"];
const REWRITTEN: &[&str] = &["rewritten", "rewrite", "rewritten_text", "fluent_rewrite", "native_rewrite"];
const SCORE: &[&str] = &["score", "fluency_score", "overall_score"];
const TONE: &[&str] = &["tone", "tone_analysis"];
const TRANSLATION: &[&str] = &["translation", "english_translation", "target_language_translation"];
const EXPLANATION: &[&str] = &["explanation", "explanation_of_changes", "feedback"];
const RUBRIC: &[&str] = &["rubric", "scores"];
const SUGGESTIONS: &[&str] = &["grammar_suggestions", "suggestions"];
const NEW_WORDS: &[&str] = &["new_words", "extracted_words", "vocabulary"];

const FEEDBACK_KEYS: &[&[&str]] = &[
    CORRECTED, REWRITTEN, SCORE, TONE, TRANSLATION, EXPLANATION, RUBRIC, SUGGESTIONS, NEW_WORDS,
];

const EXAMPLE_SENTENCES: &[&str] = &["example_sentences", "ai_example_sentences", "examples"];
const DEFINITIONS: &[&str] = &["definitions", "ai_definitions", "definition"];
const SYNONYMS: &[&str] = &["synonyms", "ai_synonyms"];
const ANTONYMS: &[&str] = &["antonyms", "ai_antonyms"];
const RELATED_PHRASES: &[&str] = &["related_phrases", "ai_related_phrases", "collocations"];
const CONJUGATIONS: &[&str] = &[
    "conjugations",
    "ai_conjugations",
    "ai_conjugation_info",
    "conjugation_info",
    "conjugation_table",
];
const CULTURAL_NOTE: &[&str] = &["cultural_note", "ai_cultural_note", "cultural_notes"];
const PRONUNCIATION: &[&str] = &["pronunciation_guide", "ai_pronunciation_guide", "pronunciation"];
const ALTERNATIVE_FORMS: &[&str] = &["alternative_forms", "ai_alternative_forms"];
const COMMON_MISTAKES: &[&str] = &["common_mistakes", "ai_common_mistakes"];
const EMOTION_TONE: &[&str] = &["emotion_tone", "ai_emotion_tone"];
const MNEMONIC: &[&str] = &["mnemonic", "ai_mnemonic"];
const EMOJI: &[&str] = &["emoji", "ai_emoji"];

const ENRICHMENT_KEYS: &[&[&str]] = &[
    EXAMPLE_SENTENCES,
    DEFINITIONS,
    SYNONYMS,
    ANTONYMS,
    RELATED_PHRASES,
    CONJUGATIONS,
    CULTURAL_NOTE,
    PRONUNCIATION,
    ALTERNATIVE_FORMS,
    COMMON_MISTAKES,
    EMOTION_TONE,
    MNEMONIC,
    EMOJI,
];

const SIMPLE_EXPLANATION: &[&str] = &["explanation", "simple_explanation", "answer"];
const NEW_EXAMPLES: &[&str] = &["new_example_sentences", "example_sentences", "examples", "sentences"];
const QUIZ_TITLE: &[&str] = &["quiz_title", "title"];
const QUESTIONS: &[&str] = &["questions", "quiz"];

// ============ 各任务的解析 ============

pub fn parse_feedback(raw: &str) -> Parsed<FeedbackResult> {
    parse_tiers(raw, TaskKind::AnalyzeEntry, None, FEEDBACK_KEYS, feedback_from_object, feedback_heuristics)
}

pub fn parse_enrichment(raw: &str) -> Parsed<EnrichmentContent> {
    parse_tiers(
        raw,
        TaskKind::EnrichVocabulary,
        None,
        ENRICHMENT_KEYS,
        enrichment_from_object,
        |_| EnrichmentContent::default(),
    )
}

pub fn parse_explanation(raw: &str) -> Parsed<SimpleExplanation> {
    parse_tiers(
        raw,
        TaskKind::ExplainSimply,
        None,
        &[SIMPLE_EXPLANATION],
        |obj| SimpleExplanation {
            explanation: str_field(obj, SIMPLE_EXPLANATION),
        },
        // 没有结构时整段文本就是解释
        |text| SimpleExplanation {
            explanation: text.trim().to_string(),
        },
    )
}

/// 新例句会去掉与已有例句或彼此重复的句子（忽略首尾空白、句末标点和大小写）
pub fn parse_examples(raw: &str, existing: &[String]) -> Parsed<MoreExamples> {
    parse_tiers(
        raw,
        TaskKind::MoreExamples,
        Some(NEW_EXAMPLES[0]),
        &[NEW_EXAMPLES],
        |obj| list_field(obj, NEW_EXAMPLES),
        sentence_lines,
    )
    .map(|sentences| MoreExamples {
        new_example_sentences: dedupe_examples(sentences, existing),
    })
}

/// 题目少于两个选项的会被丢弃，正确答案下标总是落在 options 范围内
pub fn parse_quiz(raw: &str, term: &str) -> Parsed<MiniQuiz> {
    let default_title = format!("Mini quiz: {}", term.trim());
    parse_tiers(
        raw,
        TaskKind::MiniQuiz,
        Some(QUESTIONS[0]),
        &[QUIZ_TITLE, QUESTIONS],
        |obj| quiz_from_object(obj, &default_title),
        |_| MiniQuiz {
            quiz_title: default_title.clone(),
            questions: Vec::new(),
        },
    )
}

fn parse_tiers<T>(
    raw: &str,
    task: TaskKind,
    array_key: Option<&str>,
    known: &[&[&str]],
    from_object: impl Fn(&Map<String, Value>) -> T,
    fallback: impl FnOnce(&str) -> T,
) -> Parsed<T> {
    let text = strip_code_fences(raw);

    if let Some(obj) = structured_object(&text, array_key, known) {
        return Parsed::new(task, from_object(&obj), ParseQuality::Structured);
    }

    let pairs = key_values(&text);
    if has_known_key(&pairs, known) {
        return Parsed::new(task, from_object(&pairs), ParseQuality::KeyValue);
    }

    debug!(task = %task, "无法识别的输出: {}", text);
    Parsed::new(task, fallback(&text), ParseQuality::Fallback)
}

fn feedback_from_object(obj: &Map<String, Value>) -> FeedbackResult {
    // 键值对模式下 rubric 的三项直接出现在顶层
    let rubric = field(obj, RUBRIC).and_then(Value::as_object).unwrap_or(obj);

    FeedbackResult {
        corrected: str_field(obj, CORRECTED),
        rewritten: str_field(obj, REWRITTEN),
        score: score_field(obj, SCORE),
        tone: field(obj, TONE)
            .and_then(text)
            .map(|label| Tone::from_label(&label))
            .unwrap_or_default(),
        translation: str_field(obj, TRANSLATION),
        explanation: str_field(obj, EXPLANATION),
        rubric: Rubric {
            grammar: score_field(rubric, &["grammar", "grammar_score"]),
            vocabulary: score_field(rubric, &["vocabulary", "vocabulary_score"]),
            complexity: score_field(rubric, &["complexity", "complexity_score"]),
        },
        grammar_suggestions: object_list(obj, SUGGESTIONS)
            .map(|s| GrammarSuggestion {
                original: str_field(s, &["original", "original_text", "mistake"]),
                corrected: str_field(s, &["corrected", "correction", "suggestion"]),
                note: str_field(s, &["note", "explanation", "rule", "reason"]),
            })
            .filter(|s| !s.original.is_empty() || !s.corrected.is_empty())
            .collect(),
        extracted_words: object_list(obj, NEW_WORDS)
            .map(|w| ExtractedWord {
                term: str_field(w, &["term", "word"]),
                part_of_speech: str_field(w, &["pos", "part_of_speech"]),
                definition: str_field(w, &["definition", "meaning"]),
                reading: str_field(w, &["reading", "pronunciation"]),
                example: str_field(w, &["example", "example_sentence"]),
                proficiency: normalize_proficiency(&str_field(w, &["proficiency", "level"])),
            })
            .filter(|w| !w.term.is_empty())
            .collect(),
    }
}

fn feedback_heuristics(text: &str) -> FeedbackResult {
    let score = SCORE_HINT
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(clamp_score)
        .unwrap_or(0);

    FeedbackResult {
        corrected: first_sentence(text),
        score,
        ..Default::default()
    }
}

fn enrichment_from_object(obj: &Map<String, Value>) -> EnrichmentContent {
    let definitions = match field(obj, DEFINITIONS) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(d) => Some(Definition {
                    part_of_speech: str_field(d, &["part_of_speech", "pos"]),
                    definition: str_field(d, &["definition", "meaning"]),
                }),
                other => text(other).map(|definition| Definition {
                    part_of_speech: String::new(),
                    definition,
                }),
            })
            .filter(|d| !d.definition.is_empty())
            .collect(),
        Some(other) => text(other)
            .filter(|d| !d.is_empty())
            .map(|definition| {
                vec![Definition {
                    part_of_speech: String::new(),
                    definition,
                }]
            })
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let conjugations: BTreeMap<String, String> = field(obj, CONJUGATIONS)
        .and_then(Value::as_object)
        .map(|forms| {
            forms
                .iter()
                .filter_map(|(name, form)| text(form).map(|form| (name.clone(), form)))
                .filter(|(_, form)| !form.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let common_mistakes = match field(obj, COMMON_MISTAKES) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(m) => Some(CommonMistake {
                    mistake: str_field(m, &["mistake", "error"]),
                    correction: str_field(m, &["correction", "corrected"]),
                    explanation: str_field(m, &["explanation", "note"]),
                }),
                other => text(other).map(|mistake| CommonMistake {
                    mistake,
                    ..Default::default()
                }),
            })
            .filter(|m| !m.mistake.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    EnrichmentContent {
        example_sentences: list_field(obj, EXAMPLE_SENTENCES),
        definitions,
        synonyms: list_field(obj, SYNONYMS),
        antonyms: list_field(obj, ANTONYMS),
        related_phrases: list_field(obj, RELATED_PHRASES),
        conjugations,
        cultural_note: str_field(obj, CULTURAL_NOTE),
        pronunciation_guide: str_field(obj, PRONUNCIATION),
        alternative_forms: list_field(obj, ALTERNATIVE_FORMS),
        common_mistakes,
        emotion_tone: str_field(obj, EMOTION_TONE),
        mnemonic: str_field(obj, MNEMONIC),
        emoji: str_field(obj, EMOJI),
    }
}

fn quiz_from_object(obj: &Map<String, Value>, default_title: &str) -> MiniQuiz {
    let title = str_field(obj, QUIZ_TITLE);
    let questions = object_list(obj, QUESTIONS).filter_map(question_from_object).collect();

    MiniQuiz {
        quiz_title: if title.is_empty() { default_title.to_string() } else { title },
        questions,
    }
}

fn question_from_object(obj: &Map<String, Value>) -> Option<QuizQuestion> {
    let question_text = str_field(obj, &["question_text", "question", "text"]);
    let options: Vec<String> = match field(obj, &["options", "choices", "answers"]) {
        Some(Value::Array(items)) => items.iter().filter_map(item_text).collect(),
        // {"A": "...", "B": "..."}
        Some(Value::Object(map)) => map.values().filter_map(text).collect(),
        _ => Vec::new(),
    };
    let options: Vec<String> = options.into_iter().filter(|o| !o.is_empty()).collect();

    if question_text.is_empty() || options.len() < 2 {
        debug!("丢弃无效题目: {:?}", obj);
        return None;
    }

    let answer = field(
        obj,
        &["correct_answer_index", "correct_index", "answer_index", "correct_answer", "answer"],
    );
    let correct_answer_index = resolve_answer_index(answer, &options);
    let explanation = field(obj, &["explanation", "rationale"]).and_then(text).filter(|e| !e.is_empty());

    Some(QuizQuestion {
        question_text,
        options,
        correct_answer_index,
        explanation,
    })
}

/// 把各种形式的正确答案（下标、字母、数字字符串、答案原文）转成合法下标
fn resolve_answer_index(answer: Option<&Value>, options: &[String]) -> usize {
    let last = options.len().saturating_sub(1);
    let resolved = match answer {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.max(0.0) as usize),
        Some(Value::String(s)) => {
            let s = s.trim();
            let lower = s.to_lowercase();
            options
                .iter()
                .position(|o| o.trim().to_lowercase() == lower)
                .or_else(|| s.parse::<usize>().ok())
                .or_else(|| {
                    LETTER_ANSWER
                        .captures(s)
                        .map(|c| (c[1].to_ascii_lowercase().as_bytes()[0] - b'a') as usize)
                })
        }
        _ => None,
    };

    let index = resolved.unwrap_or(0);
    if index > last {
        debug!("正确答案下标 {} 越界，修正为 {}", index, last);
    }
    index.min(last)
}

fn sentence_key(sentence: &str) -> String {
    sentence
        .trim()
        .trim_end_matches(['.', '!', '?', '。', '！', '？'])
        .trim()
        .to_lowercase()
}

pub fn dedupe_examples(sentences: Vec<String>, existing: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = existing.iter().map(|e| sentence_key(e)).collect();
    sentences
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(sentence_key(s)))
        .collect()
}

// ============ 第一级：JSON ============

fn strip_code_fences(raw: &str) -> String {
    if let Some(caps) = CODE_FENCE.captures(raw) {
        return caps[1].trim().to_string();
    }
    let trimmed = raw.trim();
    // 截断时只有开头的 ```json
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split_once('\n').map(|(_, body)| body).unwrap_or("").trim().to_string();
    }
    trimmed.to_string()
}

// 依次尝试每个 `{` / `[` 起点，取第一个含已知字段的完整 JSON 值，前后的说明文字不影响
fn structured_object(text: &str, array_key: Option<&str>, known: &[&[&str]]) -> Option<Map<String, Value>> {
    let mut skip_until = 0;

    for (start, _) in text.char_indices().filter(|(_, c)| matches!(c, '{' | '[')) {
        if start < skip_until {
            continue;
        }
        let candidate = &text[start..];
        let value = match first_value(candidate) {
            Decoded::Complete(value) => Some(value),
            Decoded::Truncated => {
                // 截断的值一直延伸到文本末尾，补不全时后面的起点都在它内部
                skip_until = text.len();
                repair_truncated(candidate)
            }
            Decoded::Invalid => {
                // 括号成对但不是 JSON（例如正文里的 {说明}），里面的片段也不用再试
                if let Some(len) = balanced_len(candidate) {
                    skip_until = start + len;
                }
                None
            }
        };

        if let Some(obj) = value
            .and_then(|v| into_object(v, array_key))
            .filter(|obj| has_known_key(obj, known))
        {
            return Some(obj);
        }
    }
    None
}

enum Decoded {
    Complete(Value),
    /// 输出被 max_tokens 截断
    Truncated,
    Invalid,
}

fn first_value(text: &str) -> Decoded {
    match serde_json::Deserializer::from_str(text).into_iter::<Value>().next() {
        Some(Ok(value)) => Decoded::Complete(value),
        Some(Err(e)) if e.is_eof() => Decoded::Truncated,
        _ => {
            let cleaned = TRAILING_COMMA.replace_all(text, "$1");
            if cleaned.len() != text.len() {
                if let Some(Ok(value)) = serde_json::Deserializer::from_str(&cleaned).into_iter::<Value>().next() {
                    return Decoded::Complete(value);
                }
            }
            Decoded::Invalid
        }
    }
}

fn into_object(value: Value, array_key: Option<&str>) -> Option<Map<String, Value>> {
    match value {
        Value::Object(obj) => Some(obj),
        // 裸数组只在元素都是字符串或对象时才算数，避免把 [1] 这种正文当成结果
        Value::Array(items)
            if !items.is_empty() && items.iter().all(|v| v.is_string() || v.is_object()) =>
        {
            array_key.map(|key| {
                let mut obj = Map::new();
                obj.insert(key.to_string(), Value::Array(items));
                obj
            })
        }
        _ => None,
    }
}

// 补全括号后再试，失败就回退到上一个逗号
fn repair_truncated(candidate: &str) -> Option<Value> {
    let mut candidate = candidate;
    for _ in 0..5 {
        if let Some(value) = decode(&repair_truncated_json(candidate)) {
            debug!("截断的 JSON 已补全");
            return Some(value);
        }
        let cut = candidate.rfind(',')?;
        candidate = &candidate[..cut];
    }
    None
}

// 从开头的括号到与之配对的括号的字节长度，字符串里的括号不算
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn decode(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .or_else(|_| serde_json::from_str::<Value>(&TRAILING_COMMA.replace_all(text, "$1")))
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn repair_truncated_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        out.push(ch);
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
            }
            _ => {}
        }
    }

    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str("null");
    }

    while let Some(close) = closers.pop() {
        out.push(close);
    }
    out
}

// ============ 第二级：key: value ============

fn key_values(text: &str) -> Map<String, Value> {
    let mut pairs = Map::new();
    for caps in KEY_VALUE_LINE.captures_iter(text) {
        let key = normalize_key(&caps[1]);
        let value = caps[2].trim();
        if value.is_empty() || pairs.contains_key(&key) {
            continue;
        }
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(unquote(value).to_string()));
        pairs.insert(key, value);
    }
    pairs
}

// 'text' 或 "text" 去掉一对外层引号
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

// ============ 第三级：启发式 ============

// 只有 JSON 括号、逗号或代码块标记的行
fn is_delimiter_line(line: &str) -> bool {
    line.starts_with("```")
        || line
            .chars()
            .all(|c| c.is_whitespace() || matches!(c, '{' | '}' | '[' | ']' | ',' | ':' | '"' | '\'' | '`'))
}

fn first_sentence(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_delimiter_line(l))
        .unwrap_or("");
    let mut chars = line.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?' | '。' | '！' | '？') {
            // 全角句号后面不跟空格
            let at_boundary = !ch.is_ascii() || chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                return line[..i + ch.len_utf8()].to_string();
            }
        }
    }
    line.to_string()
}

// 每个非空行当作一个例句，去掉列表符号和引号，跳过 "Here are ...:" 这种引导语
fn sentence_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| BULLET.replace(line, "").trim().trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty() && !line.ends_with(':') && !is_delimiter_line(line))
        .collect()
}

// ============ 取值工具 ============

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '-'], "_")
}

fn has_known_key(obj: &Map<String, Value>, known: &[&[&str]]) -> bool {
    obj.keys().any(|k| {
        let k = normalize_key(k);
        known.iter().any(|aliases| aliases.contains(&k.as_str()))
    })
}

// 先按原样找，再忽略大小写和分隔符找
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .or_else(|| {
            obj.iter()
                .find(|(k, _)| keys.contains(&normalize_key(k).as_str()))
                .map(|(_, v)| v)
        })
        .filter(|v| !v.is_null())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn item_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => field(obj, &["sentence", "text", "example", "value"]).and_then(text),
        other => text(other),
    }
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> String {
    field(obj, keys).and_then(text).unwrap_or_default()
}

fn clamp_score(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn score_field(obj: &Map<String, Value>, keys: &[&str]) -> u8 {
    let number = match field(obj, keys) {
        Some(Value::Number(n)) => n.as_f64(),
        // "85/100"
        Some(Value::String(s)) => NUMBER.find(s).and_then(|m| m.as_str().parse::<f64>().ok()),
        _ => None,
    };
    number.map(clamp_score).unwrap_or(0)
}

fn list_field(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match field(obj, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(item_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(['\n', ';'])
            .map(|part| BULLET.replace(part, "").trim().trim_matches('"').trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn object_list<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> impl Iterator<Item = &'a Map<String, Value>> {
    field(obj, keys)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn normalize_proficiency(label: &str) -> String {
    let lower = label.trim().to_lowercase();
    let level = if lower.contains("begin") || lower.contains("basic") || matches!(lower.as_str(), "a1" | "a2") {
        "beginner"
    } else if lower.contains("inter") || matches!(lower.as_str(), "b1" | "b2") {
        "intermediate"
    } else if lower.contains("adv") || matches!(lower.as_str(), "c1" | "c2") {
        "advanced"
    } else {
        ""
    };
    level.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_FEEDBACK: &str = r#"```json
{
  "corrected": "Yo fui al parque ayer.",
  "rewritten": "Ayer fui al parque.",
  "score": 82,
  "tone": "reflective",
  "translation": "I went to the park yesterday.",
  "explanation": "Missing final period.",
  "rubric": {"grammar": 90, "vocabulary": 70, "complexity": 40},
  "grammar_suggestions": [{"original": "ayer", "corrected": "ayer.", "note": "punctuation"}],
  "new_words": [{"term": "parque", "pos": "noun", "definition": "park", "reading": "", "example": "El parque es grande.", "proficiency": "Beginner"}]
}
```"#;

    #[test]
    fn fenced_json_is_structured() {
        let parsed = parse_feedback(FULL_FEEDBACK);
        assert_eq!(parsed.quality, ParseQuality::Structured);

        let feedback = parsed.value;
        assert_eq!(feedback.corrected, "Yo fui al parque ayer.");
        assert_eq!(feedback.score, 82);
        assert_eq!(feedback.tone, Tone::Reflective);
        assert_eq!(feedback.rubric, Rubric { grammar: 90, vocabulary: 70, complexity: 40 });
        assert_eq!(feedback.grammar_suggestions.len(), 1);
        assert_eq!(feedback.extracted_words[0].part_of_speech, "noun");
        assert_eq!(feedback.extracted_words[0].proficiency, "beginner");
        assert_eq!(normalize_proficiency("Advanced"), "advanced");
        assert_eq!(normalize_proficiency("B2"), "intermediate");
        assert_eq!(normalize_proficiency("unknown"), "");
    }

    #[test]
    fn aliases_and_out_of_range_scores() {
        let raw = r#"Sure! {"corrected_text": "Hola.", "fluent_rewrite": "¡Hola!", "fluency_score": "140/100", "tone_analysis": "very confident", "rubric": {"grammar": -5}}"#;
        let feedback = parse_feedback(raw).value;
        assert_eq!(feedback.corrected, "Hola.");
        assert_eq!(feedback.rewritten, "¡Hola!");
        assert_eq!(feedback.score, 100);
        assert_eq!(feedback.tone, Tone::Confident);
        assert_eq!(feedback.rubric.grammar, 0);
    }

    #[test]
    fn truncated_json_is_repaired() {
        let raw = r#"{"corrected": "Hola amigo.", "score": 75, "explanation": "Good wo"#;
        let parsed = parse_feedback(raw);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.score, 75);
        assert_eq!(parsed.value.explanation, "Good wo");

        let cut_in_key = r#"{"corrected": "Hola.", "score": 60, "transl"#;
        let parsed = parse_feedback(cut_in_key);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.score, 60);
    }

    #[test]
    fn key_value_lines_are_second_tier() {
        let raw = "**Corrected:** Yo fui al parque ayer.\nScore: 85/100\nTone: Neutral\nGrammar: 80\nTranslation: I went to the park yesterday.";
        let parsed = parse_feedback(raw);
        assert_eq!(parsed.quality, ParseQuality::KeyValue);
        assert_eq!(parsed.value.corrected, "Yo fui al parque ayer.");
        assert_eq!(parsed.value.score, 85);
        assert_eq!(parsed.value.rubric.grammar, 80);
        assert_eq!(parsed.value.translation, "I went to the park yesterday.");
    }

    #[test]
    fn garbage_falls_back_to_heuristics() {
        let parsed = parse_feedback("Your sentence is nice. I would give it a score of 7 out of 10 overall");
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_eq!(parsed.value.corrected, "Your sentence is nice.");
        assert_eq!(parsed.value.score, 7);
        assert_eq!(parsed.value.tone, Tone::Neutral);

        for raw in ["", "   ", "{{{{", "]]", "```", "null", "42", "\u{0}\u{1}"] {
            let parsed = parse_feedback(raw);
            assert_eq!(parsed.quality, ParseQuality::Fallback, "{raw:?}");
            assert!(parsed.value.score <= 100);
        }
    }

    #[test]
    fn enrichment_accepts_prefixed_keys_and_loose_shapes() {
        let raw = r#"{
            "ai_example_sentences": ["Quiero comenzar hoy.", {"sentence": "Comenzamos mañana."}],
            "definitions": ["to begin", {"pos": "verb", "meaning": "to start"}],
            "synonyms": "empezar; iniciar",
            "conjugations": {"yo": "comienzo", "tú": "comienzas", "bad": null},
            "common_mistakes": [{"mistake": "comenzar de", "correction": "comenzar a", "explanation": "preposition"}],
            "emoji": "🚀"
        }"#;
        let parsed = parse_enrichment(raw);
        assert_eq!(parsed.quality, ParseQuality::Structured);

        let content = parsed.value;
        assert_eq!(content.example_sentences, vec!["Quiero comenzar hoy.", "Comenzamos mañana."]);
        assert_eq!(content.definitions.len(), 2);
        assert_eq!(content.definitions[1].part_of_speech, "verb");
        assert_eq!(content.synonyms, vec!["empezar", "iniciar"]);
        assert_eq!(content.conjugations.len(), 2);
        assert_eq!(content.common_mistakes[0].correction, "comenzar a");
        assert_eq!(content.emoji, "🚀");
        assert!(content.antonyms.is_empty());
    }

    #[test]
    fn unrelated_json_is_not_structured() {
        let parsed = parse_enrichment(r#"{"error": "model overloaded"}"#);
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_eq!(parsed.value, EnrichmentContent::default());
    }

    #[test]
    fn explanation_falls_back_to_raw_text() {
        let parsed = parse_explanation("  A cat is a small furry animal that says meow.  ");
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_eq!(parsed.value.explanation, "A cat is a small furry animal that says meow.");

        let parsed = parse_explanation(r#"{"explanation": "Like a dog, but smaller."}"#);
        assert_eq!(parsed.value.explanation, "Like a dog, but smaller.");
    }

    #[test]
    fn examples_are_deduplicated_against_existing() {
        let existing = vec!["Voy a comenzar".to_string()];
        let raw = r#"{"new_example_sentences": ["voy a comenzar ", "Voy a comenzar!", "Comenzamos a las ocho.", "comenzamos a las ocho", ""]}"#;
        let examples = parse_examples(raw, &existing).value.new_example_sentences;
        assert_eq!(examples, vec!["Comenzamos a las ocho."]);
    }

    #[test]
    fn examples_from_bare_array_and_bullets() {
        let parsed = parse_examples(r#"["Uno.", "Dos."]"#, &[]);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.new_example_sentences, vec!["Uno.", "Dos."]);

        let parsed = parse_examples("Here are some examples:\n1. Empiezo hoy.\n- \"Comienza la clase.\"\n", &[]);
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_eq!(parsed.value.new_example_sentences, vec!["Empiezo hoy.", "Comienza la clase."]);
    }

    #[test]
    fn quiz_indices_are_repaired() {
        let raw = r#"{
            "quiz_title": "Gato",
            "questions": [
                {"question_text": "Q1", "options": ["a", "b", "c"], "correct_answer_index": 7},
                {"question_text": "Q2", "options": ["perro", "gato"], "correct_answer": "gato"},
                {"question_text": "Q3", "options": {"A": "x", "B": "y", "C": "z"}, "answer": "C"},
                {"question_text": "Q4", "options": ["only one"], "correct_answer_index": 0},
                {"question_text": "Q5", "options": ["x", "y"], "correct_answer_index": -3, "explanation": " "},
                {"question_text": "Q6", "options": ["x", "y"], "correct_answer_index": "1", "explanation": "because"}
            ]
        }"#;
        let quiz = parse_quiz(raw, "gato").value;

        assert_eq!(quiz.quiz_title, "Gato");
        let indices: Vec<usize> = quiz.questions.iter().map(|q| q.correct_answer_index).collect();
        assert_eq!(indices, vec![2, 1, 2, 0, 1]);
        assert!(quiz.questions.iter().all(|q| q.correct_answer_index < q.options.len()));
        assert_eq!(quiz.questions[3].explanation, None);
        assert_eq!(quiz.questions[4].explanation.as_deref(), Some("because"));
    }

    #[test]
    fn quiz_garbage_gets_default_title() {
        let parsed = parse_quiz("I cannot make a quiz right now.", "gato");
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_eq!(parsed.value.quiz_title, "Mini quiz: gato");
        assert!(parsed.value.questions.is_empty());
    }

    #[test]
    fn dispatcher_follows_request_task() {
        let request = GenerationRequest::new(
            GenerationTask::MoreExamples {
                existing_examples: vec!["Uno.".to_string()],
                level: "intermediate".to_string(),
                count: 3,
            },
            "uno",
            "Spanish",
        );
        match parse(r#"["Uno.", "Dos."]"#, &request).value {
            TaskOutput::Examples(examples) => assert_eq!(examples.new_example_sentences, vec!["Dos."]),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn first_sentence_stops_at_terminator() {
        assert_eq!(first_sentence("\n  Hola mundo. Adiós."), "Hola mundo.");
        assert_eq!(first_sentence("v1.2 is out"), "v1.2 is out");
        assert_eq!(first_sentence("今日は晴れ。明日は雨"), "今日は晴れ。");
    }

    #[test]
    fn braces_in_surrounding_prose_keep_every_field() {
        let raw = "Analysis of {Yo fui al parque ayer}:\n{\"corrected\": \"Yo fui al parque ayer.\", \"score\": 80, \"tone\": \"Confident\", \"translation\": \"I went to the park yesterday.\"}";
        let parsed = parse_feedback(raw);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.corrected, "Yo fui al parque ayer.");
        assert_eq!(parsed.value.score, 80);
        assert_eq!(parsed.value.tone, Tone::Confident);
        assert_eq!(parsed.value.translation, "I went to the park yesterday.");

        let raw = "{\"corrected\": \"Hola.\", \"score\": 70, \"tone\": \"Confident\"}\nNote: I kept the {placeholder} style.";
        let parsed = parse_feedback(raw);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.score, 70);
        assert_eq!(parsed.value.tone, Tone::Confident);
    }

    #[test]
    fn nested_objects_are_not_mistaken_for_the_result() {
        // 外层不是合法 JSON 时不退而求其次用里面的建议对象
        let broken = r#"{"corrected": "x", "grammar_suggestions": [{"original": "a", "corrected": "b"}], oops}"#;
        let parsed = parse_feedback(broken);
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_ne!(parsed.value.corrected, "b");

        let truncated = r#"{"corrected": "Hola.", "grammar_suggestions": [{"original": "a", "corrected": "b"}], "new_words": [{"term": "ho"#;
        let parsed = parse_feedback(truncated);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.corrected, "Hola.");
        assert_eq!(parsed.value.grammar_suggestions[0].corrected, "b");
        assert_eq!(parsed.value.extracted_words[0].term, "ho");
    }

    #[test]
    fn single_quoted_lines_are_key_values() {
        let raw = "{\n  'corrected': 'Yo fui al parque ayer.',\n  'score': 85,\n  'tone': 'Reflective'\n}";
        let parsed = parse_feedback(raw);
        assert_eq!(parsed.quality, ParseQuality::KeyValue);
        assert_eq!(parsed.value.corrected, "Yo fui al parque ayer.");
        assert_eq!(parsed.value.score, 85);
        assert_eq!(parsed.value.tone, Tone::Reflective);
    }

    #[test]
    fn delimiter_lines_never_become_text() {
        let parsed = parse_feedback("```json\n{\n");
        assert_eq!(parsed.quality, ParseQuality::Fallback);
        assert_eq!(parsed.value.corrected, "");

        let parsed = parse_feedback("{\nNice work overall. Keep going.");
        assert_eq!(parsed.value.corrected, "Nice work overall.");

        let parsed = parse_examples("[\n- Empiezo hoy.\n]", &[]);
        assert_eq!(parsed.value.new_example_sentences, vec!["Empiezo hoy."]);
    }

    #[test]
    fn conjugation_info_alias() {
        let parsed = parse_enrichment(r#"{"ai_conjugation_info": {"yo": "como", "tú": "comes"}}"#);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.conjugations["yo"], "como");
        assert_eq!(parsed.value.conjugations.len(), 2);
    }

    #[test]
    fn numeric_arrays_in_prose_are_skipped() {
        let parsed = parse_examples("Step [1] done.\n[\"Uno.\"]", &[]);
        assert_eq!(parsed.quality, ParseQuality::Structured);
        assert_eq!(parsed.value.new_example_sentences, vec!["Uno."]);
    }
}
