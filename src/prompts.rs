use crate::models::{GenerationRequest, GenerationTask};

pub fn build(request: &GenerationRequest) -> String {
    let context = request.context.as_deref();
    match &request.task {
        GenerationTask::AnalyzeEntry => analyze_entry(&request.input, &request.language),
        GenerationTask::EnrichVocabulary => enrich_vocabulary(&request.input, &request.language, context),
        GenerationTask::ExplainSimply => explain_simply(&request.input, &request.language, context),
        GenerationTask::MoreExamples { existing_examples, level, count } => {
            more_examples(&request.input, &request.language, existing_examples, level, *count)
        }
        GenerationTask::MiniQuiz { num_questions, difficulty } => {
            mini_quiz(&request.input, &request.language, *num_questions, difficulty)
        }
    }
}

pub fn analyze_entry(text: &str, language: &str) -> String {
    format!(
        r#"You are an expert {language} tutor. Analyze the following journal entry written in {language} by a language learner.

Return ONLY a JSON object with exactly these fields:
{{
  "corrected": "the entry with grammar and spelling corrected",
  "rewritten": "a more natural, native-like rewrite of the entry",
  "score": 0,
  "tone": "Reflective | Confident | Neutral",
  "translation": "an English translation of the entry (French if the entry is already in English)",
  "explanation": "a brief explanation of the most important corrections",
  "rubric": {{ "grammar": 0, "vocabulary": 0, "complexity": 0 }},
  "grammar_suggestions": [
    {{ "original": "problematic snippet", "corrected": "corrected snippet", "note": "the rule or reason" }}
  ],
  "new_words": [
    {{ "term": "word", "pos": "noun", "definition": "short English definition", "reading": "pronunciation or reading", "example": "example sentence", "proficiency": "beginner | intermediate | advanced" }}
  ]
}}

Rules:
1. "score" and every rubric value are integers from 0 (beginner) to 100 (native-like).
2. "tone" must be exactly one of Reflective, Confident or Neutral.
3. Do not wrap the JSON in markdown code fences and do not add any other text.

Journal entry:
"""
{text}
"""
"#
    )
}

pub fn enrich_vocabulary(term: &str, language: &str, context: Option<&str>) -> String {
    let context_line = context
        .map(|c| format!("The learner met this term in the following context: \"{c}\"\n"))
        .unwrap_or_default();

    format!(
        r#"Provide comprehensive learner-oriented details for the {language} word or phrase "{term}".
{context_line}
Return ONLY a JSON object with these fields:
{{
  "example_sentences": ["3 natural example sentences in {language}"],
  "definitions": [{{ "part_of_speech": "noun", "definition": "English definition" }}],
  "synonyms": ["..."],
  "antonyms": ["..."],
  "related_phrases": ["common collocations or related phrases"],
  "conjugations": {{ "form name": "form" }},
  "cultural_note": "a cultural or usage insight",
  "pronunciation_guide": "IPA or a common transliteration",
  "alternative_forms": ["..."],
  "common_mistakes": [{{ "mistake": "...", "correction": "...", "explanation": "..." }}],
  "emotion_tone": "the feeling usually associated with the word",
  "mnemonic": "a short memory aid",
  "emoji": "one emoji for the concept"
}}

Use an empty list or empty object for anything that does not apply (for example "conjugations" for a noun).
Do not wrap the JSON in markdown code fences and do not add any other text.
"#
    )
}

pub fn explain_simply(term: &str, language: &str, context: Option<&str>) -> String {
    let context_line = context
        .map(|c| format!("It appeared in this context: \"{c}\"\n"))
        .unwrap_or_default();

    format!(
        r#"Explain the {language} term "{term}" as if you were talking to a curious 5-year-old.
{context_line}Use simple words, short sentences and an everyday analogy. Keep it short, accurate and encouraging.

Return ONLY a JSON object:
{{ "explanation": "your simple explanation in English" }}
"#
    )
}

pub fn more_examples(term: &str, language: &str, existing_examples: &[String], level: &str, count: usize) -> String {
    let avoid = if existing_examples.is_empty() {
        String::new()
    } else {
        let listed: Vec<String> = existing_examples.iter().map(|e| format!("- {e}")).collect();
        format!("Do NOT repeat or closely paraphrase these existing examples:\n{}\n", listed.join("\n"))
    };

    format!(
        r#"Generate {count} diverse, natural example sentences in {language} that use "{term}".
The sentences should suit a {level} learner and show different contexts (formal, informal, everyday).
{avoid}
Return ONLY a JSON object:
{{ "new_example_sentences": ["sentence 1", "sentence 2"] }}
"#
    )
}

pub fn mini_quiz(term: &str, language: &str, num_questions: usize, difficulty: &str) -> String {
    format!(
        r#"Create a mini quiz with {num_questions} multiple-choice questions about the {language} word "{term}". Difficulty: {difficulty}.
Vary the question types (meaning, usage, context, synonyms). Each question has 3 or 4 options with exactly one correct answer and plausible distractors.

Return ONLY a JSON object:
{{
  "quiz_title": "a short title",
  "questions": [
    {{
      "question_text": "...",
      "options": ["option A", "option B", "option C"],
      "correct_answer_index": 0,
      "explanation": "why the answer is correct"
    }}
  ]
}}
"correct_answer_index" is the 0-based index of the correct option.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_prompt_embeds_language_and_text() {
        let prompt = analyze_entry("Yo fui al parque ayer", "Spanish");
        assert!(prompt.contains("Spanish tutor"));
        assert!(prompt.contains("Yo fui al parque ayer"));
        assert!(prompt.contains("\"grammar_suggestions\""));
    }

    #[test]
    fn builders_are_total_for_empty_and_long_input() {
        let long = "palabra ".repeat(20_000);
        for input in ["", long.as_str()] {
            assert!(!analyze_entry(input, "Spanish").is_empty());
            assert!(!enrich_vocabulary(input, "", None).is_empty());
            assert!(!explain_simply(input, "Spanish", Some("")).is_empty());
            assert!(!more_examples(input, "Spanish", &[], "", 0).is_empty());
            assert!(!mini_quiz(input, "Spanish", 0, "").is_empty());
        }
    }

    #[test]
    fn more_examples_lists_existing_sentences() {
        let prompt = more_examples("comenzar", "Spanish", &["Voy a comenzar".to_string()], "intermediate", 3);
        assert!(prompt.contains("- Voy a comenzar"));
        assert!(prompt.contains("Generate 3"));
    }

    #[test]
    fn build_dispatches_on_task() {
        let request = GenerationRequest::new(
            GenerationTask::MiniQuiz { num_questions: 4, difficulty: "hard".into() },
            "gato",
            "Spanish",
        );
        let prompt = build(&request);
        assert!(prompt.contains("4 multiple-choice"));
        assert!(prompt.contains("Difficulty: hard"));
    }
}
