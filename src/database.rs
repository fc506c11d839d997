use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use std::path::Path;
use tracing::{debug, info};

use crate::config::Config;
use crate::enrichment::{EnrichmentStore, VocabularyLookup};
use crate::language::language_code;
use crate::models::*;

pub struct DatabaseManager {
    pool: SqlitePool,
}

// enrichment_cache 的一行，列表字段以 JSON 文本存储
#[derive(sqlx::FromRow)]
struct CacheRow {
    id: i64,
    vocabulary_item_id: i64,
    language: String,
    example_sentences: String,
    definitions: String,
    synonyms: String,
    antonyms: String,
    related_phrases: String,
    conjugations: String,
    cultural_note: String,
    pronunciation_guide: String,
    alternative_forms: String,
    common_mistakes: String,
    emotion_tone: String,
    mnemonic: String,
    emoji: String,
    source_provider: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CacheRow> for EnrichmentCacheEntry {
    type Error = anyhow::Error;

    fn try_from(row: CacheRow) -> Result<Self> {
        Ok(EnrichmentCacheEntry {
            id: row.id,
            vocabulary_item_id: row.vocabulary_item_id,
            language: row.language,
            content: EnrichmentContent {
                example_sentences: from_json(&row.example_sentences)?,
                definitions: from_json(&row.definitions)?,
                synonyms: from_json(&row.synonyms)?,
                antonyms: from_json(&row.antonyms)?,
                related_phrases: from_json(&row.related_phrases)?,
                conjugations: from_json(&row.conjugations)?,
                cultural_note: row.cultural_note,
                pronunciation_guide: row.pronunciation_guide,
                alternative_forms: from_json(&row.alternative_forms)?,
                common_mistakes: from_json(&row.common_mistakes)?,
                emotion_tone: row.emotion_tone,
                mnemonic: row.mnemonic,
                emoji: row.emoji,
            },
            source_provider: row.source_provider,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JournalRow {
    id: i64,
    user_id: i64,
    content: String,
    language: String,
    feedback_json: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = anyhow::Error;

    fn try_from(row: JournalRow) -> Result<Self> {
        Ok(JournalEntry {
            id: row.id,
            user_id: row.user_id,
            content: row.content,
            language: row.language,
            feedback: from_json(&row.feedback_json)?,
            created_at: row.created_at,
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("序列化失败")
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("数据库中的 JSON 无法解析: {}", text))
}

const VOCABULARY_COLUMNS: &str =
    "id, user_id, term, language, part_of_speech, definition, reading, example, status, entry_id, created_at";

impl DatabaseManager {
    pub async fn new(config: &Config) -> Result<Self> {
        let db_path = std::env::current_dir()?.join(&config.database.db_file);
        Self::open(&db_path).await
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        info!("💾 连接数据库: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("无法打开数据库 {}", db_path.display()))?;

        let manager = DatabaseManager { pool };
        manager.initialize_tables().await?;

        Ok(manager)
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS journal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                language TEXT NOT NULL,
                feedback_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vocabulary_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                term TEXT NOT NULL,
                language TEXT NOT NULL,
                part_of_speech TEXT NOT NULL DEFAULT '',
                definition TEXT NOT NULL DEFAULT '',
                reading TEXT NOT NULL DEFAULT '',
                example TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'new',
                entry_id INTEGER REFERENCES journal_entries(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, term, language)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrichment_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vocabulary_item_id INTEGER NOT NULL REFERENCES vocabulary_items(id) ON DELETE CASCADE,
                language TEXT NOT NULL,
                example_sentences TEXT NOT NULL DEFAULT '[]',
                definitions TEXT NOT NULL DEFAULT '[]',
                synonyms TEXT NOT NULL DEFAULT '[]',
                antonyms TEXT NOT NULL DEFAULT '[]',
                related_phrases TEXT NOT NULL DEFAULT '[]',
                conjugations TEXT NOT NULL DEFAULT '{}',
                cultural_note TEXT NOT NULL DEFAULT '',
                pronunciation_guide TEXT NOT NULL DEFAULT '',
                alternative_forms TEXT NOT NULL DEFAULT '[]',
                common_mistakes TEXT NOT NULL DEFAULT '[]',
                emotion_tone TEXT NOT NULL DEFAULT '',
                mnemonic TEXT NOT NULL DEFAULT '',
                emoji TEXT NOT NULL DEFAULT '',
                source_provider TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(vocabulary_item_id, language)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_journal_entries_user ON journal_entries(user_id, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ============ 日记 ============

    pub async fn save_entry(
        &self,
        user_id: i64,
        content: &str,
        language: &str,
        feedback: &FeedbackResult,
    ) -> Result<JournalEntry> {
        let language = language_code(language);
        let created_at = Utc::now();

        let id = sqlx::query(
            "INSERT INTO journal_entries (user_id, content, language, feedback_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(content)
        .bind(&language)
        .bind(to_json(feedback)?)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!("保存日记 {} (用户 {})", id, user_id);

        Ok(JournalEntry {
            id,
            user_id,
            content: content.to_string(),
            language,
            feedback: feedback.clone(),
            created_at,
        })
    }

    // 最新的在前
    pub async fn list_entries(&self, user_id: i64) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT id, user_id, content, language, feedback_json, created_at FROM journal_entries WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JournalEntry::try_from).collect()
    }

    // ============ 单词 ============

    /// 按 (user_id, term, language) 幂等保存；已存在时只补全空白字段
    pub async fn save_vocabulary(&self, item: &NewVocabularyItem) -> Result<VocabularyItem> {
        let term = item.term.trim();
        if term.is_empty() {
            anyhow::bail!("单词不能为空");
        }
        let language = language_code(&item.language);

        sqlx::query(
            r#"
            INSERT INTO vocabulary_items
                (user_id, term, language, part_of_speech, definition, reading, example, status, entry_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, term, language) DO UPDATE SET
                part_of_speech = CASE WHEN vocabulary_items.part_of_speech = '' THEN excluded.part_of_speech ELSE vocabulary_items.part_of_speech END,
                definition = CASE WHEN vocabulary_items.definition = '' THEN excluded.definition ELSE vocabulary_items.definition END,
                reading = CASE WHEN vocabulary_items.reading = '' THEN excluded.reading ELSE vocabulary_items.reading END,
                example = CASE WHEN vocabulary_items.example = '' THEN excluded.example ELSE vocabulary_items.example END,
                entry_id = COALESCE(vocabulary_items.entry_id, excluded.entry_id)
            "#,
        )
        .bind(item.user_id)
        .bind(term)
        .bind(&language)
        .bind(item.part_of_speech.trim())
        .bind(item.definition.trim())
        .bind(item.reading.trim())
        .bind(item.example.trim())
        .bind(STATUS_NEW)
        .bind(item.entry_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let saved = sqlx::query_as::<_, VocabularyItem>(&format!(
            "SELECT {VOCABULARY_COLUMNS} FROM vocabulary_items WHERE user_id = ? AND term = ? AND language = ?"
        ))
        .bind(item.user_id)
        .bind(term)
        .bind(&language)
        .fetch_one(&self.pool)
        .await?;

        debug!("保存单词 {} ({}) -> id {}", saved.term, saved.language, saved.id);
        Ok(saved)
    }

    /// 把一次日记分析抽取出的生词全部保存到用户的单词本
    pub async fn save_extracted_words(
        &self,
        user_id: i64,
        language: &str,
        words: &[ExtractedWord],
        entry_id: Option<i64>,
    ) -> Result<Vec<VocabularyItem>> {
        let mut saved = Vec::with_capacity(words.len());
        for word in words.iter().filter(|w| !w.term.trim().is_empty()) {
            let item = NewVocabularyItem::from_extracted(user_id, language, word, entry_id);
            saved.push(self.save_vocabulary(&item).await?);
        }
        info!("➕ 保存了 {} 个生词", saved.len());
        Ok(saved)
    }

    pub async fn get_vocabulary(&self, item_id: i64, user_id: i64) -> Result<Option<VocabularyItem>> {
        let item = sqlx::query_as::<_, VocabularyItem>(&format!(
            "SELECT {VOCABULARY_COLUMNS} FROM vocabulary_items WHERE id = ? AND user_id = ?"
        ))
        .bind(item_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    pub async fn list_vocabulary(&self, user_id: i64, language: Option<&str>) -> Result<Vec<VocabularyItem>> {
        let language = language.map(language_code);
        let items = sqlx::query_as::<_, VocabularyItem>(&format!(
            "SELECT {VOCABULARY_COLUMNS} FROM vocabulary_items WHERE user_id = ? AND (? IS NULL OR language = ?) ORDER BY id"
        ))
        .bind(user_id)
        .bind(&language)
        .bind(&language)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// 删除单词，它的扩展缓存随之级联删除；返回是否真的删除了
    pub async fn delete_vocabulary(&self, item_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vocabulary_items WHERE id = ? AND user_id = ?")
            .bind(item_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============ 扩展缓存 ============

    pub async fn get_enrichment(&self, vocabulary_item_id: i64, language: &str) -> Result<Option<EnrichmentCacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT * FROM enrichment_cache WHERE vocabulary_item_id = ? AND language = ?",
        )
        .bind(vocabulary_item_id)
        .bind(language_code(language))
        .fetch_optional(&self.pool)
        .await?;

        row.map(EnrichmentCacheEntry::try_from).transpose()
    }

    /// 唯一键冲突时覆盖内容，保留 created_at
    pub async fn upsert_enrichment(&self, row: &NewEnrichment) -> Result<EnrichmentCacheEntry> {
        let language = language_code(&row.language);
        let content = &row.content;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO enrichment_cache (
                vocabulary_item_id, language, example_sentences, definitions, synonyms, antonyms,
                related_phrases, conjugations, cultural_note, pronunciation_guide, alternative_forms,
                common_mistakes, emotion_tone, mnemonic, emoji, source_provider, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(vocabulary_item_id, language) DO UPDATE SET
                example_sentences = excluded.example_sentences,
                definitions = excluded.definitions,
                synonyms = excluded.synonyms,
                antonyms = excluded.antonyms,
                related_phrases = excluded.related_phrases,
                conjugations = excluded.conjugations,
                cultural_note = excluded.cultural_note,
                pronunciation_guide = excluded.pronunciation_guide,
                alternative_forms = excluded.alternative_forms,
                common_mistakes = excluded.common_mistakes,
                emotion_tone = excluded.emotion_tone,
                mnemonic = excluded.mnemonic,
                emoji = excluded.emoji,
                source_provider = excluded.source_provider,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.vocabulary_item_id)
        .bind(&language)
        .bind(to_json(&content.example_sentences)?)
        .bind(to_json(&content.definitions)?)
        .bind(to_json(&content.synonyms)?)
        .bind(to_json(&content.antonyms)?)
        .bind(to_json(&content.related_phrases)?)
        .bind(to_json(&content.conjugations)?)
        .bind(&content.cultural_note)
        .bind(&content.pronunciation_guide)
        .bind(to_json(&content.alternative_forms)?)
        .bind(to_json(&content.common_mistakes)?)
        .bind(&content.emotion_tone)
        .bind(&content.mnemonic)
        .bind(&content.emoji)
        .bind(&row.source_provider)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!("缓存扩展信息: 单词 {} ({})", row.vocabulary_item_id, language);

        self.get_enrichment(row.vocabulary_item_id, &language)
            .await?
            .context("写入后找不到扩展缓存")
    }

    pub async fn count_enrichments(&self, vocabulary_item_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrichment_cache WHERE vocabulary_item_id = ?")
            .bind(vocabulary_item_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[async_trait]
impl VocabularyLookup for DatabaseManager {
    async fn get_item(&self, item_id: i64, user_id: i64) -> Result<Option<VocabularyItem>> {
        self.get_vocabulary(item_id, user_id).await
    }

    async fn list_items(&self, user_id: i64, language: Option<&str>) -> Result<Vec<VocabularyItem>> {
        self.list_vocabulary(user_id, language).await
    }
}

#[async_trait]
impl EnrichmentStore for DatabaseManager {
    async fn get(&self, vocabulary_item_id: i64, language: &str) -> Result<Option<EnrichmentCacheEntry>> {
        self.get_enrichment(vocabulary_item_id, language).await
    }

    async fn upsert(&self, row: &NewEnrichment) -> Result<EnrichmentCacheEntry> {
        self.upsert_enrichment(row).await
    }
}
