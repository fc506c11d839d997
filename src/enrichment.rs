// 并发未命中时可能重复生成，唯一键保证只存一行

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyzer::FeedbackEngine;
use crate::error::EnrichmentError;
use crate::language::language_code;
use crate::models::{EnrichmentCacheEntry, NewEnrichment, VocabularyItem};

/// 按所有者查询单词，查不到或不属于该用户都返回 `None`
#[async_trait]
pub trait VocabularyLookup: Send + Sync {
    async fn get_item(&self, item_id: i64, user_id: i64) -> Result<Option<VocabularyItem>>;

    async fn list_items(&self, user_id: i64, language: Option<&str>) -> Result<Vec<VocabularyItem>>;
}

#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    async fn get(&self, vocabulary_item_id: i64, language: &str) -> Result<Option<EnrichmentCacheEntry>>;

    /// 按 (vocabulary_item_id, language) 插入或覆盖，返回存储后的行
    async fn upsert(&self, row: &NewEnrichment) -> Result<EnrichmentCacheEntry>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    CacheHit,
    Stored,
    /// 生成质量不够，没有写入缓存
    Unsaved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub cached: usize,
    pub generated: usize,
    pub unsaved: usize,
    pub failed: usize,
}

pub struct EnrichmentManager {
    engine: Arc<FeedbackEngine>,
    vocabulary: Arc<dyn VocabularyLookup>,
    cache: Arc<dyn EnrichmentStore>,
}

impl EnrichmentManager {
    pub fn new(
        engine: Arc<FeedbackEngine>,
        vocabulary: Arc<dyn VocabularyLookup>,
        cache: Arc<dyn EnrichmentStore>,
    ) -> Self {
        Self { engine, vocabulary, cache }
    }

    /// 命中缓存且不强制刷新时直接返回，不调用任何 provider。
    ///
    /// 占位内容或启发式解析的结果不会写入缓存：已有缓存行时返回旧行，
    /// 否则返回一个 `id == 0` 的未保存记录。
    pub async fn get_or_generate(
        &self,
        user_id: i64,
        item_id: i64,
        language: &str,
        force_refresh: bool,
    ) -> Result<EnrichmentCacheEntry, EnrichmentError> {
        let item = self
            .vocabulary
            .get_item(item_id, user_id)
            .await?
            .ok_or(EnrichmentError::NotFound { item_id, user_id })?;

        let (entry, _) = self.resolve(&item, language, force_refresh).await?;
        Ok(entry)
    }

    async fn resolve(
        &self,
        item: &VocabularyItem,
        language: &str,
        force_refresh: bool,
    ) -> Result<(EnrichmentCacheEntry, Outcome)> {
        let language = if language.trim().is_empty() { item.language.as_str() } else { language };
        let code = language_code(language);

        let existing = self.cache.get(item.id, &code).await?;
        if !force_refresh {
            if let Some(entry) = existing {
                info!(item_id = item.id, language = %code, "扩展信息缓存命中");
                return Ok((entry, Outcome::CacheHit));
            }
        }

        info!(item_id = item.id, language = %code, force_refresh, "生成扩展信息: {}", item.term);
        let context = Some(item.example.as_str()).filter(|e| !e.trim().is_empty());
        let generated = self.engine.enrich_term(&item.term, &code, context).await;

        if generated.is_degraded() {
            warn!(
                item_id = item.id,
                provider = %generated.provider,
                quality = %generated.quality,
                "扩展信息质量不足，不写入缓存"
            );
            if let Some(entry) = existing {
                return Ok((entry, Outcome::Unsaved));
            }
            let now = Utc::now();
            let entry = EnrichmentCacheEntry {
                id: 0,
                vocabulary_item_id: item.id,
                language: code,
                content: generated.value,
                source_provider: generated.provider,
                created_at: now,
                updated_at: now,
            };
            return Ok((entry, Outcome::Unsaved));
        }

        let stored = self
            .cache
            .upsert(&NewEnrichment {
                vocabulary_item_id: item.id,
                language: code,
                content: generated.value,
                source_provider: generated.provider,
            })
            .await?;
        Ok((stored, Outcome::Stored))
    }

    /// 为用户在该语言下的所有单词补全扩展信息，单个失败只记录不中断
    pub async fn enrich_all(&self, user_id: i64, language: &str) -> Result<BatchSummary> {
        let code = language_code(language);
        let items = self.vocabulary.list_items(user_id, Some(&code)).await?;
        let concurrency = self.engine.config.processing.concurrent_requests.max(1);

        info!("📊 用户 {} 有 {} 个 {} 单词需要处理", user_id, items.len(), code);

        let outcomes: Vec<Result<Outcome>> = stream::iter(items.iter())
            .map(|item| {
                let code = &code;
                async move {
                    let result = self.resolve(item, code, false).await.map(|(_, outcome)| outcome);
                    if let Err(e) = &result {
                        warn!(item_id = item.id, "单词 {} 扩展失败: {:#}", item.term, e);
                    }
                    result
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = BatchSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in &outcomes {
            match outcome {
                Ok(Outcome::CacheHit) => summary.cached += 1,
                Ok(Outcome::Stored) => summary.generated += 1,
                Ok(Outcome::Unsaved) => summary.unsaved += 1,
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            "🎉 批量扩展完成: 共 {}，命中 {}，新生成 {}，未保存 {}，失败 {}",
            summary.total, summary.cached, summary.generated, summary.unsaved, summary.failed
        );
        Ok(summary)
    }
}
