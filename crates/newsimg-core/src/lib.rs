//! Core domain model for news image discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "newsimg-core";

/// Schema version stamped on every persisted [`MetadataRecord`].
pub const SCHEMA_VERSION: u32 = 1;

/// Region id assigned when no taxonomy keyword matches an article.
pub const UNCLASSIFIED_REGION: &str = "unclassified";

/// Optional fields pre-extracted by the upstream feed reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeedFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub enclosure_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Immutable article handoff from the feed collaborator into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDescriptor {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub feed_fields: FeedFields,
}

impl ArticleDescriptor {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            published_at: None,
            feed_fields: FeedFields::default(),
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.feed_fields.summary.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Html,
    Feed,
}

/// Body retrieved for one article. Owned by a single pipeline job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub final_url: String,
    pub body: String,
    pub payload_kind: PayloadKind,
    pub http_status: u16,
    pub fetched_at: DateTime<Utc>,
    pub used_fallback_variant: bool,
}

/// Extraction strategies, declared in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    FeedEmbedded,
    MetaTag,
    SemanticSelector,
    BackgroundImage,
    TextPattern,
    ExternalApi,
}

impl StrategyName {
    pub const ALL: [StrategyName; 6] = [
        StrategyName::FeedEmbedded,
        StrategyName::MetaTag,
        StrategyName::SemanticSelector,
        StrategyName::BackgroundImage,
        StrategyName::TextPattern,
        StrategyName::ExternalApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::FeedEmbedded => "feed-embedded",
            StrategyName::MetaTag => "meta-tag",
            StrategyName::SemanticSelector => "semantic-selector",
            StrategyName::BackgroundImage => "background-image",
            StrategyName::TextPattern => "text-pattern",
            StrategyName::ExternalApi => "external-api",
        }
    }

    /// Fixed prior confidence for candidates produced by this strategy.
    pub fn base_confidence(&self) -> f64 {
        match self {
            StrategyName::FeedEmbedded => 0.9,
            StrategyName::MetaTag => 0.85,
            StrategyName::SemanticSelector => 0.7,
            StrategyName::BackgroundImage => 0.55,
            StrategyName::TextPattern => 0.4,
            StrategyName::ExternalApi => 0.8,
        }
    }

    /// Strategies that cost nothing to run. The external API is never implied.
    pub fn free_strategies() -> BTreeSet<StrategyName> {
        Self::ALL
            .into_iter()
            .filter(|s| *s != StrategyName::ExternalApi)
            .collect()
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw hints carried by the markup an image was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub source_url: String,
    pub strategy: StrategyName,
    pub attributes: ImageAttributes,
    pub confidence: f64,
    pub discovered_at: DateTime<Utc>,
}

impl ImageCandidate {
    pub fn new(source_url: impl Into<String>, strategy: StrategyName, attributes: ImageAttributes) -> Self {
        Self {
            source_url: source_url.into(),
            strategy,
            attributes,
            confidence: strategy.base_confidence(),
            discovered_at: Utc::now(),
        }
    }
}

/// One image per canonical URL after cross-strategy merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupedImage {
    pub canonical_url: String,
    pub best_strategy: StrategyName,
    pub merged_confidence: f64,
    pub contributing_strategies: BTreeSet<StrategyName>,
    pub first_discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: ImageAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionTag {
    pub region_id: String,
    pub matched_keywords: Vec<String>,
    pub match_strength: f64,
}

impl RegionTag {
    pub fn unclassified() -> Self {
        Self {
            region_id: UNCLASSIFIED_REGION.to_string(),
            matched_keywords: Vec::new(),
            match_strength: 0.0,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.region_id == UNCLASSIFIED_REGION
    }
}

/// Stable identity of a ledger entry: same article, day and schema yield the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn for_article(article_url: &str, partition: NaiveDate, schema_version: u32) -> Self {
        let key = format!("{article_url}#{partition}#v{schema_version}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Write-once ledger entry for one article in one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub record_id: RecordId,
    pub article_url: String,
    #[serde(default)]
    pub title: String,
    pub images: Vec<DedupedImage>,
    pub region_tags: Vec<RegionTag>,
    pub strategy_success_counts: BTreeMap<StrategyName, usize>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl MetadataRecord {
    pub fn new(
        descriptor: &ArticleDescriptor,
        images: Vec<DedupedImage>,
        region_tags: Vec<RegionTag>,
        strategy_success_counts: BTreeMap<StrategyName, usize>,
        created_at: DateTime<Utc>,
        schema_version: u32,
    ) -> Self {
        Self {
            record_id: RecordId::for_article(&descriptor.url, created_at.date_naive(), schema_version),
            article_url: descriptor.url.clone(),
            title: descriptor.title.clone(),
            images,
            region_tags,
            strategy_success_counts,
            created_at,
            schema_version,
        }
    }

    pub fn partition_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    /// Strongest region tag, or `unclassified` when the record carries none.
    pub fn primary_region(&self) -> &str {
        self.region_tags
            .first()
            .map(|t| t.region_id.as_str())
            .unwrap_or(UNCLASSIFIED_REGION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStage {
    Pending,
    Fetching,
    Extracting,
    Deduplicating,
    Classifying,
    Persisting,
    Persisted,
}

impl fmt::Display for ArticleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArticleStage::Pending => "pending",
            ArticleStage::Fetching => "fetching",
            ArticleStage::Extracting => "extracting",
            ArticleStage::Deduplicating => "deduplicating",
            ArticleStage::Classifying => "classifying",
            ArticleStage::Persisting => "persisting",
            ArticleStage::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    HttpError,
    AllVariantsExhausted,
    InvalidUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    IoFailure,
    SerializationFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Fetch { error: FetchErrorKind, message: String },
    Store { error: StoreErrorKind, message: String },
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArticleStatus {
    Persisted {
        record_id: RecordId,
        image_count: usize,
        images_stored: usize,
    },
    Failed {
        stage: ArticleStage,
        reason: FailureReason,
    },
}

impl ArticleStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ArticleStatus::Persisted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleOutcome {
    pub article_url: String,
    pub status: ArticleStatus,
    /// Strategies that yielded at least one candidate for this article.
    #[serde(default)]
    pub successful_strategies: BTreeSet<StrategyName>,
}

/// Aggregate returned to the scheduling collaborator after a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub per_strategy_success_counts: BTreeMap<StrategyName, usize>,
    pub images_downloaded: usize,
    pub elapsed_ms: u64,
    pub outcomes: Vec<ArticleOutcome>,
}

impl BatchReport {
    pub fn record(&mut self, outcome: ArticleOutcome) {
        self.attempted += 1;
        match &outcome.status {
            ArticleStatus::Persisted { images_stored, .. } => {
                self.succeeded += 1;
                self.images_downloaded += images_stored;
            }
            ArticleStatus::Failed { .. } => self.failed += 1,
        }
        for strategy in &outcome.successful_strategies {
            *self.per_strategy_success_counts.entry(*strategy).or_default() += 1;
        }
        self.outcomes.push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_order_matches_priority() {
        let mut sorted = StrategyName::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, StrategyName::ALL.to_vec());
        assert!(!StrategyName::free_strategies().contains(&StrategyName::ExternalApi));
        assert_eq!(StrategyName::free_strategies().len(), 5);
    }

    #[test]
    fn strategy_names_serialize_kebab_case() {
        let json = serde_json::to_string(&StrategyName::SemanticSelector).unwrap();
        assert_eq!(json, "\"semantic-selector\"");
        let mut counts = BTreeMap::new();
        counts.insert(StrategyName::MetaTag, 2usize);
        assert_eq!(serde_json::to_string(&counts).unwrap(), r#"{"meta-tag":2}"#);
    }

    #[test]
    fn record_id_is_deterministic_per_day_and_schema() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let a = RecordId::for_article("https://news.example/a", day, 1);
        let b = RecordId::for_article("https://news.example/a", day, 1);
        let next_day = RecordId::for_article("https://news.example/a", day.succ_opt().unwrap(), 1);
        let next_schema = RecordId::for_article("https://news.example/a", day, 2);
        assert_eq!(a, b);
        assert_ne!(a, next_day);
        assert_ne!(a, next_schema);
    }

    #[test]
    fn batch_report_counts_outcomes() {
        let mut report = BatchReport::default();
        report.record(ArticleOutcome {
            article_url: "https://a".into(),
            status: ArticleStatus::Persisted {
                record_id: RecordId(Uuid::nil()),
                image_count: 2,
                images_stored: 2,
            },
            successful_strategies: [StrategyName::MetaTag, StrategyName::FeedEmbedded]
                .into_iter()
                .collect(),
        });
        report.record(ArticleOutcome {
            article_url: "https://b".into(),
            status: ArticleStatus::Failed {
                stage: ArticleStage::Fetching,
                reason: FailureReason::DeadlineExceeded,
            },
            successful_strategies: BTreeSet::new(),
        });
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.images_downloaded, 2);
        assert_eq!(report.per_strategy_success_counts.get(&StrategyName::MetaTag), Some(&1));
    }

    #[test]
    fn primary_region_falls_back_to_unclassified() {
        let descriptor = ArticleDescriptor::new("https://news.example/a", "Title");
        let record = MetadataRecord::new(
            &descriptor,
            Vec::new(),
            Vec::new(),
            BTreeMap::new(),
            Utc::now(),
            SCHEMA_VERSION,
        );
        assert_eq!(record.primary_region(), UNCLASSIFIED_REGION);
    }
}
