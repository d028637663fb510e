//! Batch orchestration: configuration, cross-strategy deduplication, regional
//! classification and the per-article state machine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use newsimg_core::{
    ArticleDescriptor, ArticleOutcome, ArticleStage, ArticleStatus, BatchReport, DedupedImage,
    FailureReason, ImageCandidate, MetadataRecord, RegionTag, StrategyName, SCHEMA_VERSION,
};
use newsimg_storage::{
    download_image, BackoffPolicy, Fetcher, HostRateLimiter, HttpClientConfig, HttpTransport,
    ImageStore, MetadataLedger, ReqwestTransport,
};
use newsimg_strategies::{
    canonicalize_image_url, ExternalApiStrategy, ExtractionInput, ImageSearchCredentials, StrategyChain,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "newsimg-pipeline";

const MAX_CONCURRENCY: usize = 32;

/// Region id -> keywords. Keyword order is preserved in `RegionTag::matched_keywords`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionTaxonomy {
    regions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegionRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    regions: Vec<RegionRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegionRule {
    region_id: String,
    contains_any: Vec<String>,
}

impl RegionTaxonomy {
    pub fn new(regions: BTreeMap<String, Vec<String>>) -> Self {
        Self { regions }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(id, keywords)| (id.to_string(), keywords.iter().map(|k| k.to_string()).collect()))
                .collect(),
        )
    }

    /// Load a `rules/regions.yaml`-style file (`version` + `regions: [{region_id, contains_any}]`).
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let file: RegionRulesFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let mut regions = BTreeMap::new();
        for rule in file.regions {
            let keywords: &mut Vec<String> = regions.entry(rule.region_id).or_default();
            for keyword in rule.contains_any {
                if !keywords.contains(&keyword) {
                    keywords.push(keyword);
                }
            }
        }
        Ok(Self { regions })
    }

    pub fn regions(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.regions.iter().map(|(id, kws)| (id.as_str(), kws.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for RegionTaxonomy {
    fn default() -> Self {
        Self::from_pairs([
            (
                "african",
                &[
                    "africa", "african", "nigeria", "lagos", "abuja", "ghana", "accra", "kenya", "nairobi",
                    "ethiopia", "addis ababa", "senegal", "dakar", "uganda", "kampala", "tanzania", "rwanda",
                    "kigali", "cameroon", "congo", "kinshasa", "zimbabwe", "johannesburg", "cape town",
                ][..],
            ),
            (
                "afro_latino",
                &[
                    "afro-latino", "afro-latina", "afro-latinx", "afro-latin", "afro-brazilian",
                    "afro-colombian", "afro-cuban", "afro-peruvian", "afro-mexican", "garifuna",
                    "quilombo", "bahia", "palenque",
                ][..],
            ),
            (
                "caribbean",
                &[
                    "caribbean", "jamaica", "kingston", "haiti", "port-au-prince", "trinidad", "tobago",
                    "barbados", "bahamas", "dominican republic", "puerto rico", "cuba", "havana", "grenada",
                    "st. lucia", "guyana",
                ][..],
            ),
        ])
    }
}

/// Per-run options. Every field has a default so a YAML file may set any subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target_images_per_article: usize,
    pub concurrency: usize,
    pub rate_limit_per_host_ms: u64,
    pub min_confidence: f64,
    pub enabled_strategies: BTreeSet<StrategyName>,
    pub region_taxonomy: RegionTaxonomy,
    pub deadline_secs: Option<u64>,
    pub download_images: bool,
    pub max_image_bytes: usize,
    pub schema_version: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_images_per_article: 5,
            concurrency: 6,
            rate_limit_per_host_ms: 1000,
            min_confidence: 0.3,
            enabled_strategies: StrategyName::free_strategies(),
            region_taxonomy: RegionTaxonomy::default(),
            deadline_secs: None,
            download_images: true,
            max_image_bytes: 10 * 1024 * 1024,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("parsing pipeline config")?;
        Ok(config.normalized())
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Clamp out-of-range values instead of rejecting the run.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.clamp(1, MAX_CONCURRENCY);
        self.target_images_per_article = self.target_images_per_article.max(1);
        self.min_confidence = self.min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_per_host_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Process environment consulted by the binary; everything per-run lives in [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub image_search: Option<ImageSearchCredentials>,
}

impl RuntimeEnv {
    pub fn from_env() -> Self {
        Self {
            output_dir: std::env::var("NEWSIMG_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./output")),
            user_agent: std::env::var("NEWSIMG_USER_AGENT")
                .unwrap_or_else(|_| "newsimg-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("NEWSIMG_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            image_search: ImageSearchCredentials::from_parts(
                std::env::var("NEWSIMG_IMAGE_SEARCH_API_KEY").ok(),
                std::env::var("NEWSIMG_IMAGE_SEARCH_ENGINE_ID").ok(),
                std::env::var("NEWSIMG_IMAGE_SEARCH_ENDPOINT").ok(),
            ),
        }
    }

    pub fn ledger_dir(&self) -> PathBuf {
        ledger_dir(&self.output_dir)
    }
}

pub fn ledger_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("ledger")
}

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub min_confidence: f64,
    pub corroboration_boost: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            corroboration_boost: 0.1,
        }
    }
}

pub struct DedupEngine {
    config: DedupConfig,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Max of the contributing scores plus the boost per extra distinct strategy, capped at 1.0.
    pub fn merged_confidence(&self, best_score: f64, distinct_strategies: usize) -> f64 {
        let extra = distinct_strategies.saturating_sub(1) as f64;
        round3((best_score + self.config.corroboration_boost * extra).min(1.0))
    }

    pub fn dedupe(&self, candidates: &[ImageCandidate]) -> Vec<DedupedImage> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<&ImageCandidate>)> = Vec::new();
        for candidate in candidates {
            let canonical = canonicalize_image_url(&candidate.source_url);
            match index.get(&canonical) {
                Some(&i) => groups[i].1.push(candidate),
                None => {
                    index.insert(canonical.clone(), groups.len());
                    groups.push((canonical, vec![candidate]));
                }
            }
        }

        let mut images: Vec<DedupedImage> = groups
            .into_iter()
            .filter_map(|(canonical_url, members)| self.merge_group(canonical_url, &members))
            .filter(|img| img.merged_confidence >= self.config.min_confidence)
            .collect();

        images.sort_by(|a, b| {
            b.merged_confidence
                .total_cmp(&a.merged_confidence)
                .then(a.first_discovered_at.cmp(&b.first_discovered_at))
        });
        images
    }

    fn merge_group(&self, canonical_url: String, members: &[&ImageCandidate]) -> Option<DedupedImage> {
        let best = members.iter().copied().reduce(|best, c| {
            if c.confidence > best.confidence
                || (c.confidence == best.confidence && c.discovered_at < best.discovered_at)
            {
                c
            } else {
                best
            }
        })?;
        let contributing: BTreeSet<StrategyName> = members.iter().map(|c| c.strategy).collect();
        let first_discovered_at = members.iter().map(|c| c.discovered_at).min()?;

        let mut attributes = best.attributes.clone();
        for other in members {
            let hints = &other.attributes;
            attributes.alt = attributes.alt.or_else(|| hints.alt.clone());
            attributes.width = attributes.width.or(hints.width);
            attributes.height = attributes.height.or(hints.height);
            attributes.css_class = attributes.css_class.or_else(|| hints.css_class.clone());
        }

        Some(DedupedImage {
            canonical_url,
            best_strategy: best.strategy,
            merged_confidence: self.merged_confidence(best.confidence, contributing.len()),
            contributing_strategies: contributing,
            first_discovered_at,
            attributes,
            local_path: None,
        })
    }
}

pub struct RegionClassifier {
    taxonomy: RegionTaxonomy,
}

impl RegionClassifier {
    pub fn new(taxonomy: RegionTaxonomy) -> Self {
        Self { taxonomy }
    }

    /// Case-insensitive substring match of each region's keywords against the
    /// title, summary and image alt texts. Strongest match first.
    pub fn classify(&self, descriptor: &ArticleDescriptor, images: &[DedupedImage]) -> Vec<RegionTag> {
        let mut haystack = descriptor.title.to_lowercase();
        if let Some(summary) = descriptor.summary() {
            haystack.push(' ');
            haystack.push_str(&summary.to_lowercase());
        }
        for alt in images.iter().filter_map(|img| img.attributes.alt.as_deref()) {
            haystack.push(' ');
            haystack.push_str(&alt.to_lowercase());
        }

        let mut tags: Vec<RegionTag> = self
            .taxonomy
            .regions()
            .filter_map(|(region_id, keywords)| {
                let matched: Vec<String> = keywords
                    .iter()
                    .filter(|kw| !kw.trim().is_empty() && haystack.contains(&kw.to_lowercase()))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                Some(RegionTag {
                    region_id: region_id.to_string(),
                    match_strength: round3(matched.len() as f64 / keywords.len() as f64),
                    matched_keywords: matched,
                })
            })
            .collect();

        if tags.is_empty() {
            return vec![RegionTag::unclassified()];
        }
        tags.sort_by(|a, b| {
            b.match_strength
                .total_cmp(&a.match_strength)
                .then_with(|| a.region_id.cmp(&b.region_id))
        });
        tags
    }
}

/// State owned by one batch run and dropped with it.
pub struct RunContext {
    limiter: Arc<HostRateLimiter>,
    started: Instant,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new(config: &PipelineConfig) -> Self {
        let started = Instant::now();
        Self {
            limiter: Arc::new(HostRateLimiter::new(config.rate_limit_interval())),
            started,
            deadline: config.deadline().map(|d| started + d),
        }
    }

    pub fn limiter(&self) -> &HostRateLimiter {
        &self.limiter
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn within_deadline<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
            None => Some(fut.await),
        }
    }
}

struct ArticleJob<'a> {
    descriptor: &'a ArticleDescriptor,
    stage: ArticleStage,
    successful_strategies: BTreeSet<StrategyName>,
}

impl<'a> ArticleJob<'a> {
    fn new(descriptor: &'a ArticleDescriptor) -> Self {
        Self {
            descriptor,
            stage: ArticleStage::Pending,
            successful_strategies: BTreeSet::new(),
        }
    }

    fn advance(&mut self, next: ArticleStage) {
        debug!(from = %self.stage, to = %next, "article stage transition");
        self.stage = next;
    }

    fn finish(self, status: ArticleStatus) -> ArticleOutcome {
        ArticleOutcome {
            article_url: self.descriptor.url.clone(),
            status,
            successful_strategies: self.successful_strategies,
        }
    }

    fn fail(self, reason: FailureReason) -> ArticleOutcome {
        warn!(stage = %self.stage, reason = ?reason, "article failed");
        let stage = self.stage;
        self.finish(ArticleStatus::Failed { stage, reason })
    }
}

pub struct Orchestrator {
    config: PipelineConfig,
    transport: Arc<dyn HttpTransport>,
    fetcher: Fetcher,
    chain: StrategyChain,
    dedup: DedupEngine,
    classifier: RegionClassifier,
    ledger: MetadataLedger,
    images: Option<ImageStore>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        output_dir: impl Into<PathBuf>,
        image_search: Option<ImageSearchCredentials>,
    ) -> Self {
        let config = config.normalized();
        let output_dir = output_dir.into();
        let external = image_search.map(|credentials| {
            ExternalApiStrategy::new(transport.clone(), credentials, config.target_images_per_article)
        });
        let chain = StrategyChain::standard(&config.enabled_strategies, config.target_images_per_article, external);
        let dedup = DedupEngine::new(DedupConfig {
            min_confidence: config.min_confidence,
            ..DedupConfig::default()
        });
        let classifier = RegionClassifier::new(config.region_taxonomy.clone());
        let images = config.download_images.then(|| ImageStore::new(output_dir.clone()));

        Self {
            fetcher: Fetcher::new(transport.clone(), BackoffPolicy::default()),
            transport,
            chain,
            dedup,
            classifier,
            ledger: MetadataLedger::new(ledger_dir(&output_dir)),
            images,
            config,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.fetcher = Fetcher::new(self.transport.clone(), backoff);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &MetadataLedger {
        &self.ledger
    }

    pub fn strategy_names(&self) -> Vec<StrategyName> {
        self.chain.strategy_names()
    }

    /// Process a batch through the bounded worker pool. Never fails as a whole:
    /// every article ends up in the report as persisted or failed.
    pub async fn run_batch(&self, descriptors: &[ArticleDescriptor]) -> BatchReport {
        let ctx = RunContext::new(&self.config);
        info!(
            articles = descriptors.len(),
            concurrency = self.config.concurrency,
            strategies = ?self.chain.strategy_names(),
            "starting batch"
        );

        let mut finished: Vec<(usize, ArticleOutcome)> = stream::iter(descriptors.iter().enumerate())
            .map(|(idx, descriptor)| {
                let ctx = &ctx;
                async move {
                    let span = info_span!("article", url = %descriptor.url);
                    (idx, self.process_article(ctx, descriptor).instrument(span).await)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        finished.sort_by_key(|(idx, _)| *idx);

        let mut report = BatchReport::default();
        for (_, outcome) in finished {
            report.record(outcome);
        }
        report.elapsed_ms = u64::try_from(ctx.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            images_downloaded = report.images_downloaded,
            elapsed_ms = report.elapsed_ms,
            "batch finished"
        );
        report
    }

    async fn process_article(&self, ctx: &RunContext, descriptor: &ArticleDescriptor) -> ArticleOutcome {
        let mut job = ArticleJob::new(descriptor);

        job.advance(ArticleStage::Fetching);
        let fetched = match ctx.within_deadline(self.fetcher.fetch(descriptor, ctx.limiter())).await {
            None => return job.fail(FailureReason::DeadlineExceeded),
            Some(Err(err)) => {
                return job.fail(FailureReason::Fetch {
                    error: err.kind(),
                    message: err.to_string(),
                })
            }
            Some(Ok(fetched)) => fetched,
        };

        job.advance(ArticleStage::Extracting);
        let input = ExtractionInput {
            descriptor,
            fetch: &fetched,
            limiter: ctx.limiter(),
        };
        let Some(chain_outcome) = ctx.within_deadline(self.chain.run(&input)).await else {
            return job.fail(FailureReason::DeadlineExceeded);
        };
        job.successful_strategies = chain_outcome.successful_strategies();

        job.advance(ArticleStage::Deduplicating);
        let mut images = self.dedup.dedupe(&chain_outcome.candidates);

        job.advance(ArticleStage::Classifying);
        let tags = self.classifier.classify(descriptor, &images);

        job.advance(ArticleStage::Persisting);
        let images_stored = match &self.images {
            Some(store) => {
                self.store_images(ctx, store, descriptor, &tags, &chain_outcome.candidates, &mut images)
                    .await
            }
            None => 0,
        };

        let record = MetadataRecord::new(
            descriptor,
            images,
            tags,
            chain_outcome.per_strategy,
            Utc::now(),
            self.config.schema_version,
        );
        match self.ledger.append(&record).await {
            Ok(record_id) => {
                job.advance(ArticleStage::Persisted);
                info!(
                    record_id = %record_id,
                    images = record.images.len(),
                    images_stored,
                    region = record.primary_region(),
                    "article persisted"
                );
                job.finish(ArticleStatus::Persisted {
                    record_id,
                    image_count: record.images.len(),
                    images_stored,
                })
            }
            Err(err) => job.fail(FailureReason::Store {
                error: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    /// Download and store each surviving image. Failures are logged and skipped.
    async fn store_images(
        &self,
        ctx: &RunContext,
        store: &ImageStore,
        descriptor: &ArticleDescriptor,
        tags: &[RegionTag],
        candidates: &[ImageCandidate],
        images: &mut [DedupedImage],
    ) -> usize {
        let region = tags
            .first()
            .map(|t| t.region_id.as_str())
            .unwrap_or(newsimg_core::UNCLASSIFIED_REGION);
        let article_hash = ImageStore::article_hash(&descriptor.url);
        let mut stored = 0;

        for (index, image) in images.iter_mut().enumerate() {
            if ctx.past_deadline() {
                warn!(skipped_from = index, "deadline reached; skipping remaining image downloads");
                break;
            }
            let source_url = download_source(candidates, &image.canonical_url);
            let downloaded = match download_image(
                self.transport.as_ref(),
                ctx.limiter(),
                &source_url,
                self.config.max_image_bytes,
            )
            .await
            {
                Ok(d) => d,
                Err(err) => {
                    warn!(url = %source_url, error = %err, "image download failed");
                    continue;
                }
            };
            match store
                .store_bytes(region, &article_hash, index, &downloaded.extension, &downloaded.bytes)
                .await
            {
                Ok(saved) => {
                    debug!(
                        path = %saved.relative_path.display(),
                        bytes = saved.byte_size,
                        existing = saved.deduplicated,
                        "image stored"
                    );
                    image.local_path = Some(saved.relative_path.to_string_lossy().replace('\\', "/"));
                    stored += 1;
                }
                Err(err) => warn!(url = %source_url, error = %err, "image store failed"),
            }
        }
        stored
    }
}

/// Highest-scoring original URL behind a canonical URL; servers may reject the canonical form.
fn download_source(candidates: &[ImageCandidate], canonical_url: &str) -> String {
    candidates
        .iter()
        .filter(|c| canonicalize_image_url(&c.source_url) == canonical_url)
        .reduce(|best, c| if c.confidence > best.confidence { c } else { best })
        .map(|c| c.source_url.clone())
        .unwrap_or_else(|| canonical_url.to_string())
}

/// Transport-wide body cap floor, so a small image cap still admits article pages.
const MIN_PAGE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Read a JSON array of article descriptors.
pub fn load_descriptors(path: &Path) -> Result<Vec<ArticleDescriptor>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing descriptors in {}", path.display()))
}

pub async fn run_batch_from_env(config: PipelineConfig, descriptors: &[ArticleDescriptor]) -> Result<BatchReport> {
    let env = RuntimeEnv::from_env();
    let transport = ReqwestTransport::new(HttpClientConfig {
        timeout: Duration::from_secs(env.http_timeout_secs),
        user_agent: Some(env.user_agent.clone()),
        max_body_bytes: Some(config.max_image_bytes.max(MIN_PAGE_BODY_BYTES)),
    })?;
    let orchestrator = Orchestrator::new(config, Arc::new(transport), env.output_dir.clone(), env.image_search);
    Ok(orchestrator.run_batch(descriptors).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use newsimg_core::ImageAttributes;

    fn candidate(url: &str, strategy: StrategyName, offset_ms: i64) -> ImageCandidate {
        let mut c = ImageCandidate::new(url, strategy, ImageAttributes::default());
        c.discovered_at = Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap() + ChronoDuration::milliseconds(offset_ms);
        c
    }

    fn engine() -> DedupEngine {
        DedupEngine::new(DedupConfig::default())
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    #[test]
    fn corroborated_image_gets_boosted_confidence() {
        let images = engine().dedupe(&[
            candidate("https://cdn.example.com/lead.jpg?utm_source=tw", StrategyName::MetaTag, 0),
            candidate("https://CDN.example.com/lead-1024x683.jpg", StrategyName::SemanticSelector, 5),
        ]);
        assert_eq!(images.len(), 1);
        let img = &images[0];
        assert_eq!(img.canonical_url, "https://cdn.example.com/lead.jpg");
        assert_eq!(img.best_strategy, StrategyName::MetaTag);
        assert!((img.merged_confidence - 0.95).abs() < 1e-9);
        assert_eq!(
            img.contributing_strategies,
            BTreeSet::from([StrategyName::MetaTag, StrategyName::SemanticSelector])
        );
    }

    #[test]
    fn merged_confidence_is_monotonic_and_capped() {
        let engine = engine();
        let mut previous = 0.0;
        for n in 1..=6 {
            let score = engine.merged_confidence(0.85, n);
            assert!(score >= previous);
            assert!(score <= 1.0);
            previous = score;
        }
        assert_eq!(engine.merged_confidence(0.9, 4), 1.0);
    }

    #[test]
    fn same_strategy_repeats_do_not_boost() {
        let images = engine().dedupe(&[
            candidate("https://cdn.example.com/a.jpg", StrategyName::MetaTag, 0),
            candidate("https://cdn.example.com/a.jpg#x", StrategyName::MetaTag, 1),
        ]);
        assert_eq!(images.len(), 1);
        assert!((images[0].merged_confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn output_is_ordered_by_confidence_then_discovery() {
        let images = engine().dedupe(&[
            candidate("https://cdn.example.com/late-bg.jpg", StrategyName::BackgroundImage, 30),
            candidate("https://cdn.example.com/early-bg.jpg", StrategyName::BackgroundImage, 10),
            candidate("https://cdn.example.com/feed.jpg", StrategyName::FeedEmbedded, 20),
        ]);
        let order: Vec<_> = images.iter().map(|i| i.canonical_url.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "https://cdn.example.com/feed.jpg",
                "https://cdn.example.com/early-bg.jpg",
                "https://cdn.example.com/late-bg.jpg",
            ]
        );
    }

    #[test]
    fn images_below_floor_are_dropped() {
        let strict = DedupEngine::new(DedupConfig {
            min_confidence: 0.5,
            ..DedupConfig::default()
        });
        let images = strict.dedupe(&[
            candidate("https://cdn.example.com/text.jpg", StrategyName::TextPattern, 0),
            candidate("https://cdn.example.com/bg.jpg", StrategyName::BackgroundImage, 0),
        ]);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].canonical_url, "https://cdn.example.com/bg.jpg");
    }

    #[test]
    fn attributes_are_filled_from_weaker_duplicates() {
        let mut weak = candidate("https://cdn.example.com/a.jpg", StrategyName::SemanticSelector, 1);
        weak.attributes.alt = Some("Street market in Accra".into());
        weak.attributes.width = Some(1024);
        let strong = candidate("https://cdn.example.com/a.jpg", StrategyName::MetaTag, 0);
        let images = engine().dedupe(&[strong, weak]);
        assert_eq!(images[0].attributes.alt.as_deref(), Some("Street market in Accra"));
        assert_eq!(images[0].attributes.width, Some(1024));
    }

    #[test]
    fn classifier_tags_matching_region() {
        let taxonomy = RegionTaxonomy::from_pairs([("african", &["nigeria", "africa"][..])]);
        let classifier = RegionClassifier::new(taxonomy);
        let tags = classifier.classify(&ArticleDescriptor::new("https://n.example/1", "Nigeria election results"), &[]);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].region_id, "african");
        assert_eq!(tags[0].matched_keywords, vec!["nigeria".to_string()]);
        assert!((tags[0].match_strength - 0.5).abs() < 1e-9);
    }

    #[test]
    fn classifier_falls_back_to_unclassified() {
        let classifier = RegionClassifier::new(RegionTaxonomy::default());
        let tags = classifier.classify(&ArticleDescriptor::new("https://n.example/2", "Quarterly earnings beat"), &[]);
        assert_eq!(tags, vec![RegionTag::unclassified()]);
    }

    #[test]
    fn classifier_reads_summary_and_alt_text_and_is_deterministic() {
        let classifier = RegionClassifier::new(RegionTaxonomy::default());
        let mut descriptor = ArticleDescriptor::new("https://n.example/3", "Carnival season opens");
        descriptor.feed_fields.summary = Some("Crowds fill the streets of Port-of-Spain, Trinidad".into());
        let image = DedupedImage {
            canonical_url: "https://cdn.example.com/c.jpg".into(),
            best_strategy: StrategyName::MetaTag,
            merged_confidence: 0.85,
            contributing_strategies: BTreeSet::from([StrategyName::MetaTag]),
            first_discovered_at: Utc::now(),
            attributes: ImageAttributes {
                alt: Some("Afro-Cuban dancers at the parade".into()),
                ..Default::default()
            },
            local_path: None,
        };
        let first = classifier.classify(&descriptor, std::slice::from_ref(&image));
        let second = classifier.classify(&descriptor, std::slice::from_ref(&image));
        assert_eq!(first, second);
        let ids: BTreeSet<_> = first.iter().map(|t| t.region_id.as_str()).collect();
        assert_eq!(ids, BTreeSet::from(["afro_latino", "caribbean"]));
        for pair in first.windows(2) {
            assert!(pair[0].match_strength >= pair[1].match_strength);
        }
    }

    #[test]
    fn config_defaults_and_partial_yaml() {
        let defaults = PipelineConfig::default();
        assert_eq!(defaults.target_images_per_article, 5);
        assert_eq!(defaults.rate_limit_interval(), Duration::from_secs(1));
        assert!(!defaults.enabled_strategies.contains(&StrategyName::ExternalApi));

        let config = PipelineConfig::from_yaml_str(
            "concurrency: 100\ntarget_images_per_article: 3\ndeadline_secs: 90\nenabled_strategies: [meta-tag, text-pattern]\nregion_taxonomy:\n  pacific: [fiji, samoa]\n",
        )
        .unwrap();
        assert_eq!(config.concurrency, 32);
        assert_eq!(config.target_images_per_article, 3);
        assert_eq!(config.deadline(), Some(Duration::from_secs(90)));
        assert_eq!(
            config.enabled_strategies,
            BTreeSet::from([StrategyName::MetaTag, StrategyName::TextPattern])
        );
        let regions: Vec<_> = config.region_taxonomy.regions().map(|(id, _)| id.to_string()).collect();
        assert_eq!(regions, vec!["pacific".to_string()]);
        assert!((config.min_confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        assert!(PipelineConfig::from_yaml_str("enabled_strategies: [crystal-ball]\n").is_err());
    }

    #[test]
    fn taxonomy_rules_file_loads() {
        let taxonomy = RegionTaxonomy::from_yaml_file(&workspace_root().join("rules/regions.yaml")).unwrap();
        let ids: Vec<_> = taxonomy.regions().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["african", "afro_latino", "caribbean"]);
        let classifier = RegionClassifier::new(taxonomy);
        let tags = classifier.classify(&ArticleDescriptor::new("https://n.example/4", "Floods in Kingston, Jamaica"), &[]);
        assert_eq!(tags[0].region_id, "caribbean");
    }

    #[test]
    fn sample_descriptor_batch_parses() {
        let batch = load_descriptors(&workspace_root().join("fixtures/articles/sample-batch.json")).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch[0].published_at.is_some());
        assert_eq!(
            batch[1].feed_fields.enclosure_url.as_deref(),
            Some("https://cdn.example.com/photos/kingston-harbour.jpg?utm_source=rss")
        );
        assert_eq!(batch[2].summary(), None);
    }

    #[test]
    fn download_source_prefers_strongest_original() {
        let candidates = vec![
            candidate("https://cdn.example.com/a-300x200.jpg", StrategyName::SemanticSelector, 0),
            candidate("https://cdn.example.com/a.jpg?utm_source=og", StrategyName::MetaTag, 1),
        ];
        assert_eq!(
            download_source(&candidates, "https://cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg?utm_source=og"
        );
        assert_eq!(
            download_source(&candidates, "https://other.example/b.jpg"),
            "https://other.example/b.jpg"
        );
    }
}
