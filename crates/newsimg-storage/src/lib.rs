//! HTTP fetching, per-host rate limiting, image byte storage and the metadata ledger.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use newsimg_core::{
    ArticleDescriptor, FetchErrorKind, FetchResult, MetadataRecord, PayloadKind, RecordId,
    StoreErrorKind,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "newsimg-storage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl TransportError {
    /// The request URL is dropped from the message; API URLs carry credentials.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout;
        }
        let is_connect = err.is_connect();
        let message = err.without_url().to_string();
        if is_connect {
            TransportError::Connect(message)
        } else {
            TransportError::Other(message)
        }
    }
}

/// Rejects a body once `received` bytes exceed `limit`.
pub fn check_body_cap(received: u64, limit: Option<usize>) -> Result<(), TransportError> {
    match limit {
        Some(limit) if received > limit as u64 => Err(TransportError::BodyTooLarge { limit }),
        _ => Ok(()),
    }
}

/// Single GET capability shared by the fetcher, image downloads and API strategies.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_body_bytes: Option<usize>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_body_bytes: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_bytes: Option<usize>,
}

impl ReqwestTransport {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        if let Some(declared) = resp.content_length() {
            check_body_cap(declared, self.max_body_bytes)?;
        }
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(TransportError::from_reqwest)? {
            body.extend_from_slice(&chunk);
            check_body_cap(body.len() as u64, self.max_body_bytes)?;
        }
        Ok(TransportResponse {
            status,
            final_url,
            content_type,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Server errors, 408 and 429 are retried on the same variant. Any other 4xx is
/// final for that variant: the fetcher moves on to the next URL variant without
/// spending its retry budget, since repeating a 404 or 403 does not change the answer.
pub fn classify_status(status: u16) -> RetryDisposition {
    if (500..600).contains(&status) || status == 429 || status == 408 {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_transport_error(err: &TransportError) -> RetryDisposition {
    match err {
        TransportError::Timeout | TransportError::Connect(_) => RetryDisposition::Retryable,
        TransportError::Other(_) | TransportError::BodyTooLarge { .. } => RetryDisposition::NonRetryable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based): `base_delay * 2^retry`, never above `max_delay`.
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        self.base_delay
            .saturating_mul(2u32.pow(doublings))
            .min(self.max_delay)
    }
}

/// Earliest instant the next request to one host may start.
#[derive(Debug)]
struct HostSlot {
    next_start: Mutex<Option<Instant>>,
}

impl HostSlot {
    fn new() -> Self {
        Self {
            next_start: Mutex::new(None),
        }
    }

    /// Reserve the next start time, then sleep until it arrives.
    async fn reserve(&self, interval: Duration) {
        let start_at = {
            let mut next_start = self.next_start.lock().await;
            let now = Instant::now();
            let start_at = match *next_start {
                Some(at) if at > now => at,
                _ => now,
            };
            *next_start = Some(start_at + interval);
            start_at
        };
        tokio::time::sleep_until(start_at).await;
    }
}

/// Minimum spacing between request starts per host, shared by every job in a batch.
///
/// Waiting on one host never holds the map lock, so unrelated hosts proceed.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    slots: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn slot_for(&self, host: &str) -> Arc<HostSlot> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostSlot::new()))
            .clone()
    }

    pub async fn acquire(&self, url: &str) {
        if self.interval.is_zero() {
            return;
        }
        let slot = self.slot_for(&host_key(url)).await;
        slot.reserve(self.interval).await;
    }
}

pub fn host_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_else(|| url.to_string())
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("http failure for {url}: {message}")]
    Http {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("all {} url variants failed for {url}; last error: {last}", .attempted.len())]
    AllVariantsExhausted {
        url: String,
        attempted: Vec<String>,
        last: Box<FetchError>,
    },
    #[error("invalid article url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
            FetchError::Http { .. } => FetchErrorKind::HttpError,
            FetchError::AllVariantsExhausted { .. } => FetchErrorKind::AllVariantsExhausted,
            FetchError::InvalidUrl { .. } => FetchErrorKind::InvalidUrl,
        }
    }
}

/// Canonical URL followed by the mobile-subdomain and `/amp` variants, in that order.
pub fn url_variants(url: &str) -> Result<Vec<String>, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            message: format!("unsupported scheme {}", parsed.scheme()),
        });
    }

    let mut variants = vec![url.to_string()];

    if let Some(host) = parsed.host_str() {
        let is_ip = host.parse::<IpAddr>().is_ok();
        if !is_ip && !host.starts_with("m.") && host.contains('.') {
            let bare = host.strip_prefix("www.").unwrap_or(host);
            let mut mobile = parsed.clone();
            if mobile.set_host(Some(&format!("m.{bare}"))).is_ok() {
                variants.push(mobile.to_string());
            }
        }
    }

    let path = parsed.path().trim_end_matches('/');
    if !path.ends_with("/amp") {
        let mut amp = parsed.clone();
        amp.set_path(&format!("{path}/amp"));
        variants.push(amp.to_string());
    }

    variants.dedup();
    Ok(variants)
}

pub fn detect_payload_kind(content_type: Option<&str>, body: &str) -> PayloadKind {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("rss") || ct.contains("atom") {
            return PayloadKind::Feed;
        }
        if ct.contains("html") {
            return PayloadKind::Html;
        }
    }
    let head: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    if head.contains("<rss") || head.contains("<feed") || head.contains("<rdf:rdf") {
        PayloadKind::Feed
    } else {
        PayloadKind::Html
    }
}

pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    backoff: BackoffPolicy,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, backoff: BackoffPolicy) -> Self {
        Self { transport, backoff }
    }

    /// Fetch the article, retrying each variant before moving to the next one.
    pub async fn fetch(
        &self,
        descriptor: &ArticleDescriptor,
        limiter: &HostRateLimiter,
    ) -> Result<FetchResult, FetchError> {
        let variants = url_variants(&descriptor.url)?;
        let mut attempted = Vec::new();
        let mut last_error = None;

        for (index, variant) in variants.iter().enumerate() {
            let span = info_span!("http_fetch", url = %variant, variant = index);
            match self.fetch_variant(variant, limiter).instrument(span).await {
                Ok(resp) => {
                    let body = String::from_utf8_lossy(&resp.body).into_owned();
                    let payload_kind = detect_payload_kind(resp.content_type.as_deref(), &body);
                    return Ok(FetchResult {
                        final_url: resp.final_url,
                        body,
                        payload_kind,
                        http_status: resp.status,
                        fetched_at: Utc::now(),
                        used_fallback_variant: index > 0,
                    });
                }
                Err(err) => {
                    warn!(url = %variant, error = %err, "article variant fetch failed");
                    attempted.push(variant.clone());
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if attempted.len() == 1 => Err(err),
            Some(err) => Err(FetchError::AllVariantsExhausted {
                url: descriptor.url.clone(),
                attempted,
                last: Box::new(err),
            }),
            None => Err(FetchError::InvalidUrl {
                url: descriptor.url.clone(),
                message: "no url variants to try".to_string(),
            }),
        }
    }

    async fn fetch_variant(
        &self,
        url: &str,
        limiter: &HostRateLimiter,
    ) -> Result<TransportResponse, FetchError> {
        for attempt in 0..=self.backoff.max_retries {
            limiter.acquire(url).await;
            let can_retry = attempt < self.backoff.max_retries;

            match self.transport.get(url).await {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) => {
                    if classify_status(resp.status) == RetryDisposition::Retryable && can_retry {
                        debug!(attempt, status = resp.status, "retrying after http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Http {
                        url: url.to_string(),
                        status: Some(resp.status),
                        message: format!("http status {}", resp.status),
                    });
                }
                Err(err) => {
                    if classify_transport_error(&err) == RetryDisposition::Retryable && can_retry {
                        debug!(attempt, error = %err, "retrying after transport error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(match err {
                        TransportError::Timeout => FetchError::Timeout { url: url.to_string() },
                        other => FetchError::Http {
                            url: url.to_string(),
                            status: None,
                            message: other.to_string(),
                        },
                    });
                }
            }
        }

        Err(FetchError::Http {
            url: url.to_string(),
            status: None,
            message: "retry budget exhausted".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub extension: String,
}

/// Region-aware image layout: `images/<region>/<articleHash>-<index>.<ext>` under the root.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn article_hash(article_url: &str) -> String {
        let mut full = Self::sha256_hex(article_url.as_bytes());
        full.truncate(16);
        full
    }

    pub fn image_relative_path(
        &self,
        region_id: &str,
        article_hash: &str,
        index: usize,
        extension: &str,
    ) -> PathBuf {
        let region = sanitize_path_segment(region_id);
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "jpg" } else { ext };
        PathBuf::from("images")
            .join(region)
            .join(format!("{article_hash}-{index}.{ext}"))
    }

    /// Write bytes via temp file + rename.
    ///
    /// Paths are keyed by position, not content: an existing file with the same sha256
    /// is reused, while one holding different bytes is replaced.
    pub async fn store_bytes(
        &self,
        region_id: &str,
        article_hash: &str,
        index: usize,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredImage> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.image_relative_path(region_id, article_hash, index, extension);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating image directory {}", parent.display()))?;

        match fs::read(&absolute_path).await {
            Ok(existing) if Self::sha256_hex(&existing) == content_hash => {
                return Ok(StoredImage {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                });
            }
            Ok(_) => debug!(path = %absolute_path.display(), "replacing image with different content"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading existing image {}", absolute_path.display()))
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        write_file_atomically(&temp_path, &absolute_path, bytes).await?;

        Ok(StoredImage {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }
}

fn sanitize_path_segment(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        newsimg_core::UNCLASSIFIED_REGION.to_string()
    } else {
        cleaned
    }
}

async fn write_file_atomically(temp_path: &Path, target: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(temp_path, target).await {
        let _ = fs::remove_file(temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                target.display()
            )
        });
    }
    Ok(())
}

/// File extension from the URL path, falling back to the response content type.
pub fn image_extension(url: &str, content_type: Option<&str>) -> String {
    const KNOWN: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "svg"];

    let from_path = Url::parse(url).ok().and_then(|u| {
        let last = u.path_segments()?.last()?.to_string();
        let (_, ext) = last.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        KNOWN.contains(&ext.as_str()).then_some(ext)
    });
    if let Some(ext) = from_path {
        return if ext == "jpeg" { "jpg".to_string() } else { ext };
    }

    let from_type = content_type.and_then(|ct| {
        let mime = ct.split(';').next()?.trim().to_ascii_lowercase();
        let sub = mime.strip_prefix("image/")?;
        Some(match sub {
            "jpeg" | "pjpeg" => "jpg".to_string(),
            "svg+xml" => "svg".to_string(),
            other => other.to_string(),
        })
    });
    from_type.unwrap_or_else(|| "jpg".to_string())
}

pub async fn download_image(
    transport: &dyn HttpTransport,
    limiter: &HostRateLimiter,
    url: &str,
    max_bytes: usize,
) -> anyhow::Result<DownloadedImage> {
    limiter.acquire(url).await;
    let resp = transport
        .get(url)
        .await
        .with_context(|| format!("downloading image {url}"))?;
    if !resp.is_success() {
        bail!("image download {url} returned http status {}", resp.status);
    }
    if let Some(ct) = resp.content_type.as_deref() {
        let ct = ct.to_ascii_lowercase();
        if !ct.starts_with("image/") && !ct.starts_with("application/octet-stream") {
            bail!("image download {url} returned non-image content type {ct}");
        }
    }
    if resp.body.is_empty() {
        bail!("image download {url} returned an empty body");
    }
    if resp.body.len() > max_bytes {
        bail!(
            "image download {url} exceeds size cap ({} > {max_bytes} bytes)",
            resp.body.len()
        );
    }
    let extension = image_extension(url, resp.content_type.as_deref());
    Ok(DownloadedImage {
        bytes: resp.body,
        content_type: resp.content_type,
        extension,
    })
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ledger io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Io { .. } => StoreErrorKind::IoFailure,
            StoreError::Serialization(_) => StoreErrorKind::SerializationFailure,
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LedgerKey {
    article_url: String,
    schema_version: u32,
    created_at: DateTime<Utc>,
}

/// Date-partitioned JSON-lines ledger, one file per UTC day.
///
/// Each partition holds at most one record per `(article_url, schema_version)`;
/// the record with the latest `created_at` wins.
#[derive(Debug)]
pub struct MetadataLedger {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Insert or replace the record in its day partition.
    ///
    /// Every call reads and rewrites the whole partition file, so a day with `n` appends
    /// costs O(n^2) line copies. Batches write a few hundred records per day at most.
    pub async fn append(&self, record: &MetadataRecord) -> Result<RecordId, StoreError> {
        let line = serde_json::to_string(record)?;
        let path = self.partition_path(record.partition_date());

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let existing = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(StoreError::io(&path, err)),
        };

        let mut kept = Vec::new();
        for raw in existing.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<LedgerKey>(raw) {
                Ok(key)
                    if key.article_url == record.article_url
                        && key.schema_version == record.schema_version =>
                {
                    if key.created_at > record.created_at {
                        debug!(
                            article_url = %record.article_url,
                            "newer record already in partition; keeping it"
                        );
                        return Ok(record.record_id);
                    }
                }
                Ok(_) => kept.push(raw.to_string()),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "keeping unparseable ledger line");
                    kept.push(raw.to_string());
                }
            }
        }
        kept.push(line);

        let mut contents = kept.join("\n");
        contents.push('\n');
        let temp_path = self.root.join(format!(".{}.ledger.tmp", Uuid::new_v4()));
        write_ledger_atomically(&temp_path, &path, contents.as_bytes()).await?;

        Ok(record.record_id)
    }

    pub async fn read_partition(&self, date: NaiveDate) -> Result<Vec<MetadataRecord>, StoreError> {
        let path = self.partition_path(date);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&path, err)),
        };

        let mut records = Vec::new();
        for raw in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<MetadataRecord>(raw) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unparseable ledger line"),
            }
        }
        Ok(records)
    }

    /// Latest record per article URL across the given partitions.
    pub async fn latest_by_article(
        &self,
        dates: &[NaiveDate],
    ) -> Result<BTreeMap<String, MetadataRecord>, StoreError> {
        let mut latest: BTreeMap<String, MetadataRecord> = BTreeMap::new();
        for date in dates {
            for record in self.read_partition(*date).await? {
                match latest.get(&record.article_url) {
                    Some(current) if current.created_at >= record.created_at => {}
                    _ => {
                        latest.insert(record.article_url.clone(), record);
                    }
                }
            }
        }
        Ok(latest)
    }
}

async fn write_ledger_atomically(temp_path: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| StoreError::io(temp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(temp_path, e))?;
    file.flush().await.map_err(|e| StoreError::io(temp_path, e))?;
    drop(file);

    if let Err(err) = fs::rename(temp_path, target).await {
        let _ = fs::remove_file(temp_path).await;
        return Err(StoreError::io(target, err));
    }
    Ok(())
}

#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    //! In-memory transport with per-URL scripted responses.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct Script {
        queued: VecDeque<Result<TransportResponse, TransportError>>,
        sticky: Option<Result<TransportResponse, TransportError>>,
    }

    /// Unscripted URLs answer 404.
    #[derive(Default)]
    pub struct ScriptedTransport {
        scripts: StdMutex<HashMap<String, Script>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn response(url: &str, status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> TransportResponse {
            TransportResponse {
                status,
                final_url: url.to_string(),
                content_type: Some(content_type.to_string()),
                body: body.into(),
            }
        }

        /// Queue a one-shot response for `url`.
        pub fn push(&self, url: &str, result: Result<TransportResponse, TransportError>) {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.entry(url.to_string()).or_default().queued.push_back(result);
        }

        /// Answer every request for `url` with `result` once the queue is drained.
        pub fn always(&self, url: &str, result: Result<TransportResponse, TransportError>) {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.entry(url.to_string()).or_default().sticky = Some(result);
        }

        pub fn always_html(&self, url: &str, html: &str) {
            self.always(url, Ok(Self::response(url, 200, "text/html; charset=utf-8", html)));
        }

        pub fn always_status(&self, url: &str, status: u16) {
            self.always(url, Ok(Self::response(url, status, "text/html", Vec::new())));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| c.as_str() == url).count()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(script) => {
                    if let Some(next) = script.queued.pop_front() {
                        return next;
                    }
                    if let Some(sticky) = &script.sticky {
                        return sticky.clone();
                    }
                    Ok(Self::response(url, 404, "text/html", Vec::new()))
                }
                None => Ok(Self::response(url, 404, "text/html", Vec::new())),
            }
        }
    }
}
