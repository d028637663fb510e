//! Image extraction strategies, URL canonicalization and the priority-ordered strategy chain.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use newsimg_core::{
    ArticleDescriptor, FetchResult, ImageAttributes, ImageCandidate, PayloadKind, StrategyName,
};
use newsimg_storage::{HostRateLimiter, HttpTransport};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const CRATE_NAME: &str = "newsimg-strategies";

static SIZE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:-\d{2,5}x\d{2,5})+(\.[A-Za-z0-9]{2,5})$").expect("static regex"));
static SIZE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2,5}x\d{2,5}$").expect("static regex"));

const TRACKING_PARAMS: &[&str] = &[
    "ref", "ref_src", "fbclid", "gclid", "mc_cid", "mc_eid", "_ga", "igshid", "cmpid",
];
const SIZE_PARAMS: &[&str] = &["w", "h", "width", "height", "resize", "size", "dpr"];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn is_size_param(key: &str) -> bool {
    SIZE_PARAMS.contains(&key.to_ascii_lowercase().as_str())
}

fn normalize_image_path(path: &str) -> String {
    let mut segments: Vec<String> = path.split('/').map(ToString::to_string).collect();
    while segments.len() > 1 && segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    let last_index = segments.len().saturating_sub(1);
    if let Some(last) = segments.last_mut() {
        let stripped = SIZE_SUFFIX.replace(last.as_str(), "$1").into_owned();
        *last = stripped;
    }
    let joined = segments
        .into_iter()
        .enumerate()
        .filter(|(i, s)| *i == last_index || !SIZE_SEGMENT.is_match(s))
        .map(|(_, s)| s)
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Identity of an image for deduplication.
///
/// Lowercases scheme and host, drops the fragment, tracking parameters and
/// width/height markers (query params, `-WxH` filename suffixes, `WxH` path
/// segments), sorts the remaining query and removes a trailing slash.
/// Idempotent; non-http inputs are returned trimmed.
pub fn canonicalize_image_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return trimmed.to_string();
    }

    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k) && !is_size_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = normalize_image_path(parsed.path());
    parsed.set_path(&path);
    parsed.to_string()
}

/// Resolve a possibly relative or protocol-relative reference to an absolute http(s) URL.
pub fn resolve_url(base: &str, raw: &str) -> Option<String> {
    let raw = raw.trim().replace("&amp;", "&");
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("javascript:") || lower.starts_with("blob:") {
        return None;
    }
    let resolved = match Url::parse(&raw) {
        Ok(u) => u,
        Err(_) => Url::parse(base).ok()?.join(&raw).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

const DECORATIVE_TOKENS: &[&str] = &[
    "logo", "logos", "icon", "icons", "favicon", "sprite", "sprites", "avatar", "avatars",
    "spacer", "pixel", "placeholder", "badge", "emoji",
];

/// Site chrome and tracking pixels rather than editorial images.
pub fn is_decorative(url: &str, attributes: &ImageAttributes) -> bool {
    if let (Some(w), Some(h)) = (attributes.width, attributes.height) {
        if w < 50 && h < 50 {
            return true;
        }
    }
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let path = parsed.path().to_ascii_lowercase();
    if path.ends_with(".svg") || path.ends_with(".ico") {
        return true;
    }
    path.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| DECORATIVE_TOKENS.contains(&token))
}

/// Widest entry of a `srcset`, by `w` or `x` descriptor.
pub fn best_srcset_entry(srcset: &str) -> Option<String> {
    let mut best: Option<(f64, String)> = None;
    for entry in srcset.split(',') {
        let mut parts = entry.split_whitespace();
        let Some(url) = parts.next() else {
            continue;
        };
        let weight = parts
            .next()
            .and_then(|d| d.trim_end_matches(['w', 'x', 'W', 'X']).parse::<f64>().ok())
            .unwrap_or(1.0);
        match &best {
            Some((current, _)) if *current >= weight => {}
            _ => best = Some((weight, url.to_string())),
        }
    }
    best.map(|(_, url)| url)
}

fn parse_dimension(value: &str) -> Option<u32> {
    let digits: String = value.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|v| *v > 0)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(ToString::to_string)
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("external image search failed: {0}")]
    Request(String),
}

/// Everything a strategy may look at for one article.
pub struct ExtractionInput<'a> {
    pub descriptor: &'a ArticleDescriptor,
    pub fetch: &'a FetchResult,
    pub limiter: &'a HostRateLimiter,
}

#[async_trait]
pub trait ImageStrategy: Send + Sync {
    fn name(&self) -> StrategyName;

    /// Errors are strategy-local; the chain logs them and moves on.
    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError>;
}

struct CandidateSink<'a> {
    base: &'a str,
    strategy: StrategyName,
    out: Vec<ImageCandidate>,
}

impl<'a> CandidateSink<'a> {
    fn new(base: &'a str, strategy: StrategyName) -> Self {
        Self {
            base,
            strategy,
            out: Vec::new(),
        }
    }

    fn push(&mut self, raw_url: &str, attributes: ImageAttributes) {
        let Some(url) = resolve_url(self.base, raw_url) else {
            return;
        };
        if is_decorative(&url, &attributes) {
            debug!(strategy = %self.strategy, %url, "skipping decorative image");
            return;
        }
        self.out.push(ImageCandidate::new(url, self.strategy, attributes));
    }

    fn finish(self) -> Vec<ImageCandidate> {
        self.out
    }
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, ExtractionError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .find_map(|n| non_empty(n.value().attr(attr))))
}

static FEED_MEDIA_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<(?:enclosure|media:content|media:thumbnail)\b[^>]*>"#).expect("static regex")
});
static XML_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b([a-z:_-]+)\s*=\s*["']([^"']*)["']"#).expect("static regex"));
static FEED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:item|entry)\b[^>]*>.*?</(?:item|entry)>").expect("static regex"));
static ITEM_LINK_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:link|guid|id)\b[^>/]*>\s*(?:<!\[CDATA\[)?\s*([^<\]\s]+)").expect("static regex")
});
static ITEM_LINK_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<link\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).expect("static regex"));

fn same_article_url(a: &str, b: &str) -> bool {
    a.trim().trim_end_matches('/') == b.trim().trim_end_matches('/')
}

/// The part of a feed payload that belongs to one article.
///
/// A multi-item feed is narrowed to the `<item>`/`<entry>` whose link or guid names the
/// article; `None` when no item does. A feed with at most one item is used whole.
fn article_feed_scope<'b>(body: &'b str, article_urls: &[&str]) -> Option<&'b str> {
    let items: Vec<&str> = FEED_ITEM.find_iter(body).map(|m| m.as_str()).collect();
    if items.len() <= 1 {
        return Some(body);
    }
    items.into_iter().find(|item| {
        ITEM_LINK_TEXT
            .captures_iter(item)
            .chain(ITEM_LINK_HREF.captures_iter(item))
            .any(|cap| article_urls.iter().any(|url| same_article_url(&cap[1], url)))
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedEmbeddedStrategy;

impl FeedEmbeddedStrategy {
    fn scan_feed_payload(body: &str, sink: &mut CandidateSink<'_>) {
        for tag in FEED_MEDIA_TAG.find_iter(body) {
            let mut url = None;
            let mut kind = None;
            let mut medium = None;
            let mut attributes = ImageAttributes::default();
            for cap in XML_ATTR.captures_iter(tag.as_str()) {
                let value = cap[2].to_string();
                match cap[1].to_ascii_lowercase().as_str() {
                    "url" => url = Some(value),
                    "type" => kind = Some(value.to_ascii_lowercase()),
                    "medium" => medium = Some(value.to_ascii_lowercase()),
                    "width" => attributes.width = parse_dimension(&value),
                    "height" => attributes.height = parse_dimension(&value),
                    _ => {}
                }
            }
            let is_image = match (kind.as_deref(), medium.as_deref()) {
                (Some(t), _) => t.starts_with("image/"),
                (None, Some(m)) => m == "image",
                (None, None) => true,
            };
            if let (Some(url), true) = (url, is_image) {
                sink.push(&url, attributes);
            }
        }
    }
}

#[async_trait]
impl ImageStrategy for FeedEmbeddedStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::FeedEmbedded
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
        let fields = &input.descriptor.feed_fields;
        let mut sink = CandidateSink::new(&input.descriptor.url, self.name());
        for raw in [&fields.enclosure_url, &fields.thumbnail_url].into_iter().flatten() {
            sink.push(raw, ImageAttributes::default());
        }
        if input.fetch.payload_kind == PayloadKind::Feed {
            let article_urls = [input.descriptor.url.as_str(), input.fetch.final_url.as_str()];
            match article_feed_scope(&input.fetch.body, &article_urls) {
                Some(scope) => Self::scan_feed_payload(scope, &mut sink),
                None => debug!(url = %input.descriptor.url, "no feed item links to this article"),
            }
        }
        Ok(sink.finish())
    }
}

const META_IMAGE_SELECTORS: &[(&str, &str)] = &[
    ("meta[property='og:image']", "content"),
    ("meta[property='og:image:url']", "content"),
    ("meta[property='og:image:secure_url']", "content"),
    ("meta[name='twitter:image']", "content"),
    ("meta[name='twitter:image:src']", "content"),
    ("meta[property='twitter:image']", "content"),
    ("meta[itemprop='image']", "content"),
    ("link[rel='image_src']", "href"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTagStrategy;

impl MetaTagStrategy {
    fn json_dimension(value: Option<&JsonValue>) -> Option<u32> {
        match value? {
            JsonValue::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            JsonValue::String(s) => parse_dimension(s),
            _ => None,
        }
    }

    fn collect_image_value(value: &JsonValue, out: &mut Vec<(String, ImageAttributes)>) {
        match value {
            JsonValue::String(s) => out.push((s.clone(), ImageAttributes::default())),
            JsonValue::Array(items) => {
                for item in items {
                    Self::collect_image_value(item, out);
                }
            }
            JsonValue::Object(map) => {
                let url = map
                    .get("url")
                    .or_else(|| map.get("contentUrl"))
                    .and_then(JsonValue::as_str);
                if let Some(url) = url {
                    out.push((
                        url.to_string(),
                        ImageAttributes {
                            alt: map.get("caption").and_then(JsonValue::as_str).map(ToString::to_string),
                            width: Self::json_dimension(map.get("width")),
                            height: Self::json_dimension(map.get("height")),
                            css_class: None,
                        },
                    ));
                }
            }
            _ => {}
        }
    }

    fn collect_json_ld(value: &JsonValue, out: &mut Vec<(String, ImageAttributes)>) {
        match value {
            JsonValue::Array(items) => {
                for item in items {
                    Self::collect_json_ld(item, out);
                }
            }
            JsonValue::Object(map) => {
                for key in ["image", "thumbnailUrl"] {
                    if let Some(v) = map.get(key) {
                        Self::collect_image_value(v, out);
                    }
                }
                if let Some(graph) = map.get("@graph") {
                    Self::collect_json_ld(graph, out);
                }
            }
            _ => {}
        }
    }

    fn extract_from_html(&self, html: &str, base: &str) -> Result<Vec<ImageCandidate>, ExtractionError> {
        let document = Html::parse_document(html);
        let mut sink = CandidateSink::new(base, self.name());

        let og_hints = ImageAttributes {
            alt: first_attr(&document, "meta[property='og:image:alt']", "content")?
                .or(first_attr(&document, "meta[name='twitter:image:alt']", "content")?),
            width: first_attr(&document, "meta[property='og:image:width']", "content")?
                .as_deref()
                .and_then(parse_dimension),
            height: first_attr(&document, "meta[property='og:image:height']", "content")?
                .as_deref()
                .and_then(parse_dimension),
            css_class: None,
        };

        for (css, attr) in META_IMAGE_SELECTORS {
            let sel = selector(css)?;
            for node in document.select(&sel) {
                if let Some(url) = non_empty(node.value().attr(attr)) {
                    let hints = if css.contains("og:image") {
                        og_hints.clone()
                    } else {
                        ImageAttributes {
                            alt: og_hints.alt.clone(),
                            ..ImageAttributes::default()
                        }
                    };
                    sink.push(&url, hints);
                }
            }
        }

        let ld_sel = selector("script[type='application/ld+json']")?;
        for script in document.select(&ld_sel) {
            let text = script.text().collect::<String>();
            match serde_json::from_str::<JsonValue>(text.trim()) {
                Ok(value) => {
                    let mut found = Vec::new();
                    Self::collect_json_ld(&value, &mut found);
                    for (url, attributes) in found {
                        sink.push(&url, attributes);
                    }
                }
                Err(err) => debug!(error = %err, "ignoring malformed json-ld block"),
            }
        }

        Ok(sink.finish())
    }
}

#[async_trait]
impl ImageStrategy for MetaTagStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::MetaTag
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
        if input.fetch.payload_kind != PayloadKind::Html {
            return Ok(Vec::new());
        }
        self.extract_from_html(&input.fetch.body, &input.fetch.final_url)
    }
}

const BODY_IMAGE_SELECTORS: &[&str] = &[
    "article img",
    "article picture source",
    "figure img",
    "picture img",
    "main img",
    "[itemprop='articleBody'] img",
    ".entry-content img",
    ".post-content img",
    ".article-body img",
    ".article-content img",
    ".story-body img",
    ".story-content img",
    "img.wp-post-image",
    "img.featured-image",
    ".featured-image img",
    ".lead-image img",
];

const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original", "src"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticSelectorStrategy;

impl SemanticSelectorStrategy {
    fn image_source(node: &ElementRef<'_>) -> Option<String> {
        let el = node.value();
        let from_srcset = ["data-srcset", "srcset"]
            .iter()
            .filter_map(|attr| el.attr(attr))
            .find_map(best_srcset_entry)
            .filter(|u| !u.starts_with("data:"));
        if from_srcset.is_some() {
            return from_srcset;
        }
        LAZY_SRC_ATTRS
            .iter()
            .filter_map(|attr| non_empty(el.attr(attr)))
            .find(|u| !u.to_ascii_lowercase().starts_with("data:"))
    }

    fn extract_from_html(&self, html: &str, base: &str) -> Result<Vec<ImageCandidate>, ExtractionError> {
        let document = Html::parse_document(html);
        let sel = selector(&BODY_IMAGE_SELECTORS.join(", "))?;
        let mut sink = CandidateSink::new(base, self.name());

        for node in document.select(&sel) {
            let Some(url) = Self::image_source(&node) else {
                continue;
            };
            let el = node.value();
            let attributes = ImageAttributes {
                alt: non_empty(el.attr("alt")),
                width: el.attr("width").and_then(parse_dimension),
                height: el.attr("height").and_then(parse_dimension),
                css_class: non_empty(el.attr("class")),
            };
            sink.push(&url, attributes);
        }
        Ok(sink.finish())
    }
}

#[async_trait]
impl ImageStrategy for SemanticSelectorStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::SemanticSelector
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
        if input.fetch.payload_kind != PayloadKind::Html {
            return Ok(Vec::new());
        }
        self.extract_from_html(&input.fetch.body, &input.fetch.final_url)
    }
}

static CSS_BACKGROUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)background(?:-image)?\s*:[^;{}<>]*?url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#)
        .expect("static regex")
});
static DATA_BACKGROUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bdata-(?:bg|background|background-image)\s*=\s*["']([^"']+)["']"#).expect("static regex")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundImageStrategy;

#[async_trait]
impl ImageStrategy for BackgroundImageStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::BackgroundImage
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
        if input.fetch.payload_kind != PayloadKind::Html {
            return Ok(Vec::new());
        }
        let body = input.fetch.body.replace("&quot;", "\"").replace("&#39;", "'");
        let mut sink = CandidateSink::new(&input.fetch.final_url, self.name());
        for cap in CSS_BACKGROUND.captures_iter(&body) {
            sink.push(&cap[1], ImageAttributes::default());
        }
        for cap in DATA_BACKGROUND.captures_iter(&body) {
            sink.push(&cap[1], ImageAttributes::default());
        }
        Ok(sink.finish())
    }
}

static IMAGE_URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:https?:)?//[^\s"'<>()\[\]]+?\.(?:jpe?g|png|gif|webp|avif)(?:\?[^\s"'<>()\[\]]*)?"#)
        .expect("static regex")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct TextPatternStrategy;

impl TextPatternStrategy {
    fn description_fields(fetch: &FetchResult) -> Result<Vec<String>, ExtractionError> {
        if fetch.payload_kind != PayloadKind::Html {
            return Ok(Vec::new());
        }
        let document = Html::parse_document(&fetch.body);
        let mut out = Vec::new();
        for css in ["meta[name='description']", "meta[property='og:description']"] {
            if let Some(text) = first_attr(&document, css, "content")? {
                out.push(text);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ImageStrategy for TextPatternStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::TextPattern
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
        let mut texts: Vec<String> = input.descriptor.summary().map(ToString::to_string).into_iter().collect();
        texts.extend(Self::description_fields(input.fetch)?);

        let mut sink = CandidateSink::new(&input.fetch.final_url, self.name());
        for text in &texts {
            for m in IMAGE_URL_PATTERN.find_iter(text) {
                sink.push(m.as_str(), ImageAttributes::default());
            }
        }
        Ok(sink.finish())
    }
}

pub const DEFAULT_IMAGE_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Clone, PartialEq, Eq)]
pub struct ImageSearchCredentials {
    pub api_key: String,
    pub engine_id: String,
    pub endpoint: String,
}

impl ImageSearchCredentials {
    /// `None` unless both the key and the engine id are present and non-empty.
    pub fn from_parts(
        api_key: Option<String>,
        engine_id: Option<String>,
        endpoint: Option<String>,
    ) -> Option<Self> {
        let api_key = non_empty(api_key.as_deref())?;
        let engine_id = non_empty(engine_id.as_deref())?;
        Some(Self {
            api_key,
            engine_id,
            endpoint: non_empty(endpoint.as_deref())
                .unwrap_or_else(|| DEFAULT_IMAGE_SEARCH_ENDPOINT.to_string()),
        })
    }
}

impl fmt::Debug for ImageSearchCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSearchCredentials")
            .field("api_key", &"<redacted>")
            .field("engine_id", &self.engine_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: Option<String>,
    title: Option<String>,
    #[serde(default)]
    image: Option<SearchImageMeta>,
}

#[derive(Debug, Deserialize)]
struct SearchImageMeta {
    width: Option<u32>,
    height: Option<u32>,
}

pub fn parse_search_response(body: &[u8]) -> Result<Vec<(String, ImageAttributes)>, ExtractionError> {
    let parsed: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| ExtractionError::Malformed(format!("image search response: {e}")))?;
    Ok(parsed
        .items
        .into_iter()
        .filter_map(|item| {
            let link = item.link?;
            Some((
                link,
                ImageAttributes {
                    alt: item.title,
                    width: item.image.as_ref().and_then(|i| i.width),
                    height: item.image.as_ref().and_then(|i| i.height),
                    css_class: None,
                },
            ))
        })
        .collect())
}

pub struct ExternalApiStrategy {
    transport: Arc<dyn HttpTransport>,
    credentials: ImageSearchCredentials,
    max_results: usize,
}

impl ExternalApiStrategy {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: ImageSearchCredentials, max_results: usize) -> Self {
        Self {
            transport,
            credentials,
            max_results: max_results.clamp(1, 10),
        }
    }

    fn request_url(&self, query: &str) -> Result<String, ExtractionError> {
        let num = self.max_results.to_string();
        Url::parse_with_params(
            &self.credentials.endpoint,
            [
                ("key", self.credentials.api_key.as_str()),
                ("cx", self.credentials.engine_id.as_str()),
                ("q", query),
                ("searchType", "image"),
                ("num", num.as_str()),
            ],
        )
        .map(|u| u.to_string())
        .map_err(|e| ExtractionError::Request(format!("invalid endpoint: {e}")))
    }

    /// Strip the API key, raw or query-encoded, from a message before it is logged.
    fn redact(&self, message: &str) -> String {
        let key = self.credentials.api_key.as_str();
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        message.replace(key, "<redacted>").replace(&encoded, "<redacted>")
    }
}

#[async_trait]
impl ImageStrategy for ExternalApiStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::ExternalApi
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
        let query = input.descriptor.title.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.request_url(query)?;
        input.limiter.acquire(&url).await;
        let resp = self
            .transport
            .get(&url)
            .await
            .map_err(|e| ExtractionError::Request(self.redact(&e.to_string())))?;
        if !resp.is_success() {
            return Err(ExtractionError::Request(format!("http status {}", resp.status)));
        }

        let mut sink = CandidateSink::new(&input.descriptor.url, self.name());
        for (link, attributes) in parse_search_response(&resp.body)?.into_iter().take(self.max_results) {
            sink.push(&link, attributes);
        }
        Ok(sink.finish())
    }
}

#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub candidates: Vec<ImageCandidate>,
    /// Candidate count per strategy that yielded at least one.
    pub per_strategy: BTreeMap<StrategyName, usize>,
    pub failures: Vec<(StrategyName, String)>,
    pub short_circuited: bool,
}

impl ChainOutcome {
    pub fn successful_strategies(&self) -> BTreeSet<StrategyName> {
        self.per_strategy.keys().copied().collect()
    }
}

/// Runs strategies in priority order until the distinct-image target is reached.
///
/// The external API strategy sits outside the ordered list: when registered it
/// always runs last, whatever the count.
pub struct StrategyChain {
    strategies: Vec<Box<dyn ImageStrategy>>,
    external: Option<Box<dyn ImageStrategy>>,
    target: usize,
}

impl StrategyChain {
    pub fn new(target: usize) -> Self {
        Self {
            strategies: Vec::new(),
            external: None,
            target: target.max(1),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ImageStrategy>) -> Self {
        if strategy.name() == StrategyName::ExternalApi {
            self.external = Some(strategy);
        } else {
            self.strategies.push(strategy);
            self.strategies.sort_by_key(|s| s.name());
        }
        self
    }

    /// Register the built-in strategies named in `enabled`, in priority order.
    ///
    /// `ExternalApi` is only registered when it is enabled and credentials were supplied.
    pub fn standard(
        enabled: &BTreeSet<StrategyName>,
        target: usize,
        mut external: Option<ExternalApiStrategy>,
    ) -> Self {
        let mut chain = Self::new(target);
        for name in StrategyName::ALL {
            if !enabled.contains(&name) {
                continue;
            }
            let strategy: Box<dyn ImageStrategy> = match name {
                StrategyName::FeedEmbedded => Box::new(FeedEmbeddedStrategy),
                StrategyName::MetaTag => Box::new(MetaTagStrategy),
                StrategyName::SemanticSelector => Box::new(SemanticSelectorStrategy),
                StrategyName::BackgroundImage => Box::new(BackgroundImageStrategy),
                StrategyName::TextPattern => Box::new(TextPatternStrategy),
                StrategyName::ExternalApi => match external.take() {
                    Some(ext) => Box::new(ext),
                    None => {
                        warn!("external-api strategy requested but no credentials configured; leaving it out");
                        continue;
                    }
                },
            };
            chain = chain.with_strategy(strategy);
        }
        chain
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn strategy_names(&self) -> Vec<StrategyName> {
        self.strategies
            .iter()
            .chain(self.external.iter())
            .map(|s| s.name())
            .collect()
    }

    pub async fn run(&self, input: &ExtractionInput<'_>) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        let mut seen = HashSet::new();

        for strategy in &self.strategies {
            if seen.len() >= self.target {
                debug!(
                    target_images = self.target,
                    next = %strategy.name(),
                    "candidate target reached; skipping remaining strategies"
                );
                outcome.short_circuited = true;
                break;
            }
            Self::run_one(strategy.as_ref(), input, &mut outcome, &mut seen).await;
        }

        if let Some(external) = &self.external {
            Self::run_one(external.as_ref(), input, &mut outcome, &mut seen).await;
        }

        outcome
    }

    async fn run_one(
        strategy: &dyn ImageStrategy,
        input: &ExtractionInput<'_>,
        outcome: &mut ChainOutcome,
        seen: &mut HashSet<String>,
    ) {
        let name = strategy.name();
        match strategy.extract(input).await {
            Ok(candidates) => {
                debug!(strategy = %name, count = candidates.len(), "strategy finished");
                if candidates.is_empty() {
                    return;
                }
                for candidate in &candidates {
                    seen.insert(canonicalize_image_url(&candidate.source_url));
                }
                *outcome.per_strategy.entry(name).or_default() += candidates.len();
                outcome.candidates.extend(candidates);
            }
            Err(err) => {
                warn!(
                    strategy = %name,
                    article_url = %input.descriptor.url,
                    error = %err,
                    "strategy failed; continuing with next"
                );
                outcome.failures.push((name, err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use newsimg_storage::testing::ScriptedTransport;
    use newsimg_storage::TransportError;
    use std::path::{Path, PathBuf};

    const PAGE_URL: &str = "https://www.newsroom.example/africa/lagos-market-fire";

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_page(name: &str) -> String {
        std::fs::read_to_string(workspace_root().join("fixtures/pages").join(name)).expect("read fixture")
    }

    fn html_fetch(body: String) -> FetchResult {
        FetchResult {
            final_url: PAGE_URL.to_string(),
            body,
            payload_kind: PayloadKind::Html,
            http_status: 200,
            fetched_at: Utc::now(),
            used_fallback_variant: false,
        }
    }

    fn descriptor() -> ArticleDescriptor {
        ArticleDescriptor::new(PAGE_URL, "Lagos market traders rebuild after fire")
    }

    fn urls(candidates: &[ImageCandidate]) -> Vec<String> {
        candidates.iter().map(|c| c.source_url.clone()).collect()
    }

    struct FailingStrategy;

    #[async_trait]
    impl ImageStrategy for FailingStrategy {
        fn name(&self) -> StrategyName {
            StrategyName::MetaTag
        }

        async fn extract(&self, _input: &ExtractionInput<'_>) -> Result<Vec<ImageCandidate>, ExtractionError> {
            Err(ExtractionError::Malformed("truncated document".into()))
        }
    }

    #[test]
    fn canonicalize_strips_tracking_params() {
        assert_eq!(
            canonicalize_image_url("https://cdn.example.com/a.jpg?utm_source=x"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            canonicalize_image_url("HTTPS://CDN.Example.com/a.jpg?b=2&ref=home&a=1#top"),
            "https://cdn.example.com/a.jpg?a=1&b=2"
        );
    }

    #[test]
    fn canonicalize_collapses_size_variants() {
        let base = "https://cdn.example.com/wp/2026/03/photo.jpg";
        for variant in [
            "https://cdn.example.com/wp/2026/03/photo-150x150.jpg",
            "https://cdn.example.com/wp/2026/03/photo-1024x683.jpg?w=1024&h=683",
            "https://cdn.example.com/wp/2026/03/photo.jpg?width=600",
            "https://cdn.example.com/wp/2026/03/640x480/photo.jpg",
        ] {
            assert_eq!(canonicalize_image_url(variant), base, "{variant}");
        }
    }

    #[test]
    fn canonicalize_normalizes_trailing_slash() {
        assert_eq!(
            canonicalize_image_url("https://img.example.com/photos/123/"),
            "https://img.example.com/photos/123"
        );
        assert_eq!(canonicalize_image_url("https://img.example.com"), "https://img.example.com/");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for raw in [
            "https://cdn.example.com/a.jpg?utm_source=x",
            "https://CDN.example.com/a-300x200-150x150.JPG?q=hello world&utm_medium=y",
            "https://img.example.com/photos/123/",
            "https://img.example.com/p/800x600/",
            "http://example.com:80/x%20y.png?b=%2F&a=",
            "not a url",
            "data:image/gif;base64,AAAA",
        ] {
            let once = canonicalize_image_url(raw);
            assert_eq!(canonicalize_image_url(&once), once, "{raw}");
        }
    }

    #[test]
    fn resolve_handles_relative_and_rejects_data_uris() {
        assert_eq!(
            resolve_url(PAGE_URL, "/uploads/a.jpg").as_deref(),
            Some("https://www.newsroom.example/uploads/a.jpg")
        );
        assert_eq!(
            resolve_url(PAGE_URL, "//cdn.example.com/a.jpg").as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(resolve_url(PAGE_URL, "data:image/png;base64,AA"), None);
        assert_eq!(resolve_url(PAGE_URL, "  "), None);
    }

    #[test]
    fn srcset_picks_widest_entry() {
        assert_eq!(
            best_srcset_entry("a.jpg 300w, b.jpg 1024w, c.jpg 640w").as_deref(),
            Some("b.jpg")
        );
        assert_eq!(best_srcset_entry("a.jpg 1x, b.jpg 2x").as_deref(), Some("b.jpg"));
        assert_eq!(best_srcset_entry(""), None);
    }

    #[test]
    fn decorative_images_are_filtered() {
        let none = ImageAttributes::default();
        assert!(is_decorative("https://site.example/static/logo.png", &none));
        assert!(is_decorative("https://site.example/img/site-icons/share.png", &none));
        let tiny = ImageAttributes {
            width: Some(1),
            height: Some(1),
            ..Default::default()
        };
        assert!(is_decorative("https://t.example/p.gif", &tiny));
        assert!(!is_decorative("https://cdn.example/photos/silicon-valley.jpg", &none));
    }

    #[tokio::test]
    async fn feed_embedded_reads_descriptor_fields() {
        let mut descriptor = descriptor();
        descriptor.feed_fields.enclosure_url = Some("https://cdn.example.com/a.jpg?utm_source=x".into());
        descriptor.feed_fields.thumbnail_url = Some("/thumbs/a.jpg".into());
        let fetch = html_fetch(String::new());
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let candidates = FeedEmbeddedStrategy.extract(&input).await.unwrap();
        assert_eq!(
            urls(&candidates),
            vec![
                "https://cdn.example.com/a.jpg?utm_source=x".to_string(),
                "https://www.newsroom.example/thumbs/a.jpg".to_string(),
            ]
        );
        assert!(candidates.iter().all(|c| (c.confidence - 0.9).abs() < 1e-9));
    }

    #[tokio::test]
    async fn feed_embedded_scans_feed_payload_media() {
        let body = r#"<?xml version="1.0"?><rss><channel><item>
            <enclosure url="https://cdn.example.com/audio.mp3" type="audio/mpeg" length="1"/>
            <enclosure url="https://cdn.example.com/cover.jpg" type="image/jpeg" length="1"/>
            <media:content url="https://cdn.example.com/wide.jpg" medium="image" width="1600" height="900"/>
            <media:thumbnail url="https://cdn.example.com/thumb.jpg"/>
        </item></channel></rss>"#;
        let mut fetch = html_fetch(body.to_string());
        fetch.payload_kind = PayloadKind::Feed;
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let candidates = FeedEmbeddedStrategy.extract(&input).await.unwrap();
        assert_eq!(
            urls(&candidates),
            vec![
                "https://cdn.example.com/cover.jpg".to_string(),
                "https://cdn.example.com/wide.jpg".to_string(),
                "https://cdn.example.com/thumb.jpg".to_string(),
            ]
        );
        assert_eq!(candidates[1].attributes.width, Some(1600));
    }

    #[tokio::test]
    async fn feed_embedded_only_credits_the_matching_item() {
        let body = r#"<?xml version="1.0"?><rss><channel>
            <item>
                <title>Unrelated story</title>
                <link>https://news.example.com/world/unrelated</link>
                <enclosure url="https://cdn.example.com/unrelated.jpg" type="image/jpeg" length="1"/>
            </item>
            <item>
                <title>Lagos market fire</title>
                <link><![CDATA[https://news.example.com/africa/lagos-market-fire/]]></link>
                <media:content url="https://cdn.example.com/lagos.jpg" medium="image"/>
            </item>
        </channel></rss>"#;
        let mut fetch = html_fetch(body.to_string());
        fetch.payload_kind = PayloadKind::Feed;
        fetch.final_url = "https://news.example.com/feeds/africa.xml".to_string();
        let mut article = descriptor();
        article.url = "https://news.example.com/africa/lagos-market-fire".to_string();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &article, fetch: &fetch, limiter: &limiter };

        let candidates = FeedEmbeddedStrategy.extract(&input).await.unwrap();
        assert_eq!(urls(&candidates), vec!["https://cdn.example.com/lagos.jpg".to_string()]);

        article.url = "https://news.example.com/caribbean/not-in-feed".to_string();
        let input = ExtractionInput { descriptor: &article, fetch: &fetch, limiter: &limiter };
        assert!(FeedEmbeddedStrategy.extract(&input).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn meta_tag_strategy_reads_open_graph_twitter_and_json_ld() {
        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let candidates = MetaTagStrategy.extract(&input).await.unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(
            candidates[0].source_url,
            "https://cdn.newsroom.example/photos/lagos-market.jpg?utm_source=og&utm_medium=social"
        );
        assert_eq!(candidates[0].attributes.width, Some(1200));
        assert_eq!(candidates[0].attributes.alt.as_deref(), Some("Traders at Balogun market"));
        let canon: HashSet<_> = candidates.iter().map(|c| canonicalize_image_url(&c.source_url)).collect();
        assert_eq!(canon.len(), 1);
        assert!(canon.contains("https://cdn.newsroom.example/photos/lagos-market.jpg"));
    }

    #[tokio::test]
    async fn semantic_selector_prefers_srcset_and_lazy_attrs() {
        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let candidates = SemanticSelectorStrategy.extract(&input).await.unwrap();
        assert_eq!(
            urls(&candidates),
            vec![
                "https://cdn.newsroom.example/photos/lagos-market-1024x683.jpg".to_string(),
                "https://www.newsroom.example/uploads/2026/03/trader-portrait.jpg".to_string(),
            ]
        );
        assert_eq!(candidates[0].attributes.alt.as_deref(), Some("Traders restock stalls"));
        assert_eq!(candidates[0].attributes.css_class.as_deref(), Some("wp-image-42"));
    }

    #[tokio::test]
    async fn background_strategy_reads_style_blocks_and_inline_styles() {
        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let candidates = BackgroundImageStrategy.extract(&input).await.unwrap();
        assert_eq!(
            urls(&candidates),
            vec![
                "https://www.newsroom.example/assets/hero/balogun-aerial.webp".to_string(),
                "https://cdn.newsroom.example/photos/night-market.jpg".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn text_pattern_scans_summary_and_description() {
        let mut descriptor = descriptor();
        descriptor.feed_fields.summary =
            Some("See https://photos.example.org/gallery/market.webp?size=l for more.".into());
        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let candidates = TextPatternStrategy.extract(&input).await.unwrap();
        assert_eq!(
            urls(&candidates),
            vec![
                "https://photos.example.org/gallery/market.webp?size=l".to_string(),
                "https://cdn.newsroom.example/photos/stall-close.png".to_string(),
            ]
        );
        assert!(candidates.iter().all(|c| c.strategy == StrategyName::TextPattern));
    }

    #[tokio::test]
    async fn chain_short_circuits_at_target() {
        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let chain = StrategyChain::standard(&StrategyName::free_strategies(), 3, None);
        let outcome = chain.run(&input).await;
        assert!(outcome.short_circuited);
        assert_eq!(outcome.per_strategy.get(&StrategyName::MetaTag), Some(&3));
        assert_eq!(outcome.per_strategy.get(&StrategyName::SemanticSelector), Some(&2));
        assert_eq!(outcome.per_strategy.get(&StrategyName::BackgroundImage), Some(&2));
        assert!(!outcome.per_strategy.contains_key(&StrategyName::TextPattern));
        assert!(!outcome.per_strategy.contains_key(&StrategyName::FeedEmbedded));
    }

    #[tokio::test]
    async fn chain_continues_after_strategy_failure() {
        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let chain = StrategyChain::new(5)
            .with_strategy(Box::new(SemanticSelectorStrategy))
            .with_strategy(Box::new(FailingStrategy));
        assert_eq!(
            chain.strategy_names(),
            vec![StrategyName::MetaTag, StrategyName::SemanticSelector]
        );
        let outcome = chain.run(&input).await;
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, StrategyName::MetaTag);
        assert_eq!(outcome.candidates.len(), 2);
    }

    #[test]
    fn external_strategy_requires_enablement_and_credentials() {
        let mut enabled = StrategyName::free_strategies();
        enabled.insert(StrategyName::ExternalApi);

        let without_creds = StrategyChain::standard(&enabled, 5, None);
        assert!(!without_creds.strategy_names().contains(&StrategyName::ExternalApi));

        let credentials = ImageSearchCredentials::from_parts(Some("key".into()), Some("cx".into()), None).unwrap();
        let external = ExternalApiStrategy::new(Arc::new(ScriptedTransport::new()), credentials.clone(), 5);
        let with_creds = StrategyChain::standard(&enabled, 5, Some(external));
        assert_eq!(with_creds.strategy_names().last(), Some(&StrategyName::ExternalApi));

        let external = ExternalApiStrategy::new(Arc::new(ScriptedTransport::new()), credentials, 5);
        let not_enabled = StrategyChain::standard(&StrategyName::free_strategies(), 5, Some(external));
        assert!(!not_enabled.strategy_names().contains(&StrategyName::ExternalApi));

        assert!(ImageSearchCredentials::from_parts(Some("".into()), Some("cx".into()), None).is_none());
    }

    #[tokio::test]
    async fn external_strategy_runs_after_target_is_reached() {
        let transport = Arc::new(ScriptedTransport::new());
        let credentials = ImageSearchCredentials::from_parts(
            Some("k".into()),
            Some("cx".into()),
            Some("https://search.example/v1".into()),
        )
        .unwrap();
        let external = ExternalApiStrategy::new(transport.clone(), credentials, 2);
        let search_url = external.request_url("Lagos market traders rebuild after fire").unwrap();
        transport.always(
            &search_url,
            Ok(ScriptedTransport::response(
                &search_url,
                200,
                "application/json",
                r#"{"items":[{"link":"https://images.example/lagos.jpg","title":"Lagos","image":{"width":800,"height":600}}]}"#,
            )),
        );

        let fetch = html_fetch(fixture_page("lagos-market-fire.html"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let mut enabled = StrategyName::free_strategies();
        enabled.insert(StrategyName::ExternalApi);
        let outcome = StrategyChain::standard(&enabled, 1, Some(external)).run(&input).await;
        assert!(outcome.short_circuited);
        assert_eq!(outcome.per_strategy.get(&StrategyName::ExternalApi), Some(&1));
        let last = outcome.candidates.last().unwrap();
        assert_eq!(last.source_url, "https://images.example/lagos.jpg");
        assert_eq!(last.attributes.width, Some(800));
    }

    #[tokio::test]
    async fn external_strategy_failure_never_reports_api_key() {
        let transport = Arc::new(ScriptedTransport::new());
        let credentials = ImageSearchCredentials::from_parts(
            Some("SECRET+key/123".into()),
            Some("engine".into()),
            Some("https://search.example/v1".into()),
        )
        .unwrap();
        let external = ExternalApiStrategy::new(transport.clone(), credentials, 3);
        let search_url = external.request_url("Lagos market traders rebuild after fire").unwrap();
        transport.always(
            &search_url,
            Err(TransportError::Connect(format!("error sending request for url ({search_url})"))),
        );

        let fetch = html_fetch(String::from("<html><body></body></html>"));
        let descriptor = descriptor();
        let limiter = HostRateLimiter::unlimited();
        let input = ExtractionInput { descriptor: &descriptor, fetch: &fetch, limiter: &limiter };

        let outcome = StrategyChain::new(5).with_strategy(Box::new(external)).run(&input).await;
        assert_eq!(outcome.failures.len(), 1);
        let (name, message) = &outcome.failures[0];
        assert_eq!(*name, StrategyName::ExternalApi);
        assert!(message.contains("<redacted>"), "{message}");
        assert!(!message.contains("SECRET"), "{message}");
    }

    #[test]
    fn search_response_parsing_tolerates_missing_fields() {
        let parsed = parse_search_response(br#"{"items":[{"title":"no link"},{"link":"https://i.example/a.png"}]}"#)
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parse_search_response(b"{}").unwrap().is_empty());
        assert!(parse_search_response(b"<html>").is_err());
    }
}
