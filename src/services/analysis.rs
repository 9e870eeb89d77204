//! Lead analysis.
//!
//! The pipeline only depends on the [`Analyzer`] trait; [`KeywordAnalyzer`] is
//! the built-in implementation based on keyword and intent-phrase matching.
//! [`CachingAnalyzer`] puts the persistent result cache in front of any
//! analyzer.

use std::sync::{Arc, OnceLock};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::Store;

/// What the analyzer knows about the search an item belongs to.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub keywords: Vec<String>,
    /// Extra intent patterns (regular expressions) configured on the search.
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub matched_keywords: Vec<String>,
    pub detected_pattern: Option<String>,
    pub opportunity_type: Option<String>,
    /// 0.0 to 1.0
    pub relevance_score: f64,
}

#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    /// Returns `None` when the text is not a lead.
    async fn analyze(
        &self,
        text: &str,
        context: &AnalysisContext,
    ) -> anyhow::Result<Option<AnalysisResult>>;
}

const INTENT_PATTERNS: &[&str] = &[
    r"\blooking\s+for\b",
    r"\bneed\s+(?:a|an|some)\b",
    r"\bsearching\s+for\b",
    r"\bseeking\b",
    r"\bhiring\b",
    r"\brecruiting\b",
    r"\b(?:anyone|does\s+anyone)\s+know\s+(?:a|an|of)\b",
    r"\brecommendations?\s+for\b",
    r"\bcan\s+(?:anyone|someone)\s+recommend\b",
    r"\bwhere\s+(?:can\s+i|to)\s+find\b",
    r"\balternatives?\s+to\b",
    r"\btrying\s+to\s+find\b",
    r"\bin\s+(?:need|search)\s+of\b",
];

struct IntentRegex {
    intents: Vec<Regex>,
    hiring: Option<Regex>,
    urgency: Option<Regex>,
}

fn intent_regex() -> &'static IntentRegex {
    static REGEX: OnceLock<IntentRegex> = OnceLock::new();
    REGEX.get_or_init(|| IntentRegex {
        intents: INTENT_PATTERNS
            .iter()
            .filter_map(|p| case_insensitive(p))
            .collect(),
        hiring: case_insensitive(r"\b(?:hiring|recruiting|to\s+hire)\b"),
        urgency: case_insensitive(r"\b(?:urgent(?:ly)?|asap|immediately)\b"),
    })
}

fn case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

/// Matches search keywords on word boundaries and looks for intent phrases.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    fn matched_keywords(text: &str, keywords: &[String]) -> Vec<String> {
        keywords
            .iter()
            .filter(|kw| !kw.trim().is_empty())
            .filter(|kw| {
                case_insensitive(&format!(r"\b{}\b", regex::escape(kw.trim())))
                    .is_some_and(|re| re.is_match(text))
            })
            .cloned()
            .collect()
    }

    fn detect_pattern(text: &str, custom: &[String]) -> Option<String> {
        let custom_regex = custom.iter().filter_map(|p| {
            let re = case_insensitive(p);
            if re.is_none() {
                warn!(pattern = %p, "Ignoring invalid search pattern");
            }
            re
        });

        intent_regex()
            .intents
            .iter()
            .cloned()
            .chain(custom_regex)
            .find_map(|re| re.find(text).map(|m| m.as_str().to_string()))
    }
}

#[async_trait::async_trait]
impl Analyzer for KeywordAnalyzer {
    #[allow(clippy::cast_precision_loss)]
    async fn analyze(
        &self,
        text: &str,
        context: &AnalysisContext,
    ) -> anyhow::Result<Option<AnalysisResult>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let matched = Self::matched_keywords(text, &context.keywords);
        let pattern = Self::detect_pattern(text, &context.patterns);

        let is_lead = if context.keywords.is_empty() {
            pattern.is_some()
        } else {
            !matched.is_empty()
        };

        if !is_lead {
            return Ok(None);
        }

        let keyword_share = if context.keywords.is_empty() {
            0.0
        } else {
            matched.len() as f64 / context.keywords.len() as f64
        };

        let regex = intent_regex();
        let urgent = regex.urgency.as_ref().is_some_and(|re| re.is_match(text));

        let mut score = keyword_share * 0.7;
        if pattern.is_some() {
            score += 0.3;
        }
        if urgent {
            score += 0.1;
        }

        let opportunity_type = if regex.hiring.as_ref().is_some_and(|re| re.is_match(text)) {
            Some("hiring".to_string())
        } else if urgent {
            Some("urgent_need".to_string())
        } else {
            pattern.as_ref().map(|_| "looking_for".to_string())
        };

        Ok(Some(AnalysisResult {
            matched_keywords: matched,
            detected_pattern: pattern,
            opportunity_type,
            relevance_score: score.min(1.0),
        }))
    }
}

/// Cache type recorded for lead classification results.
pub const CLASSIFICATION_CACHE: &str = "classification";

/// SHA-256 over the cache type, the search context and the normalized text.
///
/// Keyword verdicts depend on the search, so the keywords and patterns are
/// part of the key; text is trimmed and lowercased.
#[must_use]
pub fn cache_key(cache_type: &str, text: &str, context: &AnalysisContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cache_type.as_bytes());
    hasher.update(b":");
    for keyword in &context.keywords {
        hasher.update(keyword.trim().to_lowercase().as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update(b":");
    for pattern in &context.patterns {
        hasher.update(pattern.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update(b":");
    hasher.update(text.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serves verdicts from the `analysis_cache` table and stores new ones.
///
/// Cache failures never fail an analysis; they are logged and the wrapped
/// analyzer is used instead.
pub struct CachingAnalyzer {
    inner: Arc<dyn Analyzer>,
    store: Store,
    cache_type: &'static str,
}

impl CachingAnalyzer {
    #[must_use]
    pub fn new(inner: Arc<dyn Analyzer>, store: Store) -> Self {
        Self {
            inner,
            store,
            cache_type: CLASSIFICATION_CACHE,
        }
    }

    async fn lookup(&self, key: &str) -> Option<Option<AnalysisResult>> {
        let hit = match self.store.get_cached_analysis(key, self.cache_type).await {
            Ok(hit) => hit?,
            Err(e) => {
                warn!(error = %e, "Analysis cache lookup failed");
                return None;
            }
        };

        match hit
            .result
            .as_deref()
            .map(serde_json::from_str::<AnalysisResult>)
            .transpose()
        {
            Ok(result) => {
                debug!(
                    cache_type = self.cache_type,
                    use_count = hit.use_count,
                    "Analysis cache hit"
                );
                Some(result)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cached analysis");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Analyzer for CachingAnalyzer {
    async fn analyze(
        &self,
        text: &str,
        context: &AnalysisContext,
    ) -> anyhow::Result<Option<AnalysisResult>> {
        if text.trim().is_empty() {
            return self.inner.analyze(text, context).await;
        }

        let key = cache_key(self.cache_type, text, context);
        if let Some(cached) = self.lookup(&key).await {
            metrics::counter!("analysis_cache_hits_total").increment(1);
            return Ok(cached);
        }
        metrics::counter!("analysis_cache_misses_total").increment(1);

        let result = self.inner.analyze(text, context).await?;

        let stored = result.as_ref().map(serde_json::to_string).transpose()?;
        if let Err(e) = self
            .store
            .set_cached_analysis(&key, self.cache_type, stored, text)
            .await
        {
            warn!(error = %e, "Failed to store analysis in cache");
        }

        Ok(result)
    }
}
