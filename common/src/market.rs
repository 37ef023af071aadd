use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of one market handed to every producer in a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub market_id: String,
    pub question: String,
    #[serde(default)]
    pub description: String,
    /// Current market-implied probability of the YES outcome (0.0 to 1.0)
    pub baseline_probability: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub headlines: Vec<NewsHeadline>,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl MarketContext {
    pub fn new(market_id: impl Into<String>, question: impl Into<String>, baseline_probability: f64) -> Self {
        Self {
            market_id: market_id.into(),
            question: question.into(),
            description: String::new(),
            baseline_probability: baseline_probability.clamp(0.0, 1.0),
            tags: Vec::new(),
            headlines: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_headlines(mut self, headlines: Vec<NewsHeadline>) -> Self {
        self.headlines = headlines;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// True if any tag matches `tag`, ignoring case
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A news item attached to the market context by the ingestion layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsHeadline {
    pub title: String,
    /// GDELT-style tone, -100 (very negative) to +100 (very positive)
    #[serde(default)]
    pub tone: f64,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewsHeadline {
    pub fn new(title: impl Into<String>, tone: f64) -> Self {
        Self {
            title: title.into(),
            tone,
            source: None,
        }
    }
}
