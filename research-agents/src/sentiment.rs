//! Sentiment Agent - turns news tone attached to a market into a probability opinion
//!
//! This agent reads the headlines in the market context and:
//! - Matches them to the market's categories by keyword
//! - Scores them by GDELT-style tone and a small keyword lexicon
//! - Shifts the market baseline by the combined score
//!
//! Confidence grows with the number of relevant headlines and with how
//! consistent their tone is.

use crate::agent::Agent;
use async_trait::async_trait;
use common::{AgentSignal, MarketContext, NewsHeadline, SignalDirection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const NEGATIVE_WORDS: &[&str] = &[
    "crisis", "crash", "drop", "fall", "decline", "decrease", "loss", "fail", "bad", "negative",
    "worst", "downward", "bearish", "sell", "dump", "collapse", "risk", "danger", "threat",
    "attack", "war", "conflict", "inflation", "recession", "delay", "reject", "blocked",
];

const POSITIVE_WORDS: &[&str] = &[
    "growth", "rise", "increase", "gain", "profit", "success", "good", "positive", "best",
    "upward", "bullish", "buy", "recovery", "boom", "breakthrough", "win", "victory", "peace",
    "agreement", "deal", "approve", "approved", "passes", "lead", "surge",
];

/// Sentiment score with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentScore {
    pub score: f64,      // -1.0 (very negative) to 1.0 (very positive)
    pub magnitude: f64,  // 0.0 (neutral) to 1.0 (strong)
    pub confidence: f64, // 0.0 to 1.0
    pub headline_count: u32,
}

/// Sentiment agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentAgentConfig {
    pub enabled: bool,
    pub name: String,
    pub min_headlines_threshold: u32,
    /// Scores weaker than this produce no opinion
    pub sentiment_threshold: f64,
    pub keyword_weight: f64,
    pub tone_weight: f64,
    /// Largest shift away from the baseline a full-strength score produces
    pub max_shift: f64,
    /// Shifts within this band of the baseline are reported as neutral
    pub neutral_band: f64,
    pub category_keywords: HashMap<String, Vec<String>>,
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for SentimentAgentConfig {
    fn default() -> Self {
        let mut category_keywords: HashMap<String, Vec<String>> = HashMap::new();

        category_keywords.insert("politics".to_string(), keywords(&[
            "election", "vote", "president", "congress", "senate", "campaign", "republican",
            "democrat", "policy", "government", "legislation", "white house", "capitol",
        ]));

        category_keywords.insert("economics".to_string(), keywords(&[
            "inflation", "gdp", "economy", "recession", "unemployment", "interest rate",
            "federal reserve", "fed", "stock market", "crypto", "bitcoin", "ethereum", "finance",
        ]));

        category_keywords.insert("geopolitics".to_string(), keywords(&[
            "war", "conflict", "invasion", "military", "sanctions", "diplomacy", "treaty",
            "nuclear", "ceasefire", "summit",
        ]));

        category_keywords.insert("technology".to_string(), keywords(&[
            "ai", "artificial intelligence", "tech", "software", "startup", "innovation",
            "cybersecurity", "cloud", "platform", "regulation", "antitrust",
        ]));

        category_keywords.insert("climate".to_string(), keywords(&[
            "climate", "warming", "carbon", "emissions", "renewable", "energy", "solar",
            "weather", "disaster", "green",
        ]));

        Self {
            enabled: true,
            name: "sentiment".to_string(),
            min_headlines_threshold: 3,
            sentiment_threshold: 0.2,
            keyword_weight: 0.6,
            tone_weight: 0.4,
            max_shift: 0.15,
            neutral_band: 0.02,
            category_keywords,
        }
    }
}

/// Sentiment Agent - analyzes news for market sentiment
pub struct SentimentAgent {
    config: SentimentAgentConfig,
}

impl SentimentAgent {
    pub fn new(config: SentimentAgentConfig) -> Self {
        Self { config }
    }

    /// Calculate sentiment from headlines using tone and keywords
    fn calculate_sentiment(&self, headlines: &[&NewsHeadline]) -> SentimentScore {
        if headlines.is_empty() {
            return SentimentScore {
                score: 0.0,
                magnitude: 0.0,
                confidence: 0.0,
                headline_count: 0,
            };
        }

        let headline_count = headlines.len() as u32;
        let threshold = self.config.min_headlines_threshold.max(1);

        // GDELT-style tone is -100 to +100
        let avg_tone = headlines.iter().map(|h| h.tone).sum::<f64>() / headlines.len() as f64;
        let tone_sentiment = (avg_tone / 100.0).clamp(-1.0, 1.0);

        let keyword_sentiment = self.calculate_keyword_sentiment(headlines);

        let score = tone_sentiment * self.config.tone_weight + keyword_sentiment * self.config.keyword_weight;
        let magnitude = score.abs();

        let confidence = if headline_count >= threshold {
            let count_factor = (headline_count as f64 / threshold as f64).min(2.0) / 2.0;
            let tone_jumps = headlines
                .windows(2)
                .map(|w| (w[0].tone - w[1].tone).abs() / 100.0)
                .sum::<f64>();
            let consistency_factor = 1.0 - tone_jumps / headlines.len().saturating_sub(1).max(1) as f64;
            (count_factor + consistency_factor) / 2.0
        } else {
            (headline_count as f64 / threshold as f64).max(0.1)
        };

        SentimentScore {
            score: score.clamp(-1.0, 1.0),
            magnitude: magnitude.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            headline_count,
        }
    }

    /// Lexicon score in [-1, 1]: (positive hits - negative hits) / hits
    fn calculate_keyword_sentiment(&self, headlines: &[&NewsHeadline]) -> f64 {
        let mut total_score = 0.0;
        let mut total_words = 0.0;

        for headline in headlines {
            for word in tokens(&headline.title) {
                if NEGATIVE_WORDS.contains(&word.as_str()) {
                    total_score -= 1.0;
                    total_words += 1.0;
                } else if POSITIVE_WORDS.contains(&word.as_str()) {
                    total_score += 1.0;
                    total_words += 1.0;
                }
            }
        }

        if total_words > 0.0 {
            let result: f64 = total_score / total_words;
            result.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Categories the market belongs to, by tag name or keyword in its text
    fn match_categories(&self, market: &MarketContext) -> Vec<&str> {
        let text = format!("{} {}", market.question, market.description).to_lowercase();
        let mut categories: Vec<&str> = self
            .config
            .category_keywords
            .iter()
            .filter(|(category, words)| {
                market.has_tag(category) || words.iter().any(|kw| contains_keyword(&text, kw))
            })
            .map(|(category, _)| category.as_str())
            .collect();
        categories.sort_unstable();
        categories
    }

    /// Headlines mentioning any keyword of the market's categories.
    ///
    /// A market without a known category keeps all of its headlines.
    fn relevant_headlines<'a>(&self, market: &'a MarketContext, categories: &[&str]) -> Vec<&'a NewsHeadline> {
        if categories.is_empty() {
            return market.headlines.iter().collect();
        }

        market
            .headlines
            .iter()
            .filter(|headline| {
                let title = headline.title.to_lowercase();
                categories
                    .iter()
                    .filter_map(|c| self.config.category_keywords.get(*c))
                    .flatten()
                    .any(|kw| contains_keyword(&title, kw))
            })
            .collect()
    }

    /// Most frequent category keywords across the headlines
    fn extract_themes(&self, headlines: &[&NewsHeadline], categories: &[&str], limit: usize) -> Vec<String> {
        let mut theme_counts: HashMap<&str, u32> = HashMap::new();

        for headline in headlines {
            let title = headline.title.to_lowercase();
            for kw in categories
                .iter()
                .filter_map(|c| self.config.category_keywords.get(*c))
                .flatten()
            {
                if contains_keyword(&title, kw) {
                    *theme_counts.entry(kw.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut themes: Vec<(&str, u32)> = theme_counts.into_iter().collect();
        themes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        themes.into_iter().take(limit).map(|(t, _)| t.to_string()).collect()
    }
}

#[async_trait]
impl Agent for SentimentAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn analyze(&self, market: Arc<MarketContext>) -> anyhow::Result<Vec<AgentSignal>> {
        let categories = self.match_categories(&market);
        let relevant = self.relevant_headlines(&market, &categories);

        if relevant.is_empty() {
            debug!("No relevant headlines for market {}", market.market_id);
            return Ok(Vec::new());
        }

        let sentiment = self.calculate_sentiment(&relevant);

        if sentiment.magnitude < self.config.sentiment_threshold {
            debug!(
                "Sentiment magnitude {:.3} below threshold {} for market {}",
                sentiment.magnitude, self.config.sentiment_threshold, market.market_id
            );
            return Ok(Vec::new());
        }

        let baseline = market.baseline_probability;
        let probability = (baseline + sentiment.score * self.config.max_shift).clamp(0.0, 1.0);
        let direction = SignalDirection::from_edge(probability, baseline, self.config.neutral_band);

        let mut drivers = self.extract_themes(&relevant, &categories, 5);
        drivers.push(if sentiment.score >= 0.0 {
            "positive news tone".to_string()
        } else {
            "negative news tone".to_string()
        });

        let reasoning = format!(
            "{} relevant headline(s) with sentiment {:+.2}; shifting market price {:.2} to {:.2}",
            sentiment.headline_count, sentiment.score, baseline, probability
        );

        Ok(vec![AgentSignal::new(
            self.config.name.clone(),
            market.market_id.clone(),
            probability,
            sentiment.confidence,
            direction,
        )
        .with_drivers(drivers)
        .with_reasoning(reasoning)])
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Whole-word (or whole-phrase) match of a lowercase keyword in lowercase text
fn contains_keyword(text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return text.contains(keyword);
    }
    text.split(|c: char| !c.is_alphanumeric()).any(|w| w == keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> SentimentAgent {
        SentimentAgent::new(SentimentAgentConfig::default())
    }

    fn election_market(headlines: Vec<NewsHeadline>) -> Arc<MarketContext> {
        Arc::new(
            MarketContext::new("m1", "Will the incumbent win the election?", 0.5)
                .with_tags(["Politics"])
                .with_headlines(headlines),
        )
    }

    #[test]
    fn test_calculate_sentiment_empty() {
        let sentiment = agent().calculate_sentiment(&[]);
        assert_eq!(sentiment.headline_count, 0);
        assert_eq!(sentiment.confidence, 0.0);
    }

    #[test]
    fn test_keyword_sentiment_counts_whole_words() {
        let a = NewsHeadline::new("Campaign gains momentum after debate victory", 0.0);
        let b = NewsHeadline::new("Global warming report released", 0.0);
        let agent = agent();
        assert_eq!(agent.calculate_keyword_sentiment(&[&a]), 1.0);
        // "warming" must not count as "war"
        assert_eq!(agent.calculate_keyword_sentiment(&[&b]), 0.0);
    }

    #[test]
    fn test_extract_themes() {
        let headlines = [
            NewsHeadline::new("Election polls tighten", 10.0),
            NewsHeadline::new("Senate vote on election rules", 5.0),
        ];
        let refs: Vec<&NewsHeadline> = headlines.iter().collect();
        let themes = agent().extract_themes(&refs, &["politics"], 5);
        assert_eq!(themes[0], "election");
        assert!(themes.contains(&"senate".to_string()));
    }

    #[tokio::test]
    async fn test_positive_news_shifts_probability_up() {
        let market = election_market(vec![
            NewsHeadline::new("Incumbent campaign surges, wins key endorsement in election", 60.0),
            NewsHeadline::new("Election poll shows growth in support", 55.0),
            NewsHeadline::new("Campaign celebrates fundraising success", 65.0),
        ]);

        let signals = agent().analyze(market).await.unwrap();
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert!(signal.probability > 0.5);
        assert!(signal.probability <= 0.65);
        assert_eq!(signal.direction, SignalDirection::Bullish);
        assert!(signal.confidence > 0.5);
        assert!(signal.key_drivers.contains(&"positive news tone".to_string()));
    }

    #[tokio::test]
    async fn test_negative_news_shifts_probability_down() {
        let market = election_market(vec![
            NewsHeadline::new("Campaign in crisis as election support collapses", -70.0),
            NewsHeadline::new("Vote count delay raises risk of election loss", -40.0),
        ]);

        let signals = agent().analyze(market).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].probability < 0.5);
        assert_eq!(signals[0].direction, SignalDirection::Bearish);
    }

    #[tokio::test]
    async fn test_no_headlines_means_no_opinion() {
        let signals = agent().analyze(election_market(Vec::new())).await.unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_weak_sentiment_means_no_opinion() {
        let market = election_market(vec![NewsHeadline::new("Election schedule published", 2.0)]);
        let signals = agent().analyze(market).await.unwrap();
        assert!(signals.is_empty());
    }
}
