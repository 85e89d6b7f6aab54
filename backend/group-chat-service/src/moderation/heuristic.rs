use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords that push toxicity over the flag threshold on a single hit
const TOXIC_KEYWORDS: &[&str] = &[
    "idiot",
    "stupid",
    "moron",
    "loser",
    "shut up",
    "hate you",
    "kill yourself",
    "retard",
    "bastard",
    "asshole",
    "bitch",
    "fuck",
];

const SPAM_KEYWORDS: &[&str] = &[
    "buy now",
    "click here",
    "free money",
    "free gift",
    "limited offer",
    "promo code",
    "discount code",
    "make money fast",
    "earn money",
    "crypto giveaway",
    "check out my channel",
    "subscribe to my",
    "dm me for",
];

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://|www\.)[^\s]+").expect("URL regex pattern is valid")
});

static SHOUTING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{4,}\b").expect("Caps regex pattern is valid"));

static AGGRESSIVE_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[!?]{3,}").expect("Punctuation regex pattern is valid"));

static REASONING_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:how|why|because|consider)\b").expect("Reasoning regex pattern is valid")
});

/// Local signal scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalScores {
    pub toxicity: f32,
    pub spam: f32,
    pub quality: f32,
}

impl SignalScores {
    pub fn clamped(self) -> Self {
        Self {
            toxicity: self.toxicity.clamp(0.0, 1.0),
            spam: self.spam.clamp(0.0, 1.0),
            quality: self.quality.clamp(0.0, 1.0),
        }
    }
}

/// Synchronous text scorer
pub trait TextScorer: Send + Sync {
    fn score(&self, text: Option<&str>) -> SignalScores;
}

/// Keyword and pattern based scorer.
///
/// Pure and deterministic: the same text always yields the same scores.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    fn toxicity(&self, text: &str, lower: &str) -> f32 {
        let mut score = 0.7 * count_keywords(lower, TOXIC_KEYWORDS) as f32;

        if SHOUTING_PATTERN.is_match(text) {
            score += 0.1;
        }
        if AGGRESSIVE_PUNCTUATION.is_match(text) {
            score += 0.1;
        }

        score
    }

    fn spam(&self, text: &str, lower: &str) -> f32 {
        let mut score = 0.2 * count_keywords(lower, SPAM_KEYWORDS) as f32;

        if URL_PATTERN.find_iter(text).count() >= 2 {
            score += 0.3;
        }
        if longest_char_run(text) >= 7 {
            score += 0.2;
        }

        score
    }

    fn quality(&self, text: &str) -> f32 {
        let length = text.chars().count();

        if length > 140 && REASONING_WORDS.is_match(text) {
            0.7
        } else if length > 200 {
            0.6
        } else {
            0.0
        }
    }
}

impl TextScorer for HeuristicScorer {
    fn score(&self, text: Option<&str>) -> SignalScores {
        let text = match text {
            Some(t) if !t.is_empty() => t,
            _ => return SignalScores::default(),
        };
        let lower = text.to_lowercase();

        let scores = SignalScores {
            toxicity: self.toxicity(text, &lower),
            spam: self.spam(text, &lower),
            quality: self.quality(text),
        }
        .clamped();

        tracing::trace!(
            toxicity = scores.toxicity,
            spam = scores.spam,
            quality = scores.quality,
            "heuristic scores"
        );

        scores
    }
}

/// Number of distinct keywords found as substrings
fn count_keywords(lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| lower.contains(*k)).count()
}

/// Length of the longest run of one repeated character
fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;

    for c in text.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }

    longest
}
