use std::sync::Arc;

use super::heuristic::{HeuristicScorer, TextScorer};
use super::oracle::{ModerationOracle, OracleOutcome};
use crate::metrics::ORACLE_REQUESTS_TOTAL;
use crate::models::{ModerationAction, ModerationFlag, ModerationScores};

/// Any combined score at or above this raises the matching flag
pub const FLAG_THRESHOLD: f32 = 0.6;
pub const SEVERE_TOXICITY: f32 = 0.85;
pub const SEVERE_SPAM: f32 = 0.85;
pub const SEVERE_FLOOD: f32 = 0.9;
pub const HIGHLIGHT_QUALITY: f32 = 0.85;
/// Shorter texts are never sent to the oracle
pub const MIN_ORACLE_TEXT_CHARS: usize = 6;

/// Outcome of the policy, before it is applied to the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    None,
    Warn,
    Mute,
    Highlight,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::None => "none",
            Decision::Warn => "warn",
            Decision::Mute => "mute",
            Decision::Highlight => "highlight",
        }
    }

    /// Action recorded on the message for this decision
    pub fn action(&self) -> ModerationAction {
        match self {
            Decision::None => ModerationAction::None,
            Decision::Warn => ModerationAction::Warned,
            Decision::Mute => ModerationAction::Muted,
            Decision::Highlight => ModerationAction::Highlighted,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub text: Option<&'a str>,
    pub group_topic: &'a str,
    pub flood_count: usize,
    pub flood_limit: Option<u32>,
    pub ai_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub flags: Vec<ModerationFlag>,
    pub scores: ModerationScores,
    pub flood: f32,
    pub note: Option<String>,
    pub oracle_consulted: bool,
}

impl Evaluation {
    pub fn is_noop(&self) -> bool {
        self.decision == Decision::None && self.flags.is_empty()
    }
}

/// Combines local heuristics, the optional oracle and flood pressure into
/// flags and a single action
pub struct ModerationEvaluator {
    scorer: Arc<dyn TextScorer>,
    oracle: Option<Arc<dyn ModerationOracle>>,
}

impl ModerationEvaluator {
    pub fn new(scorer: Arc<dyn TextScorer>, oracle: Option<Arc<dyn ModerationOracle>>) -> Self {
        Self { scorer, oracle }
    }

    pub fn heuristic_only() -> Self {
        Self::new(Arc::new(HeuristicScorer::new()), None)
    }

    pub fn with_oracle(oracle: Arc<dyn ModerationOracle>) -> Self {
        Self::new(Arc::new(HeuristicScorer::new()), Some(oracle))
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    pub async fn evaluate(&self, input: EvaluationInput<'_>) -> Evaluation {
        let heuristic = self.scorer.score(input.text);
        let oracle = self.consult_oracle(&input).await;

        let oracle_scores = oracle.as_ref().and_then(|o| o.scores());
        let scores = ModerationScores {
            toxicity: heuristic
                .toxicity
                .max(oracle_scores.map(|o| o.toxicity).unwrap_or(0.0)),
            spam: heuristic
                .spam
                .max(oracle_scores.map(|o| o.spam).unwrap_or(0.0)),
            off_topic: oracle_scores.map(|o| o.off_topic).unwrap_or(0.0),
            quality: heuristic
                .quality
                .max(oracle_scores.map(|o| o.quality).unwrap_or(0.0)),
        };
        let flood = flood_score(input.flood_count, input.flood_limit);

        let flags = raise_flags(&scores, flood);
        let decision = decide(&scores, flood, &flags);

        let note = match &oracle {
            Some(OracleOutcome::Scored(s)) => s.note.clone(),
            Some(OracleOutcome::Unavailable(reason)) => {
                Some(format!("heuristic (oracle unavailable: {reason})"))
            }
            None => Some("heuristic".to_string()),
        };

        Evaluation {
            decision,
            flags,
            scores,
            flood,
            note,
            oracle_consulted: oracle.is_some(),
        }
    }

    async fn consult_oracle(&self, input: &EvaluationInput<'_>) -> Option<OracleOutcome> {
        let oracle = self.oracle.as_ref()?;
        if !input.ai_enabled {
            return None;
        }

        let text = input.text.map(str::trim).unwrap_or_default();
        if text.chars().count() < MIN_ORACLE_TEXT_CHARS {
            ORACLE_REQUESTS_TOTAL.with_label_values(&["skipped"]).inc();
            return None;
        }

        Some(oracle.evaluate(text, input.group_topic).await)
    }
}

/// Ratio of messages in the window to the limit, clamped to [0, 1]
pub fn flood_score(count: usize, limit: Option<u32>) -> f32 {
    match limit {
        Some(limit) if limit > 0 => (count as f32 / limit as f32).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn raise_flags(scores: &ModerationScores, flood: f32) -> Vec<ModerationFlag> {
    let mut flags = Vec::new();
    if scores.spam >= FLAG_THRESHOLD {
        flags.push(ModerationFlag::Spam);
    }
    if scores.toxicity >= FLAG_THRESHOLD {
        flags.push(ModerationFlag::Toxic);
    }
    if scores.off_topic >= FLAG_THRESHOLD {
        flags.push(ModerationFlag::OffTopic);
    }
    if flood >= FLAG_THRESHOLD {
        flags.push(ModerationFlag::Flood);
    }
    flags
}

/// Severity first, then any flag, then quality
fn decide(scores: &ModerationScores, flood: f32, flags: &[ModerationFlag]) -> Decision {
    if scores.toxicity >= SEVERE_TOXICITY || scores.spam >= SEVERE_SPAM || flood >= SEVERE_FLOOD {
        Decision::Mute
    } else if !flags.is_empty() {
        Decision::Warn
    } else if scores.quality >= HIGHLIGHT_QUALITY {
        Decision::Highlight
    } else {
        Decision::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::oracle::{MockModerationOracle, OracleScores};

    fn input(text: &str) -> EvaluationInput<'_> {
        EvaluationInput {
            text: Some(text),
            group_topic: "Rust programming",
            flood_count: 1,
            flood_limit: Some(8),
            ai_enabled: true,
        }
    }

    fn scored(spam: f32, toxicity: f32, off_topic: f32, quality: f32) -> OracleOutcome {
        OracleOutcome::Scored(OracleScores {
            spam,
            toxicity,
            off_topic,
            quality,
            note: Some("oracle note".to_string()),
        })
    }

    #[tokio::test]
    async fn test_insult_with_punctuation_warns() {
        let evaluator = ModerationEvaluator::heuristic_only();
        let eval = evaluator.evaluate(input("you are an idiot!!!")).await;

        assert_eq!(eval.flags, vec![ModerationFlag::Toxic]);
        assert_eq!(eval.decision, Decision::Warn);
        assert!(!eval.oracle_consulted);
        assert_eq!(eval.note.as_deref(), Some("heuristic"));
    }

    #[tokio::test]
    async fn test_two_toxic_keywords_mute() {
        let evaluator = ModerationEvaluator::heuristic_only();
        let eval = evaluator.evaluate(input("shut up you moron")).await;

        assert_eq!(eval.scores.toxicity, 1.0);
        assert_eq!(eval.decision, Decision::Mute);
    }

    #[tokio::test]
    async fn test_flood_over_limit_mutes() {
        let evaluator = ModerationEvaluator::heuristic_only();
        let eval = evaluator
            .evaluate(EvaluationInput {
                flood_count: 9,
                ..input("hello again")
            })
            .await;

        assert_eq!(eval.flood, 1.0);
        assert_eq!(eval.flags, vec![ModerationFlag::Flood]);
        assert_eq!(eval.decision, Decision::Mute);
    }

    #[tokio::test]
    async fn test_clean_message_is_noop() {
        let evaluator = ModerationEvaluator::heuristic_only();
        let eval = evaluator.evaluate(input("good morning everyone")).await;

        assert!(eval.is_noop());
        assert_eq!(eval.scores, ModerationScores::default());
    }

    #[tokio::test]
    async fn test_oracle_scores_are_combined_with_max() {
        let mut oracle = MockModerationOracle::new();
        oracle
            .expect_evaluate()
            .withf(|text, topic| {
                text.to_string() == "let's talk about cooking"
                    && topic.to_string() == "Rust programming"
            })
            .times(1)
            .returning(|_, _| scored(0.1, 0.2, 0.7, 0.3));

        let evaluator = ModerationEvaluator::with_oracle(Arc::new(oracle));
        let eval = evaluator.evaluate(input("let's talk about cooking")).await;

        assert_eq!(eval.scores.off_topic, 0.7);
        assert_eq!(eval.scores.toxicity, 0.2);
        assert_eq!(eval.flags, vec![ModerationFlag::OffTopic]);
        assert_eq!(eval.decision, Decision::Warn);
        assert_eq!(eval.note.as_deref(), Some("oracle note"));
        assert!(eval.oracle_consulted);
    }

    #[tokio::test]
    async fn test_high_quality_is_highlighted() {
        let mut oracle = MockModerationOracle::new();
        oracle
            .expect_evaluate()
            .returning(|_, _| scored(0.0, 0.0, 0.1, 0.9));

        let evaluator = ModerationEvaluator::with_oracle(Arc::new(oracle));
        let eval = evaluator
            .evaluate(input("Consider pinning the future before polling it"))
            .await;

        assert!(eval.flags.is_empty());
        assert_eq!(eval.decision, Decision::Highlight);
    }

    #[tokio::test]
    async fn test_severity_overrides_quality() {
        let mut oracle = MockModerationOracle::new();
        oracle
            .expect_evaluate()
            .returning(|_, _| scored(0.9, 0.0, 0.0, 0.95));

        let evaluator = ModerationEvaluator::with_oracle(Arc::new(oracle));
        let eval = evaluator.evaluate(input("a long and thoughtful ad")).await;

        assert_eq!(eval.decision, Decision::Mute);
        assert_eq!(eval.flags, vec![ModerationFlag::Spam]);
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back_to_heuristics() {
        let mut oracle = MockModerationOracle::new();
        oracle
            .expect_evaluate()
            .returning(|_, _| OracleOutcome::Unavailable("connection refused".to_string()));

        let evaluator = ModerationEvaluator::with_oracle(Arc::new(oracle));
        let eval = evaluator.evaluate(input("you are an idiot!!!")).await;

        assert_eq!(eval.decision, Decision::Warn);
        assert_eq!(eval.scores.off_topic, 0.0);
        assert!(eval
            .note
            .as_deref()
            .is_some_and(|n| n.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_oracle_skipped_for_short_text_and_disabled_groups() {
        let mut oracle = MockModerationOracle::new();
        oracle.expect_evaluate().times(0);

        let evaluator = ModerationEvaluator::with_oracle(Arc::new(oracle));
        let short = evaluator.evaluate(input(" hi!  ")).await;
        assert!(!short.oracle_consulted);

        let disabled = evaluator
            .evaluate(EvaluationInput {
                ai_enabled: false,
                ..input("a perfectly long message")
            })
            .await;
        assert!(!disabled.oracle_consulted);
    }

    #[test]
    fn test_flood_score() {
        assert_eq!(flood_score(9, Some(8)), 1.0);
        assert_eq!(flood_score(4, Some(8)), 0.5);
        assert_eq!(flood_score(100, None), 0.0);
        assert_eq!(flood_score(3, Some(0)), 0.0);
    }

    #[test]
    fn test_flags_keep_canonical_order() {
        let scores = ModerationScores {
            toxicity: 0.7,
            spam: 0.7,
            off_topic: 0.7,
            quality: 0.0,
        };
        assert_eq!(
            raise_flags(&scores, 0.7),
            vec![
                ModerationFlag::Spam,
                ModerationFlag::Toxic,
                ModerationFlag::OffTopic,
                ModerationFlag::Flood
            ]
        );
    }
}
