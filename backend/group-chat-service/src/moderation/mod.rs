//! Moderation pipeline: scoring, flood tracking, the optional oracle, policy
//! evaluation and the orchestrator that applies decisions to a group.

pub mod evaluator;
pub mod flood_tracker;
pub mod heuristic;
pub mod member_state;
pub mod oracle;
pub mod orchestrator;

pub use evaluator::{Decision, Evaluation, EvaluationInput, ModerationEvaluator};
pub use flood_tracker::FloodTracker;
pub use heuristic::{HeuristicScorer, SignalScores, TextScorer};
pub use oracle::{GeminiOracle, ModerationOracle, OracleError, OracleOutcome, OracleScores};
pub use orchestrator::{ModerationOrchestrator, ModerationOutcome};
