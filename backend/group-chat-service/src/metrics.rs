use actix_web::{HttpResponse, Responder};
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static::lazy_static! {
    /// Evaluator decisions by action (none, warn, mute, highlight)
    pub static ref MODERATION_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "group_moderation_decisions_total",
        "Moderation decisions taken for group messages",
        &["action"]
    )
    .expect("group_moderation_decisions_total metric registration");

    /// Oracle calls by outcome (scored, unavailable, skipped)
    pub static ref ORACLE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "group_moderation_oracle_requests_total",
        "External moderation oracle calls",
        &["outcome"]
    )
    .expect("group_moderation_oracle_requests_total metric registration");

    pub static ref AUTO_MUTES_TOTAL: IntCounter = register_int_counter!(
        "group_moderation_auto_mutes_total",
        "Members muted by the moderation pipeline"
    )
    .expect("group_moderation_auto_mutes_total metric registration");

    pub static ref PIPELINE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "group_moderation_pipeline_failures_total",
        "Moderation pipeline runs that failed and were swallowed"
    )
    .expect("group_moderation_pipeline_failures_total metric registration");
}

/// Handler that serialises Prometheus metrics in text format.
pub async fn metrics_handler() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}
