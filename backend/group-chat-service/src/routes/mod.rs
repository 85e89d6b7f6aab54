use actix_web::{get, web, HttpResponse};

pub mod events;
pub mod groups;
pub mod messages;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Register every group endpoint
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .route("/metrics", web::get().to(crate::metrics::metrics_handler))
        .service(groups::create_group)
        .service(groups::list_groups)
        .service(groups::get_group)
        .service(groups::update_settings)
        .service(groups::add_member)
        .service(groups::remove_member)
        .service(groups::promote_admin)
        .service(groups::demote_admin)
        .service(groups::list_mutes)
        .service(groups::mute_member)
        .service(groups::unmute_member)
        .service(messages::send_message)
        .service(messages::list_messages)
        .service(messages::override_moderation)
        .service(events::group_events);
}
