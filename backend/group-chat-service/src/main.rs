use actix_web::{web, App, HttpServer};
use group_chat_service::{
    config, db, error,
    logging,
    moderation::{FloodTracker, GeminiOracle, ModerationEvaluator},
    routes,
    state::AppState,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let (groups, messages): (Arc<dyn db::GroupRepository>, Arc<dyn db::MessageRepository>) =
        match &cfg.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(cfg.db_max_connections)
                    .connect(url)
                    .await
                    .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
                sqlx::migrate!("./migrations").run(&pool).await?;

                let pool = Arc::new(pool);
                (
                    Arc::new(db::PgGroupRepository::new(pool.clone())),
                    Arc::new(db::PgMessageRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage");
                (
                    Arc::new(db::InMemoryGroupRepository::new()),
                    Arc::new(db::InMemoryMessageRepository::new()),
                )
            }
        };

    let evaluator = match cfg.oracle() {
        Some(oracle_cfg) => {
            let oracle = GeminiOracle::new(&oracle_cfg)
                .map_err(|e| error::AppError::StartServer(format!("oracle: {e}")))?;
            tracing::info!(model = %oracle_cfg.model, "moderation oracle enabled");
            ModerationEvaluator::with_oracle(Arc::new(oracle))
        }
        None => {
            tracing::info!("GEMINI_API_KEY not set, moderation uses heuristics only");
            ModerationEvaluator::heuristic_only()
        }
    };

    let flood = Arc::new(FloodTracker::new());
    let sweeper = flood.spawn_sweeper(cfg.flood_sweep_interval());

    let state = AppState::new(groups, messages, evaluator, flood, cfg.moderation_enabled);

    let bind_addr = format!("0.0.0.0:{}", cfg.http_port);
    tracing::info!(
        %bind_addr,
        service = %cfg.service_name,
        environment = %cfg.environment,
        moderation_enabled = cfg.moderation_enabled,
        "starting group-chat-service"
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run();

    let result = tokio::select! {
        res = server => res.map_err(|e| error::AppError::StartServer(format!("server: {e}"))),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    sweeper.abort();
    result
}
