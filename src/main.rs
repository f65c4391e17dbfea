use quiz_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware::cors::api_cors,
    routes,
    services::notification_service::NotificationService,
    AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    init_config()?;
    let config = get_config();

    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool.clone(), config);

    {
        let notif = NotificationService::new(
            pool.clone(),
            config.notification_webhook_url.clone(),
            config.webhook_secret.clone(),
        );
        tokio::spawn(async move {
            loop {
                match notif.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Webhook worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    {
        let lifecycle = app_state.lifecycle.clone();
        let quizzes = app_state.quizzes.clone();
        let every = Duration::from_secs(config.overdue_sweep_secs.max(1));
        tokio::spawn(async move {
            loop {
                match lifecycle.sweep_expired(quizzes.as_ref(), chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(changed) => info!(changed, "expired attempts closed"),
                    Err(e) => tracing::error!("Overdue sweep error: {:?}", e),
                }
                tokio::time::sleep(every).await;
            }
        });
    }

    let app = routes::build_router(app_state, config.public_rps)
        .layer(api_cors())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
