use std::sync::Arc;

use exam_room_coordinator::api;
use exam_room_coordinator::config::Config;
use exam_room_coordinator::feeds::{self, SystemClock};
use exam_room_coordinator::monitor::Coordinator;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("exam_room_coordinator=info,warp=warn"));

    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let (schedule, attempts) = match feeds::build_feeds(&config).await {
        Ok(feeds) => feeds,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open backend");
            std::process::exit(1);
        }
    };

    let coordinator = Arc::new(Coordinator::new(
        config.monitor.clone(),
        schedule,
        attempts,
        Arc::new(SystemClock),
    ));

    let addr = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        lead_time_minutes = config.monitor.lead_time.num_minutes(),
        "Exam room coordinator listening"
    );

    warp::serve(api::routes(coordinator)).run(addr).await;
}
