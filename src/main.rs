//! Entry point: wires config, logging, the Event Source Adapter, Case
//! Store, Triage Pipeline, Push Bus, and HTTP surface together, then
//! serves until Ctrl-C.

use fraud_triage::api::{self, ApiState};
use fraud_triage::config::Config;
use fraud_triage::pipeline::ai_queue::AiQueueProducer;
use fraud_triage::pipeline::traffic_meter::{tps, TrafficMeter};
use fraud_triage::pipeline::TriagePipeline;
use fraud_triage::push::PushBus;
use fraud_triage::store::CaseStore;
use fraud_triage::stream::StreamAdapter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fraud_triage=info,tower_http=info"));
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env();
    info!(
        redis_url = %config.redis_url,
        transactions_stream = %config.transactions_stream,
        http_addr = %config.http_addr,
        "starting fraud triage engine"
    );

    let adapter = StreamAdapter::connect(&config.redis_url).await?;
    adapter
        .ensure_group(&config.transactions_stream, &config.consumer_group)
        .await?;
    adapter
        .ensure_group(&config.ai_queue_stream, &config.consumer_group)
        .await
        .ok();

    let case_store = Arc::new(CaseStore::new(&config.case_db_path)?);
    let push_bus = PushBus::new();
    let traffic_meter = Arc::new(TrafficMeter::new());
    let ai_queue = AiQueueProducer::new(adapter.clone(), config.ai_queue_stream.clone());

    let pipeline = TriagePipeline::new(
        adapter,
        config.transactions_stream.clone(),
        config.consumer_group.clone(),
        config.consumer_name.clone(),
        config.batch_size,
        config.poison_retry_limit,
        case_store.clone(),
        ai_queue,
        push_bus.clone(),
        traffic_meter.clone(),
    );

    let (triage_shutdown_tx, triage_shutdown_rx) = tokio::sync::oneshot::channel();
    let triage_tick = Duration::from_millis(config.triage_tick_ms);
    let triage_handle = tokio::spawn(pipeline.run(triage_tick, triage_shutdown_rx));

    let last_tps = Arc::new(parking_lot::Mutex::new(0.0));
    let stats_handle = tokio::spawn(run_stats_broadcaster(
        case_store.clone(),
        push_bus.clone(),
        traffic_meter,
        last_tps.clone(),
        Duration::from_millis(config.stats_tick_ms),
    ));

    let api_state = ApiState {
        case_store,
        push_bus,
        last_tps,
    };
    let app = api::router(api_state);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    );

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = triage_shutdown_tx.send(());
    let _ = triage_handle.await;
    stats_handle.abort();

    Ok(())
}

/// §4.7/§4.8: every `stats_tick` read-and-reset the Traffic Meter, compute
/// TPS, query the Case Store for status counts, and publish a `StatsFrame`.
async fn run_stats_broadcaster(
    case_store: Arc<CaseStore>,
    push_bus: PushBus,
    traffic_meter: Arc<TrafficMeter>,
    last_tps: Arc<parking_lot::Mutex<f64>>,
    interval: Duration,
) {
    use fraud_triage::models::{CaseStatus, StatsFrame};

    let mut ticker = tokio::time::interval(interval);
    let delta_secs = interval.as_secs_f64();
    loop {
        ticker.tick().await;

        let count = traffic_meter.get_and_reset();
        let current_tps = tps(count, delta_secs);
        *last_tps.lock() = current_tps;

        let stats = match case_store.stats() {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "failed to read case store stats");
                continue;
            }
        };

        let auto_approved = *stats.get(&CaseStatus::AutoApproved).unwrap_or(&0);
        let auto_blocked = *stats.get(&CaseStatus::AutoBlocked).unwrap_or(&0);
        let manual_cases = stats
            .get(&CaseStatus::UnderInvestigation)
            .unwrap_or(&0)
            + stats.get(&CaseStatus::Escalated).unwrap_or(&0)
            + stats.get(&CaseStatus::Resolved).unwrap_or(&0);
        let total_cases: i64 = stats.values().sum();

        push_bus.publish_stats(StatsFrame {
            total_cases,
            auto_approved,
            auto_blocked,
            manual_cases,
            tps: current_tps,
        });
    }
}
