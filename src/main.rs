use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use receptor_gateway::{
    Config, Gateway, ReceptorController,
    admin::{self, ManagementService},
    analytics,
    queue::{JobConsumer, LocalBus},
    tls,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "📡 receptor-gateway";
const JOB_RECORD_BACKLOG: usize = 1024;

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::io::Result<()> {
    setup().await;
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> std::io::Result<()> {
    let config = Config::snapshot();

    let bus = Arc::new(LocalBus::new());
    let job_records = bus.subscribe(config.settings.queue.jobs_topic.clone(), JOB_RECORD_BACKLOG);

    let gateway = Gateway::new(&config.settings, bus);
    let sweeper = gateway.start_sweeper();

    let consumer = JobConsumer::new(
        gateway.receptor().clone(),
        gateway.publisher().clone(),
        config.settings.queue.responses_topic.clone(),
    );
    let consumer = tokio::spawn(consumer.run(job_records, gateway.shutdown_signal()));

    let agents = bind(config.listen_addr)?;
    let mgmt = bind(config.mgmt_addr)?;

    info!("{} listening on {} (management on {})", APP_NAME, config.listen_addr, config.mgmt_addr);

    let controller = ReceptorController::new(gateway.clone()).with_tls(tls::acceptor());
    let agent_server = tokio::spawn(controller.serve(agents));

    let service = ManagementService::new(gateway.clone());
    let mgmt_server = tokio::spawn(admin::serve_management(mgmt, service, gateway.shutdown_signal()));

    if let Err(e) = signal::ctrl_c().await {
        error!("failed to wait for ctrl-c: {e}");
    }

    info!("{} shutting down", APP_NAME);
    gateway.teardown();

    for (name, server) in [("agent", agent_server), ("management", mgmt_server)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{name} listener failed: {e}"),
            Err(e) => error!("{name} listener panicked: {e}"),
        }
    }
    let _ = sweeper.await;

    match consumer.await {
        Ok(records) => info!("job consumer handled {records} record(s)"),
        Err(e) => error!("job consumer panicked: {e}"),
    }

    info!("final counters:\n{}", admin::format_stats(&analytics::snapshot()));

    Ok(())
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}
