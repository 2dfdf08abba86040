use clap::Parser;
use tracing::info;

use mpm_simulator::{router, shared, Simulator};

#[derive(Parser, Debug)]
#[command(name = "mpm-sim", about = "Pathfinder MPM HTTP controller simulator")]
struct Args {
    /// Port to serve the controller protocol on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Number of simulated probes (ids A, B, C, …).
    #[arg(long, default_value_t = 3)]
    probes: usize,

    /// Rig posterior angle in degrees (subtracted from Polar by clients).
    #[arg(long, default_value_t = 0.0)]
    posterior_angle: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpm_simulator=debug".into()),
        )
        .init();

    let args = Args::parse();
    let simulator = shared(Simulator::new(args.probes, args.posterior_angle));

    let addr = format!("0.0.0.0:{}", args.port);
    info!("📡 MPM simulator: {} probes on {addr}", args.probes);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, router(simulator)).await.unwrap();
}
