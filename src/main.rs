use std::net::SocketAddr;
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

pub use kueue_operator::{self, controllers::operator_namespace, telemetry, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Namespace holding the Kueue, read from the service account when unset
    #[arg(long = "namespace", env = "POD_NAMESPACE", value_name = "NAMESPACE")]
    namespace: Option<String>,

    #[arg(long = "workers", env = "WORKERS", default_value_t = 1)]
    workers: usize,

    /// Seconds between periodic resyncs of the Kueue
    #[arg(
        long = "resync-interval",
        env = "RESYNC_INTERVAL",
        value_name = "SECONDS",
        default_value_t = 600
    )]
    resync_interval: u64,

    #[arg(long = "bind-address", env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&metrics, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = telemetry::init().await;

    let args: Arguments = Arguments::parse();

    let state = State::new(
        operator_namespace(args.namespace),
        Duration::from_secs(args.resync_interval),
        args.workers,
    )
    .with_log_level(log_level);
    let controller = kueue_operator::run(state.clone());
    tokio::pin!(controller);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
