// src/metrics/mod.rs
mod collector;

pub use collector::{MetricsCollector, MetricsRegistry};

use anyhow::Result;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Serve the Prometheus text endpoint in a background task.
pub async fn serve(addr: SocketAddr, registry: Arc<MetricsRegistry>, path: String) -> Result<()> {
    let path = Arc::new(path);
    let service_path = path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let response = if req.uri().path() == path.as_str() {
                        Response::builder()
                            .status(StatusCode::OK)
                            .header("Content-Type", "text/plain; version=0.0.4")
                            .body(Body::from(registry.gather()))
                    } else {
                        Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("Not Found"))
                    };
                    Ok::<_, Infallible>(response.unwrap_or_else(|_| Response::new(Body::empty())))
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Metrics server listening on http://{}{}", addr, path.as_str());

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}
