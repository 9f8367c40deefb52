//! HTTP front end for the gateway
//!
//! Accepts client connections and hands every request to [`EdgeGateway`].
//! Errors that reach this layer become plain-text responses with the status
//! from [`GatewayError::to_http_status`].

use crate::error::{GatewayError, Result};
use crate::gateway::EdgeGateway;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Gateway listener
pub struct GatewayServer {
    listener: TcpListener,
    gateway: Arc<EdgeGateway>,
}

impl GatewayServer {
    /// Bind the listening socket
    ///
    /// Port 0 picks a free port; see [`GatewayServer::local_addr`].
    pub async fn bind(addr: SocketAddr, gateway: Arc<EdgeGateway>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(GatewayServer { listener, gateway })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Edge cache gateway listening on http://{}", addr);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("Accepted connection from {}", peer);

            let io = TokioIo::new(stream);
            let gateway = Arc::clone(&self.gateway);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { handle_request(req, gateway).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    gateway: Arc<EdgeGateway>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    match gateway.handle(req).await {
        Ok(response) => Ok(response),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Plain-text response for an error that reached the client
pub fn error_response(err: &GatewayError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", err))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
