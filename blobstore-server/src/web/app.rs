//! The assembled web application.

use std::time::Duration;

use anyhow::Result;
use axum::ServiceExt;
use axum::extract::Request;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::metrics::InFlightRequestsLayer;
use tower_http::metrics::in_flight_requests::InFlightRequestsCounter;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::endpoints;
use crate::state::ServiceState;
use crate::web::idle::{IdleListener, SocketAddrConnectInfo};
use crate::web::middleware as m;

/// Interval for emitting the in-flight requests gauge metric.
const IN_FLIGHT_INTERVAL: Duration = Duration::from_secs(1);

/// The budget for draining in-flight work once shutdown has been triggered.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The blobstore web server application.
#[derive(Debug)]
pub struct App {
    router: axum::Router,
    state: ServiceState,
    in_flight_requests: InFlightRequestsCounter,
    graceful_shutdown: bool,
}

impl App {
    /// Creates a new application router for the given service state.
    ///
    /// This sets up middlewares and routes for the blobstore web API. Use
    /// [`serve`](Self::serve) to run the server future.
    pub fn new(state: ServiceState) -> Self {
        let (in_flight_layer, in_flight_requests) = InFlightRequestsLayer::pair();

        // Build the router middleware into a single service which runs _after_ routing.
        // Layers added first are called first: requests go from top to bottom, responses
        // from bottom to top.
        let middleware = ServiceBuilder::new()
            .layer(axum::middleware::from_fn(m::emit_request_metrics))
            .layer(in_flight_layer)
            .layer(CatchPanicLayer::custom(m::handle_panic))
            .layer(m::set_server_header())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(m::make_http_span)
                    .on_failure(DefaultOnFailure::new().level(Level::DEBUG)),
            );

        let router = endpoints::routes()
            .layer(middleware)
            .with_state(state.clone());

        App {
            router,
            state,
            in_flight_requests,
            graceful_shutdown: false,
        }
    }

    /// Enables or disables graceful shutdown for the server.
    ///
    /// By default, graceful shutdown is disabled.
    pub fn graceful_shutdown(mut self, enable: bool) -> Self {
        self.graceful_shutdown = enable;
        self
    }

    /// Runs the web server until graceful shutdown is triggered.
    ///
    /// Once the shutdown signal fires, the coordinator refuses new operations and in-flight
    /// requests get [`SHUTDOWN_TIMEOUT`] to drain; exceeding the budget is logged and
    /// counted, and the server exits anyway.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let Self {
            router,
            state,
            in_flight_requests,
            graceful_shutdown,
        } = self;

        let idle_time = Duration::from_secs(state.config.http.idle_time_secs);
        let listener = IdleListener::new(listener, idle_time);

        let service = ServiceExt::<Request>::into_make_service_with_connect_info::<
            SocketAddrConnectInfo,
        >(router);

        let server = async {
            if graceful_shutdown {
                let shutdown = {
                    let state = state.clone();
                    async move {
                        elegant_departure::get_shutdown_guard().wait_owned().await;
                        state.coordinator.close();
                        tracing::info!("Shutting down ...");
                    }
                };
                axum::serve(listener, service)
                    .with_graceful_shutdown(shutdown)
                    .await
            } else {
                axum::serve(listener, service).await
            }
        };

        let drain_budget = async {
            if graceful_shutdown {
                elegant_departure::get_shutdown_guard().wait_owned().await;
                tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
            } else {
                std::future::pending().await
            }
        };

        let emitter = in_flight_requests.run_emitter(IN_FLIGHT_INTERVAL, |count| async move {
            merni::gauge!("server.requests.in_flight": count);
        });

        tokio::select! {
            result = server => result?,
            _ = drain_budget => {
                tracing::error!(
                    "server shutdown did not drain within {}s",
                    SHUTDOWN_TIMEOUT.as_secs()
                );
                merni::counter!("server.shutdown_error": 1);
            }
            _ = emitter => {}
        }

        Ok(())
    }
}
