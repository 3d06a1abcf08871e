//! Exposes an in-process test server for use in integration tests.
//!
//! ```no_run
//! use blobstore_test::server::TestServer;
//! use blobstore_types::ClusterLayout;
//!
//! #[tokio::main]
//! async fn main() {
//!     let layout = ClusterLayout {
//!         local_datacenter: "dc1".into(),
//!         partitions: vec![],
//!     };
//!     let server = TestServer::new(layout).await;
//!     let url = server.url("/health");
//!     // use the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};

use blobstore_server::config::Config;
use blobstore_server::state::State;
use blobstore_server::web::App;
use blobstore_types::ClusterLayout;

/// An in-process test server for use in integration tests.
///
/// This server runs the full blobstore ingress against the given cluster layout, with
/// test-friendly operation timeouts. It listens on a random available port on localhost.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl TestServer {
    /// Starts a server reading against the given cluster layout.
    pub async fn new(cluster: ClusterLayout) -> Self {
        let config = Config {
            cluster,
            ..Default::default()
        };
        Self::with_config(config).await
    }

    /// Starts a server with full control over its configuration.
    pub async fn with_config(config: Config) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = State::new(config);
        let app = App::new(state);

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            app.serve(listener).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
