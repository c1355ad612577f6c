//! Webhook server bootstrap

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::Request, extract::State, response::Response, Router};
use ldapauth_core::{Error, Result, ServerConfiguration};
use tokio::net::TcpListener;
use tracing::info;

use crate::handler::Handler;
use crate::middleware::AccessLog;
use crate::response::HttpResponseWriter;
use crate::sink::LogSink;

/// Handler chain shared by every request
type Chain = Arc<dyn Handler>;

/// A configured, not yet listening, webhook server.
pub struct Server {
    config: Arc<ServerConfiguration>,
    router: Router,
}

/// Wire `handler` behind the access log and get a server ready to listen.
///
/// Nothing touches the network until [`Server::listen`] is called.
pub fn initialize<H: Handler>(
    config: ServerConfiguration,
    handler: H,
    sink: Arc<dyn LogSink>,
) -> Server {
    let chain: Chain = Arc::new(AccessLog::new(handler, sink));
    let router = Router::new().fallback(dispatch).with_state(chain);

    Server {
        config: Arc::new(config),
        router,
    }
}

/// Run the chain for one request against a fresh response channel.
async fn dispatch(State(chain): State<Chain>, request: Request) -> Response {
    let mut writer = HttpResponseWriter::new();
    chain.serve(request, &mut writer).await;
    writer.into_response()
}

impl Server {
    pub fn config(&self) -> &ServerConfiguration {
        &self.config
    }

    /// The request router, for embedding or driving without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind `addr` (`host:port`) and serve until a fatal error.
    pub async fn listen(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        self.listen_on(listener).await
    }

    /// Bind the address from the configuration and serve.
    pub async fn listen_configured(self) -> Result<()> {
        let addr = self.config.listen_address();
        self.listen(&addr).await
    }

    /// Serve on an already bound listener.
    pub async fn listen_on(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;

        info!("k8s-ldap-auth listening on http://{}", local_addr);
        info!(
            "Directory: {} (bind DN: {}, search base: '{}', scope: {})",
            self.config.directory_url(),
            self.config.bind_dn(),
            self.config.search_base(),
            self.config.search_scope()
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(Error::Serve)
    }
}
