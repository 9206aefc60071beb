use super::request::HttpRequest;
use super::response::{self, HttpResponse};
use super::HttpConfig;
use crate::common::{guarded, verbose};
use crate::network;
use crate::server::{ServerState, TcpServer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{error, info};

/// Error type handlers may return to drop a request without answering
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Minimal HTTP server answering GET requests, one request per connection
///
/// Each request line arrives as a message of the underlying [`TcpServer`].
/// The first line holding a GET request is passed to the handler; its
/// response is sent as a header block followed by the body, then the
/// connection is closed. Anything else gets `501 Not Implemented`.
///
/// # Examples
///
/// ```no_run
/// use tcpcom::http::{HttpConfig, HttpResponse, HttpServer};
///
/// #[tokio::main]
/// async fn main() {
///     let server = HttpServer::start(HttpConfig::new(8080), |request| {
///         Ok(HttpResponse::new(format!("You asked for {}", request.path)))
///     })
///     .await;
///     server.wait().await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpServer {
    server: TcpServer,
}

impl HttpServer {
    pub async fn start<H>(config: HttpConfig, handler: H) -> HttpServer
    where
        H: Fn(&HttpRequest) -> Result<HttpResponse, BoxError> + Send + Sync + 'static,
    {
        let server_name = config.server_name.clone();
        let verbose = config.verbose;

        let server = TcpServer::start(config.into(), move |server, state| match state {
            ServerState::Message(message) => {
                verbose!(verbose, request = %message, "Request received");
                respond(server, &server_name, &handler, &message);
            }
            ServerState::Connected(peer) => verbose!(verbose, %peer, "Client connected"),
            ServerState::PortInUse(port) => error!(port, "HTTP server could not bind its port"),
            _ => {}
        })
        .await;

        if let Some(addr) = server.local_addr() {
            info!(address = %addr, "HTTP server started");
        }
        HttpServer { server }
    }

    /// IP address of the client currently being served
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.server.peer_addr().map(|addr| addr.ip())
    }

    /// The IP address this host is reachable at
    pub fn server_ip() -> IpAddr {
        network::local_ip()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    pub fn terminate(&self) {
        self.server.terminate();
    }

    /// Waits until the server has stopped
    pub async fn wait(&self) {
        self.server.wait().await;
    }
}

fn respond<H>(server: &TcpServer, server_name: &str, handler: &H, message: &str)
where
    H: Fn(&HttpRequest) -> Result<HttpResponse, BoxError>,
{
    let client_ip = server
        .peer_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let Some(request) = HttpRequest::parse(message, client_ip) else {
        info!(%client_ip, "Unsupported request");
        server.send_message(response::not_implemented_header(server_name));
        server.disconnect();
        return;
    };

    match guarded("HTTP request handler", || handler(&request)) {
        Some(Ok(response)) => {
            let (body, on_sent) = response.into_parts();
            server.send_message(response::ok_header(server_name, body.len()));
            server.send_message(body);
            if let Some(on_sent) = on_sent {
                guarded("HTTP response hook", on_sent);
            }
        }
        Some(Err(e)) => error!(%client_ip, path = %request.path, error = %e, "Request handler failed"),
        // The panic was logged by the guard
        None => {}
    }
    server.disconnect();
}
