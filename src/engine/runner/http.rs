use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;
use tungstenite::WebSocket;

use crate::engine::{Context, Task, TaskResult};

/// Number of browser connections kept open.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Live reload channel between transforms and open browser tabs.
///
/// Transforms call [`LiveReload::trigger`] after writing output; every
/// connected page receives a `"reload"` message over a WebSocket. Without
/// connected clients triggering is a no-op.
#[derive(Clone)]
pub struct LiveReload {
    port: u16,
    clients: Clients,
}

impl Default for LiveReload {
    fn default() -> Self {
        Self::new(1337)
    }
}

impl std::fmt::Debug for LiveReload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReload")
            .field("port", &self.port)
            .finish()
    }
}

impl LiveReload {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            clients: Default::default(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client snippet that reloads the page on a `"reload"` message.
    pub fn script(&self) -> String {
        format!(
            r#"<script>
const socket = new WebSocket("ws://localhost:{}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
</script>"#,
            self.port
        )
    }

    /// Inserts the client snippet right before `</body>`, or appends it.
    pub fn inject(&self, html: &str) -> String {
        let script = self.script();
        match html.rfind("</body>") {
            Some(at) => format!("{}{}{}", &html[..at], script, &html[at..]),
            None => format!("{html}{script}"),
        }
    }

    /// Starts accepting WebSocket clients in a background thread.
    ///
    /// Falls back to an ephemeral port when the configured one is taken and
    /// returns the port actually bound.
    pub fn listen(&self) -> std::io::Result<u16> {
        let listener = match TcpListener::bind(("127.0.0.1", self.port)) {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0")?,
        };

        let port = listener.local_addr()?.port();
        if port != self.port {
            tracing::warn!(
                configured = self.port,
                port,
                "live reload port taken, pages must be reloaded by hand"
            );
        }

        let clients = self.clients.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("live reload connection failed: {e}");
                        continue;
                    }
                };

                match tungstenite::accept(stream) {
                    Ok(socket) => clients.lock().unwrap().push(socket),
                    Err(e) => tracing::warn!("rejected live reload client: {e}"),
                }
            }
        });

        Ok(port)
    }

    pub fn clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Tells every connected page to reload.
    pub fn trigger(&self) {
        let mut clients = self.clients.lock().unwrap();
        let mut broken = vec![];

        for (i, socket) in clients.iter_mut().enumerate() {
            match socket.send("reload".into()) {
                Ok(_) => {}
                Err(tungstenite::error::Error::Io(e)) => {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        broken.push(i);
                    }
                }
                Err(
                    tungstenite::error::Error::ConnectionClosed
                    | tungstenite::error::Error::AlreadyClosed,
                ) => broken.push(i),
                Err(e) => {
                    tracing::error!("Error: {e:?}");
                }
            }
        }

        for i in broken.into_iter().rev() {
            clients.remove(i);
        }

        // Close all but the most recent connections
        let len = clients.len();
        if len > MAX_CLIENTS {
            for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                socket.close(None).ok();
            }
        }
    }
}

/// Serves the output directory over HTTP until the process is stopped.
#[derive(Debug, Clone)]
pub struct Serve {
    pub port: u16,
}

impl Task for Serve {
    fn run(&self, ctx: &Context) -> TaskResult {
        let reload = ctx.reload().listen()?;
        info!(port = reload, "live reload listening");

        let dist = ctx.layout().dist.clone();
        ctx.block_on(serve(dist, self.port))
    }
}

async fn serve(dist: Utf8PathBuf, port: u16) -> anyhow::Result<()> {
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let router = Router::new()
        // path to the dist directory with generated website
        .fallback_service(ServeDir::new(dist));

    axum::serve(address, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_inject_before_body() {
        let reload = LiveReload::new(4000);
        let html = reload.inject("<html><body><p>hi</p></body></html>");

        let script = html.find("<script>").unwrap();
        assert!(script > html.find("<p>hi</p>").unwrap());
        assert!(script < html.find("</body>").unwrap());
        assert!(html.contains("ws://localhost:4000"));
    }

    #[test]
    fn test_inject_without_body() {
        let reload = LiveReload::new(4000);
        let html = reload.inject("<p>fragment</p>");

        assert!(html.starts_with("<p>fragment</p><script>"));
    }

    #[test]
    fn test_trigger_without_clients() {
        LiveReload::new(0).trigger();
    }

    #[test]
    fn test_trigger_reaches_client() {
        let reload = LiveReload::new(0);
        let port = reload.listen().unwrap();

        let (mut socket, _) = tungstenite::connect(format!("ws://127.0.0.1:{port}")).unwrap();

        for _ in 0..100 {
            if reload.clients() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(reload.clients(), 1);

        reload.trigger();
        let message = socket.read().unwrap();
        assert_eq!(message.to_text().unwrap(), "reload");
    }
}
