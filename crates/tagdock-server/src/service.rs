//! The command service: TCP accept loop and request dispatch.
//!
//! One command per connection. Each accepted socket gets its own task
//! that reads a single request line, dispatches it, writes the single
//! response line, and closes. Read-only commands answer from catalog
//! snapshots and never touch the reader gate; `write` is the only
//! path to the hardware, and an in-flight write runs to its terminal
//! outcome even if the client goes away before the response lands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use tagdock_catalog::Catalog;
use tagdock_core::FirmwareVersion;
use tagdock_driver::bus::BusLink;
use tagdock_driver::{Pn532, WriteOptions, write_to_tag};
use tagdock_protocol::{LineCodec, Request, Response};

use crate::session::{Busy, ReaderGate};

/// Pause before re-accepting after a failed `accept()`, so a transient
/// resource exhaustion does not spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared service state behind the accept loop.
pub struct Service<L: BusLink> {
    catalog: Catalog,
    gate: ReaderGate<Pn532<L>>,
    firmware: Option<FirmwareVersion>,
    write_options: WriteOptions,
    lock_wait: Duration,
}

impl<L: BusLink> Service<L> {
    /// Probe the reader and assemble the service.
    ///
    /// A failed probe is not fatal: list commands keep working and
    /// `status` reports the hardware as not ready, matching a box
    /// whose reader is unplugged.
    pub async fn start(
        catalog: Catalog,
        mut reader: Pn532<L>,
        write_options: WriteOptions,
        lock_wait: Duration,
    ) -> Self {
        let firmware = match reader.get_firmware_version().await {
            Ok(version) => match reader.configure_security_module().await {
                Ok(()) => {
                    info!(%version, "reader ready");
                    Some(version)
                }
                Err(e) => {
                    warn!(error = %e, "SAM configuration failed; hardware not ready");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "reader probe failed; hardware not ready");
                None
            }
        };
        Self {
            catalog,
            gate: ReaderGate::new(reader),
            firmware,
            write_options,
            lock_wait,
        }
    }

    /// Accept connections until the future is dropped.
    ///
    /// Per-connection failures are logged and never bring the loop
    /// down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let service = Arc::clone(&self);
                    tokio::spawn(async move {
                        service.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "connection accepted");
        let mut framed = Framed::new(stream, LineCodec::new());

        let response = match framed.next().await {
            Some(Ok(request)) => {
                debug!(%peer, ?request, "dispatching");
                self.dispatch(request).await
            }
            Some(Err(e)) if e.is_bad_request() => {
                warn!(%peer, error = %e, "bad request");
                Response::error(e.to_string())
            }
            Some(Err(e)) => {
                warn!(%peer, error = %e, "connection failed mid-read");
                return;
            }
            None => {
                debug!(%peer, "client closed without a command");
                return;
            }
        };

        // The write (if any) already ran to completion; a client that
        // vanished just doesn't hear about it.
        if let Err(e) = framed.send(response).await {
            warn!(%peer, error = %e, "failed to deliver response");
        }
    }

    /// Turn one request into one response. Infallible: every failure
    /// class has a wire shape.
    pub async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::ListCategories => Response::names(self.catalog.list_categories()),
            Request::ListPayloads { category } => match self.catalog.list_payloads(&category) {
                Ok(names) => Response::names(names),
                Err(e) => Response::error(e.to_string()),
            },
            Request::Write { category, name } => self.write(&category, &name).await,
            Request::Status => Response::hardware_status(
                self.firmware.map(|v| v.to_string()),
                self.firmware.is_some(),
            ),
            Request::Reload => match self.catalog.reload() {
                Ok((categories, payloads)) => Response::reloaded(categories, payloads),
                Err(e) => {
                    warn!(error = %e, "reload failed, keeping previous index");
                    Response::error(e.to_string())
                }
            },
        }
    }

    async fn write(&self, category: &str, name: &str) -> Response {
        // Resolve the payload before touching the gate: an unknown
        // name must not occupy the reader.
        let payload = match self.catalog.get(category, name) {
            Ok(payload) => payload,
            Err(e) => return Response::error(e.to_string()),
        };

        let mut token = match self.gate.acquire(self.lock_wait).await {
            Ok(token) => token,
            Err(Busy) => {
                debug!(category, name, "reader busy");
                return Response::write_busy();
            }
        };

        info!(category, name, "write started");
        if let Err(e) = token.configure_security_module().await {
            warn!(error = %e, "reader unreachable");
            return Response::write_report(&tagdock_core::WriteOutcome::BusFault, None);
        }
        let completed = write_to_tag(&mut token, &payload.image, &self.write_options).await;
        Response::write_report(&completed.outcome, completed.uid.as_ref())
    }

    /// Whether a write currently holds the reader.
    pub fn is_writing(&self) -> bool {
        self.gate.is_held()
    }

    /// Drain the gate and park the reader, for shutdown.
    pub async fn shutdown(&self, drain_wait: Duration) {
        match self.gate.acquire(drain_wait).await {
            Ok(mut token) => token.release().await,
            Err(Busy) => warn!("reader still busy at shutdown"),
        }
    }
}
