//! Outbound links
//!
//! A [`Link`] takes a frame and a destination address and delivers it
//! without blocking the tick. Failures are reported per frame; the caller
//! decides whether to drop or log.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cadence_core::{CadenceError, CadenceResult};
use cadence_wire::Frame;

/// Default outbound queue capacity, in datagrams
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 4096;

/// Outbound frame delivery
pub trait Link: Send + Sync {
    /// Hand `frame` over for delivery to the instance bound at `dest`.
    fn transmit(&self, dest: &str, frame: &Frame) -> CadenceResult<()>;
}

/// Parse a destination address as it appears in an address column.
pub fn parse_dest(dest: &str) -> CadenceResult<SocketAddr> {
    dest.parse()
        .map_err(|_| CadenceError::TransportError(format!("Invalid destination address {:?}", dest)))
}

/// Link backed by a UDP send loop
#[derive(Clone, Debug)]
pub struct UdpLink {
    tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
}

impl Link for UdpLink {
    fn transmit(&self, dest: &str, frame: &Frame) -> CadenceResult<()> {
        let addr = parse_dest(dest)?;
        let bytes = frame.serialize()?;
        self.tx.try_send((bytes, addr)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CadenceError::TransportError("Outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                CadenceError::TransportError("Send loop stopped".into())
            }
        })
    }
}

/// Start a background send loop on `socket`.
///
/// The loop ends once every clone of the returned link is dropped and the
/// queue is empty.
pub fn start_send_loop(socket: Arc<UdpSocket>, capacity: usize) -> (UdpLink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(capacity.max(1));

    let handle = tokio::spawn(async move {
        while let Some((bytes, dest)) = rx.recv().await {
            if let Err(e) = socket.send_to(&bytes, dest).await {
                warn!(%dest, "UDP send error: {}", e);
            }
        }
        debug!("Send loop finished");
    });

    (UdpLink { tx }, handle)
}
