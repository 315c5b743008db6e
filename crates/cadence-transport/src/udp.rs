//! UDP socket and receive loop
//!
//! One socket per instance, shared by the receive loop and the send loop
//! started in [`crate::link`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use cadence_core::{CadenceError, CadenceResult};
use cadence_wire::{Frame, MAX_FRAME_SIZE};

use crate::{Envelope, Inbox};

fn transport_error(e: io::Error) -> CadenceError {
    CadenceError::TransportError(e.to_string())
}

/// A bound UDP socket
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to `addr`. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr) -> CadenceResult<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(transport_error)?;
        let local_addr = socket.local_addr().map_err(transport_error)?;
        debug!(%local_addr, "udp socket bound");

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// Decode one datagram into an envelope tagged with its sender.
pub fn decode_datagram(datagram: &[u8], from: SocketAddr) -> CadenceResult<Envelope> {
    let frame = Frame::parse(datagram)?;
    Ok(Envelope {
        sender: from.to_string(),
        frame,
    })
}

/// Start a background receive loop feeding `inbox`.
///
/// Malformed datagrams are logged and skipped.
pub fn start_receive_loop(socket: Arc<UdpSocket>, inbox: Arc<Inbox>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        loop {
            let (len, addr) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    continue;
                }
            };
            match decode_datagram(&buf[..len], addr) {
                Ok(envelope) => {
                    trace!(
                        %addr,
                        channel = %envelope.frame.channel(),
                        rows = envelope.frame.rows.len(),
                        "frame received"
                    );
                    inbox.push(envelope);
                }
                Err(e) => warn!(%addr, "Dropping malformed frame: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cadence_core::Value;
    use cadence_wire::FrameBuilder;

    use crate::{start_send_loop, Link};

    #[tokio::test]
    async fn test_bind_picks_port() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(transport.local_addr().port(), 0);
    }

    #[test]
    fn test_decode_datagram() {
        let frame = FrameBuilder::new("pipe").row(vec![Value::Int(1)]).build();
        let bytes = frame.serialize().unwrap();
        let from: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let envelope = decode_datagram(&bytes, from).unwrap();
        assert_eq!(envelope.sender, "127.0.0.1:4000");
        assert_eq!(envelope.frame, frame);
        assert!(decode_datagram(&bytes[..3], from).is_err());
    }

    #[tokio::test]
    async fn test_frames_reach_remote_inbox() {
        let receiver = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let sender = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let inbox = Arc::new(Inbox::new(16));
        let recv_task = start_receive_loop(receiver.socket(), inbox.clone());
        let (link, send_task) = start_send_loop(sender.socket(), 16);

        let frame = FrameBuilder::new("pipe")
            .row(vec![Value::from("hello"), Value::Int(7)])
            .build();
        link.transmit(&receiver.local_addr().to_string(), &frame)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), inbox.notified())
            .await
            .unwrap();
        let envelopes = inbox.drain();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].frame, frame);
        assert_eq!(envelopes[0].sender, sender.local_addr().to_string());

        drop(link);
        send_task.await.unwrap();
        recv_task.abort();
    }
}
