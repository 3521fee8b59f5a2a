//! Tiny RTP receiver.
//!
//! Non-blocking UDP receive into a circular jitter buffer of sequence-
//! numbered slots, with duplicate rejection, misorder/dropout resync,
//! retransmit-request scheduling and an RTCP helper channel. [`RtpReceiver::read`]
//! never blocks; the caller decides the cadence.

mod jitter;

pub use jitter::{JitterConfig, JitterGet};

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Mutex;

use tracing::{debug, warn};

use jitter::JitterBuffer;

/// Largest datagram the receiver accepts.
pub const MAX_PACKET_SIZE: usize = 16384;

/// Datagrams drained from the sockets per [`RtpReceiver::read`] call.
const MAX_RTP_RCV: usize = 50;

/// Port bind retries stop at this bound.
const MAX_PORT: u16 = 7000;

/// Errors from the RTP receiver.
#[derive(Debug, thiserror::Error)]
pub enum RtpError {
    /// No free port below the retry bound
    #[error("no free port in {0}..7000")]
    NoFreePort(u16),

    /// Invalid configuration
    #[error("invalid rtp attributes")]
    InvalidConfig,

    /// Socket failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one [`RtpReceiver::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpRead {
    /// A payload of this many bytes was written to the output buffer
    Packet(usize),
    /// The next packet never arrived; its slot is skipped
    Lost,
    /// A packet was discarded by overflow ejection
    Discarded,
    /// The jitter buffer is still pre-rolling
    NoPacket,
}

/// What an RTCP observer wants done with a control packet.
pub enum RtcpAction {
    /// Nothing
    None,
    /// Update the jitter pre-roll depth (time-sync packets)
    SetDelayPackets(u16),
    /// Re-inject these bytes as an RTP datagram (retransmit replies)
    Inject(Vec<u8>),
}

/// Observer for RTCP traffic; returns the action to apply.
pub type RtcpCallback = Box<dyn FnMut(&[u8]) -> RtcpAction + Send>;

/// Rewriter for datagrams whose payload type differs from the session's;
/// `None` drops the datagram.
pub type CustomCallback = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Builder for retransmit requests: `(first_seq, count)` to the wire bytes
/// to send on the control socket.
pub type ResendCallback = Box<dyn FnMut(u16, u16) -> Option<Vec<u8>> + Send>;

/// RTP receiver configuration.
pub struct RtpConfig {
    /// First UDP port to try (retried +2 up to 7000)
    pub port: u16,
    /// Client control port; 0 disables the RTCP socket
    pub rtcp_port: u16,
    /// Client address for outgoing RTCP
    pub peer: Option<IpAddr>,
    /// Expected payload type
    pub payload: u8,
    /// Jitter buffer geometry and thresholds
    pub jitter: JitterConfig,
    /// RTCP observer
    pub rtcp_cb: Option<RtcpCallback>,
    /// Foreign-payload rewriter
    pub cust_cb: Option<CustomCallback>,
    /// Retransmit request builder
    pub resend_cb: Option<ResendCallback>,
}

struct Callbacks {
    rtcp: Option<RtcpCallback>,
    cust: Option<CustomCallback>,
    resend: Option<ResendCallback>,
}

/// RTP receiver: sockets + jitter buffer.
pub struct RtpReceiver {
    sock: UdpSocket,
    rtcp_sock: Option<UdpSocket>,
    rtcp_peer: Option<SocketAddr>,
    port: u16,
    payload: u8,
    jitter: Mutex<JitterBuffer>,
    callbacks: Mutex<Callbacks>,
}

fn bind_low_delay(port: u16) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    // IPTOS_LOWDELAY; not all stacks allow it
    if let Err(e) = sock.set_tos(0x10) {
        warn!("cannot set low-delay TOS: {e}");
    }
    sock.set_reuse_address(true)?;
    sock.bind(&SocketAddr::from(([0, 0, 0, 0], port)).into())?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

impl RtpReceiver {
    /// Bind the receiver, retrying `port + 2` while taken.
    ///
    /// # Errors
    /// `NoFreePort` once the retry bound is hit, `InvalidConfig` for an
    /// unusable jitter geometry.
    pub fn open(mut config: RtpConfig) -> Result<Self, RtpError> {
        if config.payload == 0 || !config.jitter.is_valid() {
            return Err(RtpError::InvalidConfig);
        }

        let start = config.port;
        let sock = loop {
            match bind_low_delay(config.port) {
                Ok(sock) => break sock,
                Err(_) => {
                    config.port += 2;
                    if config.port >= MAX_PORT {
                        return Err(RtpError::NoFreePort(start));
                    }
                }
            }
        };

        // The RTCP socket is best effort: a session without retransmits and
        // time sync still plays.
        let mut rtcp_sock = None;
        let mut rtcp_peer = None;
        if config.rtcp_port != 0 {
            if let Some(peer) = config.peer {
                rtcp_peer = Some(SocketAddr::new(peer, config.rtcp_port));
            }
            if config.rtcp_port != config.port {
                match bind_low_delay(config.rtcp_port) {
                    Ok(sock) => rtcp_sock = Some(sock),
                    Err(e) => warn!(port = config.rtcp_port, "cannot bind rtcp socket: {e}"),
                }
            }
        }

        debug!(port = config.port, "rtp receiver bound");

        Ok(Self {
            sock,
            rtcp_sock,
            rtcp_peer,
            port: config.port,
            payload: config.payload,
            jitter: Mutex::new(JitterBuffer::new(config.jitter)),
            callbacks: Mutex::new(Callbacks {
                rtcp: config.rtcp_cb,
                cust: config.cust_cb,
                resend: config.resend_cb,
            }),
        })
    }

    /// Bound RTP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Drain pending datagrams (up to 50) into the jitter buffer, then pop
    /// the next packet. Strictly non-blocking.
    pub fn read(&self, out: &mut [u8]) -> RtpRead {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        for _ in 0..MAX_RTP_RCV {
            let mut any = false;

            if let Some(rtcp) = &self.rtcp_sock {
                if let Ok((len, _)) = rtcp.recv_from(&mut buf) {
                    any = true;
                    if len >= 4 && buf[0] >> 6 == 2 {
                        self.handle_rtcp(&buf[..len]);
                    }
                }
            }

            if let Ok((len, _)) = self.sock.recv_from(&mut buf) {
                any = true;
                self.ingest(&buf[..len]);
            }

            if !any {
                break;
            }
        }

        let mut jitter = lock(&self.jitter);
        match jitter.get(out) {
            JitterGet::Packet(n) => RtpRead::Packet(n),
            JitterGet::Lost => RtpRead::Lost,
            JitterGet::Discarded => RtpRead::Discarded,
            JitterGet::NoPacket => RtpRead::NoPacket,
        }
    }

    fn handle_rtcp(&self, buf: &[u8]) {
        let action = {
            let mut callbacks = lock(&self.callbacks);
            match &mut callbacks.rtcp {
                Some(cb) => cb(buf),
                None => RtcpAction::None,
            }
        };
        match action {
            RtcpAction::None => {}
            RtcpAction::SetDelayPackets(n) => lock(&self.jitter).set_delay_packets(n),
            RtcpAction::Inject(pkt) => self.ingest(&pkt),
        }
    }

    /// Validate one datagram and enqueue it (the non-blocking receive path
    /// and RTCP-injected retransmit replies both land here).
    fn ingest(&self, buf: &[u8]) {
        let mut owned: Option<Vec<u8>> = None;
        let mut pkt: &[u8] = buf;

        // One rewrite pass at most
        for pass in 0..2 {
            if pkt.len() < 12 {
                debug!("rtp packet too short");
                return;
            }
            if pkt[0] >> 6 != 2 {
                debug!("unsupported rtp version");
                return;
            }

            let payload = pkt[1] & 0x7F;
            if (72..=76).contains(&payload) {
                self.handle_rtcp(pkt);
                return;
            }

            if payload == self.payload {
                break;
            }

            if pass == 1 {
                return;
            }
            let rewritten = {
                let mut callbacks = lock(&self.callbacks);
                match &mut callbacks.cust {
                    Some(cb) => cb(pkt),
                    None => None,
                }
            };
            match rewritten {
                Some(v) => {
                    owned = Some(v);
                    pkt = owned.as_deref().unwrap_or(&[]);
                }
                None => return,
            }
        }

        // Strip padding
        let mut len = pkt.len();
        if pkt[0] & 0x20 != 0 {
            let pads = usize::from(pkt[len - 1]);
            if pads == 0 || 12 + pads > len {
                return;
            }
            len -= pads;
        }

        let requests = {
            let mut jitter = lock(&self.jitter);
            if jitter.take_drop_credit() {
                return;
            }
            jitter.put(&pkt[..len])
        };
        self.send_resend_requests(&requests);
    }

    fn send_resend_requests(&self, requests: &[(u16, u16)]) {
        if requests.is_empty() {
            return;
        }
        let mut callbacks = lock(&self.callbacks);
        let Some(cb) = &mut callbacks.resend else {
            return;
        };
        for &(seq, count) in requests {
            if let Some(bytes) = cb(seq, count) {
                if let Err(e) = self.send_rtcp(&bytes) {
                    debug!("resend request not sent: {e}");
                }
            }
        }
    }

    /// Send a control packet to the client's control address.
    ///
    /// # Errors
    /// I/O failure, or when no control socket is configured.
    pub fn send_rtcp(&self, buf: &[u8]) -> std::io::Result<usize> {
        match (&self.rtcp_sock, self.rtcp_peer) {
            (Some(sock), Some(peer)) => sock.send_to(buf, peer),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no rtcp channel",
            )),
        }
    }

    /// Enqueue a packet directly, bypassing the sockets.
    pub fn put(&self, buf: &[u8]) {
        self.ingest(buf);
    }

    /// Flush the jitter buffer. With `seq`/`ts` zero the SSRC unpins too;
    /// with a non-zero `seq` the buffer re-anchors there and in-flight
    /// packets from before the flush are dropped on arrival.
    pub fn flush(&self, seq: u16, timestamp: u32) {
        lock(&self.jitter).flush(seq, timestamp);
    }

    /// Update the pre-roll depth in packets.
    pub fn set_delay_packets(&self, packets: u16) {
        lock(&self.jitter).set_delay_packets(packets);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
