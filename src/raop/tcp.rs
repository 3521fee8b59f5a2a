//! RAOP TCP audio transport.
//!
//! Some senders push audio over a TCP side channel instead of RTP/UDP.
//! Packets are framed `24 00 <len16> F0 FF` followed by a 12-byte RTP
//! header inside the 16-byte frame head; the payload is the encrypted
//! audio. One client at a time.

use std::io::Read as _;
use std::net::{TcpListener, TcpStream};
use std::sync::Mutex;

use tracing::debug;

use super::RaopError;

const MAX_PORT: u16 = 7000;
const PENDING_CAP: usize = 64 * 1024;

struct TcpState {
    client: Option<TcpStream>,
    pending: Vec<u8>,
}

/// Non-blocking framed TCP receiver.
pub(crate) struct RaopTcp {
    server: TcpListener,
    port: u16,
    state: Mutex<TcpState>,
}

impl RaopTcp {
    /// Bind, retrying `port + 1` while taken.
    pub(crate) fn open(mut port: u16) -> Result<Self, RaopError> {
        let start = port;
        let server = loop {
            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(listener) => break listener,
                Err(_) => {
                    port += 1;
                    if port >= MAX_PORT {
                        return Err(RaopError::NoFreePort(start));
                    }
                }
            }
        };
        server.set_nonblocking(true).map_err(RaopError::Io)?;
        debug!(port, "raop tcp transport bound");

        Ok(Self {
            server,
            port,
            state: Mutex::new(TcpState {
                client: None,
                pending: Vec::new(),
            }),
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Pop one complete audio payload, non-blocking. Returns bytes copied
    /// into `out`, 0 when no complete packet is pending.
    pub(crate) fn read(&self, out: &mut [u8]) -> usize {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state.client.is_none() {
            match self.server.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "raop tcp client connected");
                    let _ = stream.set_nonblocking(true);
                    state.client = Some(stream);
                }
                Err(_) => return 0,
            }
        }

        // Drain whatever the socket has
        let mut chunk = [0u8; 4096];
        loop {
            let result = match state.client.as_mut() {
                Some(client) => client.read(&mut chunk),
                None => break,
            };
            match result {
                Ok(0) => {
                    debug!("raop tcp client closed");
                    state.client = None;
                    break;
                }
                Ok(n) => {
                    if state.pending.len() + n > PENDING_CAP {
                        state.pending.clear();
                    }
                    state.pending.extend_from_slice(&chunk[..n]);
                }
                Err(_) => break,
            }
        }

        // Find the frame head
        let start = state
            .pending
            .windows(6)
            .position(|w| w[0] == 0x24 && w[1] == 0x00 && w[4] == 0xF0 && w[5] == 0xFF);
        let Some(start) = start else {
            // Keep a tail that could begin a header
            let keep = state.pending.len().min(5);
            let from = state.pending.len() - keep;
            state.pending.drain(..from);
            return 0;
        };
        state.pending.drain(..start);

        if state.pending.len() < 16 {
            return 0;
        }
        let len = usize::from(u16::from_be_bytes([state.pending[2], state.pending[3]]));
        let payload = len.saturating_sub(12);
        if state.pending.len() < 16 + payload {
            return 0;
        }

        let n = payload.min(out.len());
        out[..n].copy_from_slice(&state.pending[16..16 + n]);
        state.pending.drain(..16 + payload);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpStream;
    use std::time::Duration;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x24, 0x00];
        out.extend_from_slice(
            &u16::try_from(payload.len() + 12).unwrap().to_be_bytes(),
        );
        out.extend_from_slice(&[0xF0, 0xFF]);
        out.extend_from_slice(&[0u8; 10]); // rest of the 16-byte head
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn framed_packets_round_trip() {
        let tcp = RaopTcp::open(6800).unwrap();
        let mut sender = TcpStream::connect(("127.0.0.1", tcp.port())).unwrap();

        sender.write_all(&frame(&[1, 2, 3, 4])).unwrap();
        sender.write_all(&frame(&[9, 9])).unwrap();
        sender.flush().unwrap();

        let mut out = [0u8; 32];
        let mut first = 0;
        for _ in 0..100 {
            first = tcp.read(&mut out);
            if first > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(first, 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);

        let mut second = 0;
        for _ in 0..100 {
            second = tcp.read(&mut out);
            if second > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(second, 2);
        assert_eq!(&out[..2], &[9, 9]);
    }

    #[test]
    fn garbage_before_header_is_skipped() {
        let tcp = RaopTcp::open(6820).unwrap();
        let mut sender = TcpStream::connect(("127.0.0.1", tcp.port())).unwrap();

        let mut bytes = vec![0xAA, 0xBB, 0xCC];
        bytes.extend_from_slice(&frame(&[7, 8]));
        sender.write_all(&bytes).unwrap();

        let mut out = [0u8; 32];
        let mut n = 0;
        for _ in 0..100 {
            n = tcp.read(&mut out);
            if n > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(n, 2);
        assert_eq!(&out[..2], &[7, 8]);
    }
}
