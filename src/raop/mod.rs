//! RAOP server: RTSP control plane plus per-session RTP audio ingestion.
//!
//! The server accepts AirPlay 1 senders, negotiates codec and keys over
//! RTSP/SDP, and attaches one mixer stream per active session. mDNS
//! registration itself is a host concern; [`RaopServer::service_name`] and
//! [`RaopServer::txt_records`] provide what the host must publish.

mod audio;
pub mod dmap;
mod session;
mod tcp;

pub use dmap::DmapTrack;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RaopConfig;
use crate::crypto::CryptoError;
use crate::decoder::DecoderError;
use crate::outputs::{OutputError, OutputHandle};
use crate::rtp::RtpError;
use crate::rtsp::{RtspResponse, RtspServerCodec, StatusCode};

use session::Session;

/// Errors from the RAOP server.
#[derive(Debug, thiserror::Error)]
pub enum RaopError {
    /// No free port below the retry bound
    #[error("no free port from {0}")]
    NoFreePort(u16),

    /// ANNOUNCE did not provide the format the codec needs
    #[error("missing codec format parameters")]
    MissingFormat,

    /// Server already running
    #[error("server already running")]
    AlreadyRunning,

    /// RTP transport failed
    #[error(transparent)]
    Rtp(#[from] RtpError),

    /// Decoder setup failed
    #[error(transparent)]
    Decoder(#[from] DecoderError),

    /// Output stream setup failed
    #[error(transparent)]
    Output(#[from] OutputError),

    /// Key handling failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Socket failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// RAOP audio transport variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    /// RTP over UDP (the normal case)
    Udp,
    /// Length-framed TCP push
    Tcp,
}

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerStatus {
    /// Thread spawned, listener not yet serving
    Starting = 0,
    /// Accepting clients
    Running = 1,
    /// Shutdown requested
    Stopping = 2,
    /// Fully stopped
    Stopped = 3,
}

impl ServerStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Internal per-session registry entry.
#[derive(Default)]
pub(crate) struct SessionInfo {
    pub id: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub cover: Option<(Vec<u8>, String)>,
    pub position: u64,
    pub duration: u64,
    pub played_ms: u64,
    pub volume: u32,
}

/// Public snapshot of one active session.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    /// Session id
    pub id: String,
    /// Client name
    pub name: Option<String>,
    /// Track title
    pub title: Option<String>,
    /// Track artist
    pub artist: Option<String>,
    /// Track album
    pub album: Option<String>,
    /// Cover art bytes and MIME type
    pub cover: Option<(Vec<u8>, String)>,
    /// Position in seconds
    pub position: u64,
    /// Duration in seconds
    pub duration: u64,
    /// Milliseconds delivered to the device
    pub played_ms: u64,
    /// Stream volume in mixer units
    pub volume: u32,
}

pub(crate) struct ServerShared {
    pub config: RaopConfig,
    pub output: OutputHandle,
    pub infos: Mutex<Vec<Arc<Mutex<SessionInfo>>>>,
    pub client_count: AtomicUsize,
}

/// The RAOP server handle.
pub struct RaopServer {
    shared: Arc<ServerShared>,
    status: Arc<AtomicU8>,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
    port: u16,
}

fn bind_with_retry(start: u16, tries: u16) -> Result<StdTcpListener, RaopError> {
    let mut port = start;
    loop {
        match StdTcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => return Ok(listener),
            Err(_) => {
                port += 1;
                if port >= start.saturating_add(tries) {
                    return Err(RaopError::NoFreePort(start));
                }
            }
        }
    }
}

impl RaopServer {
    /// Bind and start serving on a background thread. Streams attach to
    /// `output`.
    ///
    /// # Errors
    /// `NoFreePort` or runtime construction failure.
    pub fn start(config: RaopConfig, output: OutputHandle) -> Result<Self, RaopError> {
        let listener = bind_with_retry(config.port, 16)?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let shared = Arc::new(ServerShared {
            config,
            output,
            infos: Mutex::new(Vec::new()),
            client_count: AtomicUsize::new(0),
        });
        let status = Arc::new(AtomicU8::new(ServerStatus::Starting as u8));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let thread_shared = Arc::clone(&shared);
        let thread_status = Arc::clone(&status);
        let thread = std::thread::Builder::new()
            .name("aircat-raop".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!("raop runtime failed: {e}");
                        thread_status.store(ServerStatus::Stopped as u8, Ordering::Release);
                        return;
                    }
                };
                runtime.block_on(serve(listener, thread_shared, thread_status.clone(), shutdown_rx));
                thread_status.store(ServerStatus::Stopped as u8, Ordering::Release);
            })?;

        info!(port, "raop server started");
        Ok(Self {
            shared,
            status,
            shutdown,
            thread: Some(thread),
            port,
        })
    }

    /// Bound RTSP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        ServerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Snapshot of all active sessions.
    #[must_use]
    pub fn streams(&self) -> Vec<StreamSnapshot> {
        lock(&self.shared.infos)
            .iter()
            .map(|info| {
                let info = lock(info);
                StreamSnapshot {
                    id: info.id.clone(),
                    name: info.name.clone(),
                    title: info.title.clone(),
                    artist: info.artist.clone(),
                    album: info.album.clone(),
                    cover: info.cover.clone(),
                    position: info.position,
                    duration: info.duration,
                    played_ms: info.played_ms,
                    volume: info.volume,
                }
            })
            .collect()
    }

    /// mDNS service instance name: `<hex-mac>@<device-name>`, to be
    /// registered as `_raop._tcp`.
    #[must_use]
    pub fn service_name(&self) -> String {
        let mac = &self.shared.config.hw_addr;
        format!(
            "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}@{}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5], self.shared.config.name
        )
    }

    /// TXT records the host must publish next to the service.
    #[must_use]
    pub fn txt_records(&self) -> Vec<(&'static str, String)> {
        let pw = self.shared.config.password.is_some();
        vec![
            ("txtvers", "1".to_string()),
            ("tp", "TCP,UDP".to_string()),
            ("sm", "false".to_string()),
            ("sv", "false".to_string()),
            ("ek", "1".to_string()),
            ("et", "0,1".to_string()),
            ("cn", "0,1".to_string()),
            ("ch", "2".to_string()),
            ("ss", "16".to_string()),
            ("sr", "44100".to_string()),
            ("pw", pw.to_string()),
            ("vn", "3".to_string()),
            ("md", "0,1,2".to_string()),
        ]
    }

    /// Request shutdown and wait for the server thread.
    pub fn stop(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.thread.is_none() {
            return;
        }
        self.status
            .store(ServerStatus::Stopping as u8, Ordering::Release);
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("raop server stopped");
    }
}

impl Drop for RaopServer {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

async fn serve(
    listener: StdTcpListener,
    shared: Arc<ServerShared>,
    status: Arc<AtomicU8>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            warn!("raop listener failed: {e}");
            return;
        }
    };
    status.store(ServerStatus::Running as u8, Ordering::Release);

    let mut tasks = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };

                if shared.client_count.load(Ordering::Acquire) >= shared.config.max_clients {
                    debug!(%peer, "busy, refusing client");
                    tasks.spawn(refuse_client(stream));
                    continue;
                }

                shared.client_count.fetch_add(1, Ordering::AcqRel);
                let client_shared = Arc::clone(&shared);
                tasks.spawn(async move {
                    handle_client(stream, peer, Arc::clone(&client_shared)).await;
                    client_shared.client_count.fetch_sub(1, Ordering::AcqRel);
                });
            }
        }
    }

    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
}

async fn refuse_client(mut stream: TcpStream) {
    let resp = RtspResponse::new(StatusCode::SERVICE_UNAVAILABLE);
    let _ = stream.write_all(&resp.encode()).await;
}

async fn handle_client(mut stream: TcpStream, peer: SocketAddr, shared: Arc<ServerShared>) {
    debug!(%peer, "rtsp client connected");
    let local_ip = stream
        .local_addr()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |a| a.ip());

    let mut session = Session::new(shared, peer, local_ip);
    let mut codec = RtspServerCodec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(%peer, "rtsp read failed: {e}");
                break;
            }
        };
        codec.feed(&buf[..n]);

        loop {
            match codec.decode() {
                Ok(Some(request)) => {
                    let response = session.handle_request(&request);
                    if stream.write_all(&response.encode()).await.is_err() {
                        session.close();
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(%peer, "rtsp parse failed: {e}");
                    let resp = RtspResponse::new(StatusCode::BAD_REQUEST);
                    let _ = stream.write_all(&resp.encode()).await;
                    session.close();
                    return;
                }
            }
        }
    }

    session.close();
    debug!(%peer, "rtsp client disconnected");
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
