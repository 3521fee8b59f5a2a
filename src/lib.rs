//! # aircat
//!
//! Real-time audio core of a networked audio appliance: receives audio from
//! AirPlay/RAOP senders or pulls it from Icecast/HTTP streams and local
//! files, decodes it to PCM, mixes concurrent streams and plays the result
//! through a host audio device.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aircat::{Outputs, OutputConfig, RaopConfig, raop::RaopServer};
//!
//! # fn example() -> Result<(), aircat::AirCatError> {
//! let outputs = Outputs::open(&OutputConfig::default())?;
//! let handle = outputs.open_handle("airtunes")?;
//!
//! let server = RaopServer::start(RaopConfig::default(), handle)?;
//! // ... run until shutdown ...
//! server.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Audio primitives: formats, samples, ring buffer
pub mod audio;
/// Configuration types
pub mod config;
/// RAOP crypto: AirPort RSA key operations and packet decryption
pub mod crypto;
/// Audio decoders (PCM, ALAC, MP3, AAC)
pub mod decoder;
/// Compressed-stream demuxers (MPEG audio, MP4/ISO-BMFF)
pub mod demux;
/// Error types
pub mod error;
/// Output mixer and device modules
pub mod outputs;
/// File/HTTP playback pipeline
pub mod player;
/// RAOP server (RTSP control + RTP audio ingestion)
pub mod raop;
/// RTP receiver with jitter buffer and retransmit scheduling
pub mod rtp;
/// RTSP request/response engine
pub mod rtsp;
/// SDP parsing
pub mod sdp;
/// Unified seekable byte source over files and HTTP
pub mod stream;

mod util;

pub use audio::{AudioFormat, Sample, VOLUME_MAX};
pub use config::{OutputConfig, RaopConfig};
pub use error::AirCatError;
pub use outputs::{OutputHandle, Outputs};
pub use player::FilePlayer;
