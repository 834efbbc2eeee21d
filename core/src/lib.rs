//! Ultrasonic acoustic data transfer between nearby devices.
//!
//! Payload bytes are framed with a length prefix, CRC-32, and Reed-Solomon
//! parity, modulated as differential BPSK across ~64 OFDM subcarriers in
//! the 17.5-20.5 kHz band, and announced by a Hann-windowed linear chirp
//! that the receiver matched-filters out of a continuous microphone
//! stream. The band sits above most adults' hearing while staying inside
//! the passband of commodity speakers and microphones.
//!
//! The crate works on in-memory sample buffers only; audio capture and
//! playback belong to the caller.
//!
//! ```
//! use sonictag::{ModemConfig, Receiver, Transmitter};
//!
//! let cfg = ModemConfig::default();
//! let mut tx = Transmitter::new(cfg.clone()).unwrap();
//! let mut rx = Receiver::new(cfg).unwrap();
//!
//! let frame = tx.encode(b"Hi").unwrap();
//! assert_eq!(rx.push(&frame), vec![b"Hi".to_vec()]);
//! ```

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fec;
pub mod fft_correlation;
pub mod framing;
pub mod ofdm;
pub mod sync;

pub use config::ModemConfig;
pub use decoder::Receiver;
pub use encoder::Transmitter;
pub use error::{Result, SonicTagError};
