//! Frame assembly: a framed packet becomes OFDM symbols behind a chirp
//! preamble.
//!
//! Air layout: `[chirp] [silence guard] [header symbol] [data symbols...]`.
//! The header symbol carries the data-symbol count (16-bit big-endian plus
//! its own 4-byte mini-RS) so the receiver knows how many samples to
//! collect before demodulating.

use tracing::debug;

use crate::config::{ModemConfig, HEADER_RS_PARITY};
use crate::error::Result;
use crate::fec;
use crate::framing::{self, DataHandler};
use crate::ofdm::OfdmModulator;
use crate::sync;

pub struct Transmitter {
    cfg: ModemConfig,
    handler: DataHandler,
    ofdm: OfdmModulator,
    chirp: Vec<f32>,
}

impl Transmitter {
    pub fn new(cfg: ModemConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            handler: DataHandler::new(cfg.rs_nsym),
            ofdm: OfdmModulator::new(&cfg),
            chirp: sync::generate_chirp(&cfg),
            cfg,
        })
    }

    /// Largest payload one frame can carry at this configuration.
    pub fn max_payload(&self) -> usize {
        self.handler.max_payload()
    }

    /// Encode one payload into a complete audio frame at the configured
    /// sample rate. Output values stay in [-1, 1].
    pub fn encode(&mut self, payload: &[u8]) -> Result<Vec<f32>> {
        let packet = self.handler.encode(payload)?;
        let bits = framing::bytes_to_bits(&packet);
        let bps = self.cfg.bits_per_symbol();
        let num_symbols = (bits.len() + bps - 1) / bps;

        let mut header_block = (num_symbols as u16).to_be_bytes().to_vec();
        let header_parity = fec::parity(&header_block, HEADER_RS_PARITY)?;
        header_block.extend_from_slice(&header_parity);
        let header_bits = framing::bytes_to_bits(&header_block);

        let mut samples = Vec::with_capacity(self.cfg.frame_samples(num_symbols));
        samples.extend_from_slice(&self.chirp);
        samples.resize(samples.len() + self.cfg.guard_len(), 0.0);
        samples.extend_from_slice(&self.ofdm.modulate_header(&header_bits));
        for chunk in bits.chunks(bps) {
            samples.extend_from_slice(&self.ofdm.modulate_data(chunk));
        }

        debug!(
            payload_len = payload.len(),
            num_symbols,
            samples = samples.len(),
            "encoded frame"
        );
        Ok(samples)
    }
}
