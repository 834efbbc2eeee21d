//! Streaming receiver: turns an unbounded microphone stream into decoded
//! payloads.
//!
//! `push` accepts arbitrary chunk sizes, never blocks, and emits the
//! payloads of every frame completed by the accumulated buffer, in chirp
//! order. Demodulation or framing failures never surface; they send the
//! state machine back to searching (the next chirp starts fresh) and are
//! kept in `last_error` for telemetry.

use tracing::{debug, trace, warn};

use crate::config::{ModemConfig, HEADER_RS_PARITY};
use crate::error::{Result, SonicTagError};
use crate::fec;
use crate::framing::{self, DataHandler};
use crate::ofdm::OfdmDemodulator;
use crate::sync::ChirpDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Matched-filtering the buffer for a chirp.
    Searching,
    /// Chirp found; waiting for the header symbol.
    Header,
    /// Header decoded; waiting for `num_symbols` data symbols.
    Payload { num_symbols: usize },
}

pub struct Receiver {
    cfg: ModemConfig,
    handler: DataHandler,
    ofdm: OfdmDemodulator,
    detector: ChirpDetector,
    buf: Vec<f32>,
    state: RxState,
    /// Samples still to discard before the frame body begins; nonzero
    /// only when a detection outran the buffered guard interval.
    skip: usize,
    symbol_len: usize,
    bits_per_symbol: usize,
    max_data_symbols: usize,
    /// Rolling-buffer cap while searching: one maximum frame plus one
    /// chirp length.
    buffer_cap: usize,
    last_error: Option<SonicTagError>,
}

impl Receiver {
    pub fn new(cfg: ModemConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            handler: DataHandler::new(cfg.rs_nsym),
            ofdm: OfdmDemodulator::new(&cfg),
            detector: ChirpDetector::new(&cfg),
            buf: Vec::new(),
            state: RxState::Searching,
            skip: 0,
            symbol_len: cfg.symbol_len(),
            bits_per_symbol: cfg.bits_per_symbol(),
            max_data_symbols: cfg.max_data_symbols(),
            buffer_cap: cfg.max_frame_samples() + cfg.chirp_len(),
            last_error: None,
            cfg,
        })
    }

    /// Feed captured samples; returns the payloads of frames completed
    /// within this call, in the order their chirps were detected.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(samples);
        let mut decoded = Vec::new();
        loop {
            let progressed = match self.state {
                RxState::Searching => self.step_search(),
                RxState::Header => self.step_header(),
                RxState::Payload { num_symbols } => self.step_payload(num_symbols, &mut decoded),
            };
            if !progressed {
                break;
            }
        }
        decoded
    }

    /// Empty the rolling buffer and return to searching.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.detector.reset();
        self.ofdm.reset();
        self.state = RxState::Searching;
        self.skip = 0;
    }

    /// Most recent internal decode failure, for telemetry.
    pub fn last_error(&self) -> Option<&SonicTagError> {
        self.last_error.as_ref()
    }

    /// Samples currently held in the rolling buffer.
    pub fn buffered_samples(&self) -> usize {
        self.buf.len()
    }

    fn step_search(&mut self) -> bool {
        match self.detector.scan(&self.buf) {
            Ok(Some(peak)) => {
                let frame_start = peak + self.detector.frame_offset();
                let cut = frame_start.min(self.buf.len());
                self.buf.drain(..cut);
                self.skip = frame_start - cut;
                self.detector.reset();
                self.state = RxState::Header;
                debug!(peak, "chirp detected");
                true
            }
            Ok(None) => {
                // Cap the buffer while nothing is detected: slide past
                // the oldest chirp length and keep listening.
                if self.buf.len() > self.buffer_cap {
                    let drop = self.cfg.chirp_len();
                    self.buf.drain(..drop);
                    self.detector.advance(drop);
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(error = %e, "matched filter failed");
                self.last_error = Some(e);
                false
            }
        }
    }

    fn step_header(&mut self) -> bool {
        if self.skip > 0 {
            let cut = self.skip.min(self.buf.len());
            self.buf.drain(..cut);
            self.skip -= cut;
            if self.skip > 0 {
                return false;
            }
        }
        let symbol_len = self.symbol_len;
        if self.buf.len() < symbol_len {
            return false;
        }
        match self.decode_header() {
            Ok(num_symbols) => {
                self.buf.drain(..symbol_len);
                self.state = RxState::Payload { num_symbols };
                debug!(num_symbols, "header decoded");
            }
            Err(e) => {
                // False chirp: keep the samples, rescan them. The chirp
                // region itself was already consumed, so the same peak
                // cannot re-trigger.
                trace!(error = %e, "header rejected, resuming search");
                self.last_error = Some(e);
                self.ofdm.reset();
                self.state = RxState::Searching;
            }
        }
        true
    }

    fn decode_header(&mut self) -> Result<usize> {
        let symbol_len = self.symbol_len;
        let bits = self.ofdm.demodulate_header(&self.buf[..symbol_len])?;
        let bytes = framing::bits_to_bytes(&bits);
        if bytes.len() < 2 + HEADER_RS_PARITY {
            return Err(SonicTagError::HeaderInvalid);
        }
        let fixed = fec::correct(&bytes[..2 + HEADER_RS_PARITY], HEADER_RS_PARITY)
            .map_err(|_| SonicTagError::HeaderInvalid)?;
        let num_symbols = u16::from_be_bytes([fixed[0], fixed[1]]) as usize;
        if num_symbols == 0 || num_symbols > self.max_data_symbols {
            return Err(SonicTagError::HeaderInvalid);
        }
        Ok(num_symbols)
    }

    fn step_payload(&mut self, num_symbols: usize, decoded: &mut Vec<Vec<u8>>) -> bool {
        let symbol_len = self.symbol_len;
        let needed = num_symbols * symbol_len;
        if self.buf.len() < needed {
            return false;
        }

        let mut bits = Vec::with_capacity(num_symbols * self.bits_per_symbol);
        let mut erased = 0usize;
        let mut demod_error = None;
        for s in 0..num_symbols {
            match self
                .ofdm
                .demodulate_data(&self.buf[s * symbol_len..(s + 1) * symbol_len])
            {
                Ok(symbol) => {
                    erased += symbol.erasures.iter().filter(|&&e| e).count();
                    bits.extend_from_slice(&symbol.bits);
                }
                Err(e) => {
                    demod_error = Some(e);
                    break;
                }
            }
        }
        if erased > 0 {
            trace!(erased, "low-confidence bins in frame");
        }

        let outcome = match demod_error {
            Some(e) => Err(e),
            None => self.decode_packet(&framing::bits_to_bytes(&bits)),
        };
        match outcome {
            Ok(payload) => {
                debug!(payload_len = payload.len(), "frame decoded");
                decoded.push(payload);
            }
            Err(e) => {
                warn!(error = %e, "frame rejected");
                self.last_error = Some(e);
            }
        }

        // The frame region is consumed either way; the next chirp starts
        // fresh (no retry on this buffer region).
        self.buf.drain(..needed);
        self.detector.reset();
        self.ofdm.reset();
        self.state = RxState::Searching;
        true
    }

    fn decode_packet(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < framing::LEN_FIELD {
            return Err(SonicTagError::BadLength);
        }
        let payload_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let block_len = framing::packet_len(payload_len, self.cfg.rs_nsym);
        if block_len > bytes.len() {
            return Err(SonicTagError::BadLength);
        }
        self.handler.decode(&bytes[..block_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Transmitter;

    fn loopback() -> (Transmitter, Receiver) {
        let cfg = ModemConfig::default();
        (
            Transmitter::new(cfg.clone()).unwrap(),
            Receiver::new(cfg).unwrap(),
        )
    }

    #[test]
    fn test_single_frame_roundtrip() {
        let (mut tx, mut rx) = loopback();
        let frame = tx.encode(b"Hi").unwrap();
        let decoded = rx.push(&frame);
        assert_eq!(decoded, vec![b"Hi".to_vec()]);
    }

    #[test]
    fn test_frame_with_surrounding_silence() {
        let (mut tx, mut rx) = loopback();
        let frame = tx.encode(b"Hello, World!").unwrap();

        let mut stream = vec![0.0f32; 4800];
        stream.extend_from_slice(&frame);
        stream.extend(vec![0.0f32; 4800]);

        let decoded = rx.push(&stream);
        assert_eq!(decoded, vec![b"Hello, World!".to_vec()]);
        // Exactly once.
        assert!(rx.push(&vec![0.0f32; 4800]).is_empty());
    }

    #[test]
    fn test_two_frames_in_order() {
        let (mut tx, mut rx) = loopback();
        let mut stream = tx.encode(b"first").unwrap();
        stream.extend(vec![0.0f32; 2000]);
        stream.extend(tx.encode(b"second").unwrap());

        let decoded = rx.push(&stream);
        assert_eq!(decoded, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_partial_frame_stays_pending() {
        let (mut tx, mut rx) = loopback();
        let frame = tx.encode(b"pending").unwrap();
        let (head, tail) = frame.split_at(frame.len() - 100);

        assert!(rx.push(head).is_empty());
        assert_eq!(rx.push(tail), vec![b"pending".to_vec()]);
    }

    #[test]
    fn test_reset_discards_pending_frame() {
        let (mut tx, mut rx) = loopback();
        let frame = tx.encode(b"gone").unwrap();
        rx.push(&frame[..frame.len() - 100]);
        rx.reset();
        assert_eq!(rx.buffered_samples(), 0);
        assert!(rx.push(&frame[frame.len() - 100..]).is_empty());
    }

    #[test]
    fn test_max_payload_roundtrip() {
        let (mut tx, mut rx) = loopback();
        let payload = vec![0u8; 233];
        let frame = tx.encode(&payload).unwrap();
        assert_eq!(rx.push(&frame), vec![payload]);
    }
}
