//! OFDM modulation and demodulation on the ultrasonic subcarrier set.
//!
//! Bits ride on the active FFT bins as differential BPSK: a 1-bit flips
//! the bin's phase by pi relative to the previous symbol, a 0-bit keeps
//! it. Every `pilot_spacing`-th active bin instead carries a fixed phase,
//! which the demodulator uses to back out the rotation common to all bins
//! (residual timing/frequency error). Hermitian symmetry over the full
//! spectrum keeps the time-domain signal real, and a cyclic prefix copied
//! from each symbol's tail absorbs multipath delay spread.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::config::{ModemConfig, SYMBOL_PEAK};
use crate::error::{Result, SonicTagError};

/// Bins whose magnitude falls below this fraction of the symbol's
/// active-band RMS carry no trustworthy phase and are flagged as erasures.
const ERASURE_FLOOR: f32 = 0.1;

/// One demodulated data symbol: hard bit decisions plus per-bit
/// low-confidence flags. The framing layer currently ignores the flags;
/// they are surfaced for telemetry.
#[derive(Debug, Clone)]
pub struct SymbolBits {
    pub bits: Vec<bool>,
    pub erasures: Vec<bool>,
}

pub struct OfdmModulator {
    fft_size: usize,
    cp_len: usize,
    data_bins: Vec<usize>,
    pilot_bins: Vec<usize>,
    ifft: Arc<dyn Fft<f32>>,
    /// BPSK polarity per data bin, carried across symbols. +1.0 is phase
    /// zero, -1.0 is phase pi.
    polarity: Vec<f32>,
}

impl OfdmModulator {
    pub fn new(cfg: &ModemConfig) -> Self {
        let data_bins = cfg.data_bins();
        let polarity = vec![1.0; data_bins.len()];
        Self {
            fft_size: cfg.fft_size,
            cp_len: cfg.cp_len,
            data_bins,
            pilot_bins: cfg.pilot_bins(),
            ifft: FftPlanner::new().plan_fft_inverse(cfg.fft_size),
            polarity,
        }
    }

    /// Modulate the header symbol: absolute BPSK against an implicit
    /// all-zero phase reference. Also seeds the differential phase state
    /// for the data symbols that follow, so each frame starts fresh.
    pub fn modulate_header(&mut self, bits: &[bool]) -> Vec<f32> {
        for (i, slot) in self.polarity.iter_mut().enumerate() {
            *slot = if bits.get(i).copied().unwrap_or(false) {
                -1.0
            } else {
                1.0
            };
        }
        self.synthesize()
    }

    /// Modulate one data symbol: each 1-bit flips its bin's phase.
    /// Missing bits in a short final chunk are treated as zeros.
    pub fn modulate_data(&mut self, bits: &[bool]) -> Vec<f32> {
        for (i, slot) in self.polarity.iter_mut().enumerate() {
            if bits.get(i).copied().unwrap_or(false) {
                *slot = -*slot;
            }
        }
        self.synthesize()
    }

    /// Samples per emitted symbol, cyclic prefix included.
    pub fn symbol_len(&self) -> usize {
        self.fft_size + self.cp_len
    }

    fn synthesize(&self) -> Vec<f32> {
        let n = self.fft_size;
        let mut spectrum = vec![Complex::new(0.0f32, 0.0); n];
        for (&k, &sign) in self.data_bins.iter().zip(self.polarity.iter()) {
            spectrum[k] = Complex::new(sign, 0.0);
            spectrum[n - k] = Complex::new(sign, 0.0);
        }
        for &k in &self.pilot_bins {
            spectrum[k] = Complex::new(1.0, 0.0);
            spectrum[n - k] = Complex::new(1.0, 0.0);
        }
        // DC and Nyquist stay zero; the mirrored bins above keep the
        // inverse transform real.
        self.ifft.process(&mut spectrum);

        let mut symbol: Vec<f32> = spectrum.iter().map(|c| c.re).collect();
        let peak = symbol.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        if peak > 0.0 {
            let scale = SYMBOL_PEAK / peak;
            for s in symbol.iter_mut() {
                *s *= scale;
            }
        }

        let mut out = Vec::with_capacity(self.cp_len + n);
        out.extend_from_slice(&symbol[n - self.cp_len..]);
        out.extend_from_slice(&symbol);
        out
    }
}

pub struct OfdmDemodulator {
    fft_size: usize,
    cp_len: usize,
    active_bins: Vec<usize>,
    data_bins: Vec<usize>,
    pilot_bins: Vec<usize>,
    fft: Arc<dyn Fft<f32>>,
    /// Spectrum of the previous symbol, the differential reference.
    prev: Option<Vec<Complex<f32>>>,
}

impl OfdmDemodulator {
    pub fn new(cfg: &ModemConfig) -> Self {
        Self {
            fft_size: cfg.fft_size,
            cp_len: cfg.cp_len,
            active_bins: cfg.active_bins(),
            data_bins: cfg.data_bins(),
            pilot_bins: cfg.pilot_bins(),
            fft: FftPlanner::new().plan_fft_forward(cfg.fft_size),
            prev: None,
        }
    }

    /// Drop the differential reference. Call between frames.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    pub fn symbol_len(&self) -> usize {
        self.fft_size + self.cp_len
    }

    /// Demodulate the header symbol (absolute BPSK) and install its
    /// spectrum as the reference for the first data symbol.
    pub fn demodulate_header(&mut self, samples: &[f32]) -> Result<Vec<bool>> {
        let spectrum = self.spectrum_of(samples)?;

        // Pilots were sent at phase zero, so their sum points along the
        // channel's common rotation.
        let pilot_ref: Complex<f32> = self.pilot_bins.iter().map(|&k| spectrum[k]).sum();
        let bits = self
            .data_bins
            .iter()
            .map(|&k| (spectrum[k] * pilot_ref.conj()).re < 0.0)
            .collect();

        self.prev = Some(spectrum);
        Ok(bits)
    }

    /// Demodulate one data symbol differentially against the previous
    /// symbol's spectrum.
    pub fn demodulate_data(&mut self, samples: &[f32]) -> Result<SymbolBits> {
        let spectrum = self.spectrum_of(samples)?;
        let prev = self.prev.as_ref().ok_or(SonicTagError::HeaderInvalid)?;

        // Common rotation across the band, estimated from the pilot
        // differentials; dividing it out is a conjugate multiply since
        // only the sign of the real part matters below.
        let pilot_ref: Complex<f32> = self
            .pilot_bins
            .iter()
            .map(|&k| spectrum[k] * prev[k].conj())
            .sum();

        let mean_sq: f32 = self
            .active_bins
            .iter()
            .map(|&k| spectrum[k].norm_sqr())
            .sum::<f32>()
            / self.active_bins.len() as f32;
        let floor = ERASURE_FLOOR * mean_sq.sqrt();

        let mut bits = Vec::with_capacity(self.data_bins.len());
        let mut erasures = Vec::with_capacity(self.data_bins.len());
        for &k in &self.data_bins {
            let diff = spectrum[k] * prev[k].conj();
            bits.push((diff * pilot_ref.conj()).re < 0.0);
            erasures.push(spectrum[k].norm() < floor);
        }

        self.prev = Some(spectrum);
        Ok(SymbolBits { bits, erasures })
    }

    fn spectrum_of(&self, samples: &[f32]) -> Result<Vec<Complex<f32>>> {
        let need = self.cp_len + self.fft_size;
        if samples.len() < need {
            return Err(SonicTagError::Truncated);
        }
        let mut buf: Vec<Complex<f32>> = samples[self.cp_len..need]
            .iter()
            .map(|&s| Complex::new(s, 0.0))
            .collect();
        self.fft.process(&mut buf);
        Ok(buf)
    }
}
