use crate::error::{Result, SonicTagError};
use crate::framing;

/// Parity bytes protecting the header symbol's data-symbol count.
pub(crate) const HEADER_RS_PARITY: usize = 4;

/// Bits carried by the header symbol: 16-bit symbol count plus mini-RS
/// parity. Must fit on the data bins of a single OFDM symbol.
pub(crate) const HEADER_BITS: usize = 8 * (2 + HEADER_RS_PARITY);

/// Silence between the end of the chirp and the header symbol, in seconds.
pub(crate) const GUARD_SECS: f64 = 0.01;

/// Peak amplitude of a time-domain OFDM symbol after normalization.
pub(crate) const SYMBOL_PEAK: f32 = 0.9;

/// Largest Reed-Solomon codeword over GF(256).
pub(crate) const RS_MAX_BLOCK: usize = 255;

/// Immutable modem configuration, chosen once at construction and shared
/// verbatim by both endpoints of a link.
///
/// The defaults place ~64 subcarriers in the 17.5-20.5 kHz band at
/// 48 kHz / 1024-point FFT, which keeps the signal inaudible to most
/// adults while staying inside the passband of commodity speakers.
#[derive(Debug, Clone, PartialEq)]
pub struct ModemConfig {
    /// Sample rate in Hz. Both endpoints must match.
    pub sample_rate: usize,
    /// OFDM symbol length in samples, before the cyclic prefix.
    pub fft_size: usize,
    /// Cyclic prefix length in samples. Longer raises multipath tolerance
    /// at the cost of throughput.
    pub cp_len: usize,
    /// Lower edge of the active band in Hz.
    pub band_low: f32,
    /// Upper edge of the active band in Hz.
    pub band_high: f32,
    /// Every `pilot_spacing`-th active bin carries a known phase instead
    /// of data.
    pub pilot_spacing: usize,
    /// Reed-Solomon parity bytes per packet; tolerates `rs_nsym / 2` byte
    /// errors.
    pub rs_nsym: usize,
    /// Synchronization chirp length in seconds.
    pub chirp_duration: f64,
    /// Normalized matched-filter peak threshold for chirp detection.
    pub corr_threshold: f32,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fft_size: 1024,
            cp_len: 256,
            band_low: 17_500.0,
            band_high: 20_500.0,
            pilot_spacing: 4,
            rs_nsym: 16,
            chirp_duration: 0.05,
            corr_threshold: 0.5,
        }
    }
}

impl ModemConfig {
    /// Check internal consistency. Called by the transmitter and receiver
    /// constructors.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SonicTagError::InvalidConfig(msg));
        if self.sample_rate == 0 {
            return fail("sample_rate must be positive".into());
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 64 {
            return fail(format!("fft_size {} must be a power of two >= 64", self.fft_size));
        }
        if self.cp_len == 0 || self.cp_len >= self.fft_size {
            return fail(format!(
                "cp_len {} must be between 1 and fft_size - 1",
                self.cp_len
            ));
        }
        if !(self.band_low > 0.0 && self.band_low < self.band_high) {
            return fail(format!(
                "band [{}, {}] must satisfy 0 < low < high",
                self.band_low, self.band_high
            ));
        }
        if self.band_high * 2.0 > self.sample_rate as f32 {
            return fail(format!(
                "band_high {} exceeds the Nyquist frequency",
                self.band_high
            ));
        }
        let (lo, hi) = self.bin_bounds();
        if lo < 1 || hi >= self.fft_size / 2 || lo > hi {
            return fail(format!(
                "band [{}, {}] maps to no usable FFT bins",
                self.band_low, self.band_high
            ));
        }
        if self.pilot_spacing < 2 {
            return fail("pilot_spacing must be at least 2".into());
        }
        if self.rs_nsym < 2 || framing::max_payload(self.rs_nsym) == 0 {
            return fail(format!(
                "rs_nsym {} leaves no room for a payload in a 255-byte block",
                self.rs_nsym
            ));
        }
        if self.bits_per_symbol() < HEADER_BITS {
            return fail(format!(
                "only {} data bins; the header symbol needs {}",
                self.bits_per_symbol(),
                HEADER_BITS
            ));
        }
        if !(self.chirp_duration > 0.0) || self.chirp_len() == 0 {
            return fail("chirp_duration must be positive".into());
        }
        if !(self.corr_threshold > 0.0 && self.corr_threshold <= 1.0) {
            return fail(format!(
                "corr_threshold {} must be in (0, 1]",
                self.corr_threshold
            ));
        }
        Ok(())
    }

    /// First and last FFT bin whose center frequency lies inside the band.
    fn bin_bounds(&self) -> (usize, usize) {
        let bin_hz = self.sample_rate as f64 / self.fft_size as f64;
        let lo = (self.band_low as f64 / bin_hz).ceil() as usize;
        let hi = (self.band_high as f64 / bin_hz).floor() as usize;
        (lo, hi)
    }

    /// All bins inside the active band, in increasing order.
    pub fn active_bins(&self) -> Vec<usize> {
        let (lo, hi) = self.bin_bounds();
        (lo..=hi).collect()
    }

    /// Every `pilot_spacing`-th active bin, starting with the first.
    pub fn pilot_bins(&self) -> Vec<usize> {
        self.active_bins()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % self.pilot_spacing == 0)
            .map(|(_, k)| k)
            .collect()
    }

    /// Active bins that carry data bits.
    pub fn data_bins(&self) -> Vec<usize> {
        self.active_bins()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % self.pilot_spacing != 0)
            .map(|(_, k)| k)
            .collect()
    }

    /// Data bits per OFDM symbol.
    pub fn bits_per_symbol(&self) -> usize {
        self.data_bins().len()
    }

    /// Samples per OFDM symbol including the cyclic prefix.
    pub fn symbol_len(&self) -> usize {
        self.fft_size + self.cp_len
    }

    /// Synchronization chirp length in samples.
    pub fn chirp_len(&self) -> usize {
        (self.chirp_duration * self.sample_rate as f64).round() as usize
    }

    /// Silence guard between chirp and header, in samples.
    pub fn guard_len(&self) -> usize {
        (GUARD_SECS * self.sample_rate as f64).round() as usize
    }

    /// Largest payload a single frame can carry.
    pub fn max_payload(&self) -> usize {
        framing::max_payload(self.rs_nsym)
    }

    /// Data symbols needed by the largest possible packet. Headers
    /// announcing more than this are rejected as false detections.
    pub fn max_data_symbols(&self) -> usize {
        let bps = self.bits_per_symbol();
        (RS_MAX_BLOCK * 8 + bps - 1) / bps
    }

    /// Total samples in a frame carrying `num_data_symbols` data symbols.
    pub fn frame_samples(&self, num_data_symbols: usize) -> usize {
        self.chirp_len() + self.guard_len() + (1 + num_data_symbols) * self.symbol_len()
    }

    /// Upper bound on frame length, used to size the receive buffer.
    pub fn max_frame_samples(&self) -> usize {
        self.frame_samples(self.max_data_symbols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let cfg = ModemConfig::default();
        cfg.validate().unwrap();
    }

    #[test]
    fn test_default_bin_geometry() {
        let cfg = ModemConfig::default();
        // 46.875 Hz spacing puts bins 374..=437 inside 17.5-20.5 kHz.
        let active = cfg.active_bins();
        assert_eq!(active.first(), Some(&374));
        assert_eq!(active.last(), Some(&437));
        assert_eq!(active.len(), 64);
        assert_eq!(cfg.pilot_bins().len(), 16);
        assert_eq!(cfg.bits_per_symbol(), 48);
    }

    #[test]
    fn test_default_frame_geometry() {
        let cfg = ModemConfig::default();
        assert_eq!(cfg.chirp_len(), 2400);
        assert_eq!(cfg.guard_len(), 480);
        assert_eq!(cfg.symbol_len(), 1280);
        assert_eq!(cfg.max_payload(), 233);
        assert_eq!(cfg.max_data_symbols(), 43);
    }

    #[test]
    fn test_rejects_band_above_nyquist() {
        let cfg = ModemConfig {
            band_high: 25_000.0,
            ..ModemConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_cp_longer_than_symbol() {
        let cfg = ModemConfig {
            cp_len: 1024,
            ..ModemConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_narrow_band() {
        // 300 Hz of band is ~6 bins, far short of the 48 header bits.
        let cfg = ModemConfig {
            band_low: 19_000.0,
            band_high: 19_300.0,
            ..ModemConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
