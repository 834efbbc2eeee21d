//! Chirp preamble generation and streaming matched-filter detection.
//!
//! Every frame opens with a Hann-windowed linear chirp sweeping the active
//! band. The detector cross-correlates the incoming stream against the
//! chirp, normalizes by the local signal energy, and reports a detection
//! when a correlation peak clears the configured threshold and dominates
//! its neighborhood of one chirp length.
//!
//! Detection is incremental: correlation values are computed once per
//! buffer position and cached, so arbitrarily small `push` chunks cost
//! O(chirp) each and the outcome never depends on how the stream was
//! chunked.

use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::config::ModemConfig;
use crate::error::Result;
use crate::fft_correlation;

/// Linear up-chirp across the active band, Hann-windowed to keep sweep
/// edges from splattering outside it.
pub fn generate_chirp(cfg: &ModemConfig) -> Vec<f32> {
    let n = cfg.chirp_len();
    let fs = cfg.sample_rate as f64;
    let duration = n as f64 / fs;
    let sweep_rate = (cfg.band_high - cfg.band_low) as f64 / duration;

    (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            let phase = 2.0 * PI * (cfg.band_low as f64 * t + 0.5 * sweep_rate * t * t);
            let window = if n > 1 {
                0.5 * (1.0 - (2.0 * PI * i as f64 / (n - 1) as f64).cos())
            } else {
                1.0
            };
            (window * phase.sin()) as f32
        })
        .collect()
}

/// Streaming chirp detector over a rolling sample buffer.
///
/// Positions are indices into the caller's buffer; the caller reports
/// front drains through [`ChirpDetector::advance`] so cached correlation
/// values stay aligned. A detection at position `p` means the chirp
/// starts at `buf[p]` and the frame body starts `chirp + guard` samples
/// later.
pub struct ChirpDetector {
    template: Vec<f32>,
    template_energy: f64,
    chirp_len: usize,
    guard_len: usize,
    threshold: f32,
    /// Normalized correlation magnitude per buffer position. Front entry
    /// corresponds to position `corr_start` (may go negative after
    /// drains; old values are kept while still inside some candidate's
    /// comparison window).
    corr: VecDeque<f32>,
    corr_start: i64,
    /// Next position to judge as a candidate peak.
    scan_pos: usize,
}

/// Direct-vs-FFT crossover: new regions longer than this many chirp
/// lengths go through block FFT correlation.
const FFT_CROSSOVER: usize = 4;

impl ChirpDetector {
    pub fn new(cfg: &ModemConfig) -> Self {
        let template = generate_chirp(cfg);
        let template_energy = template.iter().map(|&s| (s as f64) * (s as f64)).sum();
        Self {
            chirp_len: template.len(),
            guard_len: cfg.guard_len(),
            template,
            template_energy,
            threshold: cfg.corr_threshold,
            corr: VecDeque::new(),
            corr_start: 0,
            scan_pos: 0,
        }
    }

    /// Offset from a detected chirp start to the first frame sample.
    pub fn frame_offset(&self) -> usize {
        self.chirp_len + self.guard_len
    }

    /// Extend the correlation cache over `buf` and return the earliest
    /// decidable peak, if any.
    ///
    /// A position is only accepted once a full chirp length of
    /// correlation lookahead is available, so a stronger peak arriving
    /// just behind a candidate can still win. Positions rejected here are
    /// never revisited.
    pub fn scan(&mut self, buf: &[f32]) -> Result<Option<usize>> {
        self.extend_correlation(buf)?;

        let last = self.corr_start + self.corr.len() as i64 - 1;
        loop {
            let p = self.scan_pos;
            if last < (p + self.chirp_len) as i64 {
                return Ok(None);
            }
            let c = self.corr_at(p as i64);
            if c > self.threshold && self.is_window_peak(p, c) {
                self.scan_pos = p + 1;
                return Ok(Some(p));
            }
            self.scan_pos = p + 1;
            self.prune();
        }
    }

    /// Report that `n` samples were drained from the buffer front.
    pub fn advance(&mut self, n: usize) {
        self.corr_start -= n as i64;
        self.scan_pos = self.scan_pos.saturating_sub(n);
        self.prune();
    }

    /// Forget everything; the next scan starts from scratch.
    pub fn reset(&mut self) {
        self.corr.clear();
        self.corr_start = 0;
        self.scan_pos = 0;
    }

    fn corr_at(&self, position: i64) -> f32 {
        self.corr[(position - self.corr_start) as usize]
    }

    fn is_window_peak(&self, p: usize, c: f32) -> bool {
        let lo = p.saturating_sub(self.chirp_len).max(self.corr_start.max(0) as usize);
        for q in lo..=(p + self.chirp_len) {
            if q == p {
                continue;
            }
            let other = self.corr_at(q as i64);
            // Earlier equal values win, so a tie behind us disqualifies.
            if other > c || (other == c && q < p) {
                return false;
            }
        }
        true
    }

    /// Drop cached values that can no longer fall inside any future
    /// candidate's comparison window.
    fn prune(&mut self) {
        let floor = self.scan_pos as i64 - self.chirp_len as i64;
        while self.corr_start < floor && !self.corr.is_empty() {
            self.corr.pop_front();
            self.corr_start += 1;
        }
    }

    fn extend_correlation(&mut self, buf: &[f32]) -> Result<()> {
        if buf.len() < self.chirp_len {
            return Ok(());
        }
        let avail = buf.len() - self.chirp_len + 1;
        // A drain can push the whole cached region before the buffer
        // start; realign so new entries index from the current front.
        if self.corr_start + (self.corr.len() as i64) < 0 {
            self.corr.clear();
            self.corr_start = 0;
        }
        if self.corr.is_empty() {
            self.corr_start = self.corr_start.max(0);
        }
        let next = (self.corr_start + self.corr.len() as i64) as usize;
        if next >= avail {
            return Ok(());
        }

        let segment = &buf[next..];
        let new_positions = avail - next;
        let raw = if new_positions > FFT_CROSSOVER * self.chirp_len {
            fft_correlation::correlate_valid(segment, &self.template)?
        } else {
            self.correlate_direct(segment, new_positions)
        };
        debug_assert_eq!(raw.len(), new_positions);

        // Sliding energy of the window under the template, f64 to keep
        // the running sum stable over long noise stretches.
        let mut window_energy: f64 = segment[..self.chirp_len]
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        for (i, &r) in raw.iter().enumerate() {
            if i > 0 {
                let enter = segment[i + self.chirp_len - 1] as f64;
                let leave = segment[i - 1] as f64;
                window_energy += enter * enter - leave * leave;
            }
            let denom = (window_energy.max(0.0) * self.template_energy).sqrt();
            let c = if denom > 1e-9 {
                (r.abs() as f64 / denom) as f32
            } else {
                0.0
            };
            self.corr.push_back(c);
        }
        Ok(())
    }

    fn correlate_direct(&self, segment: &[f32], count: usize) -> Vec<f32> {
        (0..count)
            .map(|i| {
                segment[i..i + self.chirp_len]
                    .iter()
                    .zip(self.template.iter())
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect()
    }
}
