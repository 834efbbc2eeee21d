//! FFT-accelerated cross-correlation for real-valued sample buffers.
//!
//! The chirp detector falls back to this path when a newly appended buffer
//! region is long enough that direct time-domain correlation would dominate
//! the receive cost. Uses a thread-local real-FFT planner so repeated calls
//! reuse their plans.

use std::cell::RefCell;

use realfft::RealFftPlanner;

use crate::error::{Result, SonicTagError};

thread_local! {
    static PLANNER: RefCell<RealFftPlanner<f32>> = RefCell::new(RealFftPlanner::new());
}

/// Cross-correlate `signal` against `template` at fully-overlapped offsets.
///
/// Output entry `i` is the dot product of `template` with
/// `signal[i..i + template.len()]`; the result has
/// `signal.len() - template.len() + 1` entries and is empty when the
/// signal is shorter than the template.
pub fn correlate_valid(signal: &[f32], template: &[f32]) -> Result<Vec<f32>> {
    if template.is_empty() || signal.len() < template.len() {
        return Ok(Vec::new());
    }

    let full_len = signal.len() + template.len() - 1;
    let fft_size = full_len.next_power_of_two();

    let mut padded_signal = vec![0.0f32; fft_size];
    padded_signal[..signal.len()].copy_from_slice(signal);

    // Correlation is convolution with the reversed template.
    let mut padded_template = vec![0.0f32; fft_size];
    for (slot, &value) in padded_template.iter_mut().zip(template.iter().rev()) {
        *slot = value;
    }

    let (r2c, c2r) = PLANNER.with(|planner| {
        let mut planner = planner.borrow_mut();
        (
            planner.plan_fft_forward(fft_size),
            planner.plan_fft_inverse(fft_size),
        )
    });

    let mut signal_spectrum = r2c.make_output_vec();
    let mut template_spectrum = r2c.make_output_vec();
    r2c.process(&mut padded_signal, &mut signal_spectrum)
        .map_err(|e| SonicTagError::Fft(format!("forward transform: {e:?}")))?;
    r2c.process(&mut padded_template, &mut template_spectrum)
        .map_err(|e| SonicTagError::Fft(format!("forward transform: {e:?}")))?;

    for (s, t) in signal_spectrum.iter_mut().zip(template_spectrum.iter()) {
        *s *= t;
    }

    let mut full = vec![0.0f32; fft_size];
    c2r.process(&mut signal_spectrum, &mut full)
        .map_err(|e| SonicTagError::Fft(format!("inverse transform: {e:?}")))?;

    let scale = 1.0 / fft_size as f32;
    let start = template.len() - 1;
    let valid_len = signal.len() - template.len() + 1;
    Ok(full[start..start + valid_len]
        .iter()
        .map(|v| v * scale)
        .collect())
}
