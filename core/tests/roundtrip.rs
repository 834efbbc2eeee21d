//! End-to-end loopback behavior over a clean channel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use sonictag::{ModemConfig, Receiver, Transmitter};

fn loopback() -> (Transmitter, Receiver) {
    let cfg = ModemConfig::default();
    (
        Transmitter::new(cfg.clone()).unwrap(),
        Receiver::new(cfg).unwrap(),
    )
}

#[test]
fn short_payload_sample_count_and_roundtrip() {
    let (mut tx, mut rx) = loopback();
    let frame = tx.encode(b"Hi").unwrap();

    // chirp + guard + (1 header + 4 data symbols) at the defaults.
    assert_eq!(frame.len(), 2400 + 480 + 1280 * 5);
    assert!(frame.iter().all(|s| s.abs() <= 1.0));

    assert_eq!(rx.push(&frame), vec![b"Hi".to_vec()]);
}

#[test]
fn all_zero_max_payload() {
    let (mut tx, mut rx) = loopback();
    let payload = vec![0u8; 233];
    let frame = tx.encode(&payload).unwrap();
    assert_eq!(rx.push(&frame), vec![payload]);
}

#[test]
fn assorted_payload_lengths() {
    let (mut tx, mut rx) = loopback();
    let mut rng = StdRng::seed_from_u64(7);
    for len in [1usize, 2, 7, 32, 100, 199, 233] {
        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let frame = tx.encode(&payload).unwrap();
        let decoded = rx.push(&frame);
        assert_eq!(decoded, vec![payload], "length {len}");
    }
}

#[test]
fn two_frames_with_gap_decode_in_order() {
    let (mut tx, mut rx) = loopback();
    let mut stream = tx.encode(b"first frame").unwrap();
    stream.extend(vec![0.0f32; 2000]);
    stream.extend(tx.encode(b"second frame").unwrap());

    let decoded = rx.push(&stream);
    assert_eq!(
        decoded,
        vec![b"first frame".to_vec(), b"second frame".to_vec()]
    );
}

#[test]
fn silence_padding_yields_exactly_one_copy() {
    let (mut tx, mut rx) = loopback();
    let frame = tx.encode(b"Hello, World!").unwrap();

    let mut stream = vec![0.0f32; 4800];
    stream.extend_from_slice(&frame);
    stream.extend(vec![0.0f32; 4800]);

    assert_eq!(rx.push(&stream), vec![b"Hello, World!".to_vec()]);
    assert!(rx.push(&vec![0.0f32; 9600]).is_empty());
}

fn run_chunked(stream: &[f32], chunks: impl Iterator<Item = usize>) -> Vec<Vec<u8>> {
    let mut rx = Receiver::new(ModemConfig::default()).unwrap();
    let mut out = Vec::new();
    let mut pos = 0;
    for size in chunks {
        if pos >= stream.len() {
            break;
        }
        let end = (pos + size).min(stream.len());
        out.extend(rx.push(&stream[pos..end]));
        pos = end;
    }
    if pos < stream.len() {
        out.extend(rx.push(&stream[pos..]));
    }
    out
}

#[test]
fn streaming_equivalence_across_chunk_sizes() {
    let mut tx = Transmitter::new(ModemConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let mut stream: Vec<f32> = (0..500).map(|_| rng.gen_range(-0.05..0.05)).collect();
    stream.extend(tx.encode(b"ab").unwrap());
    stream.extend(vec![0.0f32; 2000]);
    stream.extend(tx.encode(b"cd").unwrap());
    stream.extend(vec![0.0f32; 2400]);

    let reference = run_chunked(&stream, std::iter::once(stream.len()));
    assert_eq!(reference, vec![b"ab".to_vec(), b"cd".to_vec()]);

    for &size in &[1usize, 37, 1024] {
        let got = run_chunked(&stream, std::iter::repeat(size));
        assert_eq!(got, reference, "chunk size {size}");
    }

    let mut rng = StdRng::seed_from_u64(1234);
    let random_sizes: Vec<usize> = (0..stream.len()).map(|_| rng.gen_range(1..=2048)).collect();
    let got = run_chunked(&stream, random_sizes.into_iter());
    assert_eq!(got, reference, "random chunks");
}

#[test]
fn spectrum_confined_to_band() {
    let cfg = ModemConfig::default();
    let mut tx = Transmitter::new(cfg.clone()).unwrap();
    let frame = tx.encode(b"band confinement probe").unwrap();

    let n = cfg.fft_size;
    let body = &frame[cfg.chirp_len() + cfg.guard_len()..];
    let num_symbols = body.len() / cfg.symbol_len();
    assert!(num_symbols >= 2);

    // Average the magnitude spectrum over the post-CP symbol cores.
    let fft = FftPlanner::new().plan_fft_forward(n);
    let mut avg = vec![0.0f64; n / 2];
    for s in 0..num_symbols {
        let core = &body[s * cfg.symbol_len() + cfg.cp_len..(s + 1) * cfg.symbol_len()];
        let mut buf: Vec<Complex<f32>> = core.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut buf);
        for (slot, value) in avg.iter_mut().zip(buf.iter()) {
            *slot += value.norm() as f64 / num_symbols as f64;
        }
    }

    let bin_hz = cfg.sample_rate as f64 / n as f64;
    let peak = avg.iter().cloned().fold(0.0f64, f64::max);
    let floor = peak * 10f64.powf(-40.0 / 20.0);
    for (k, &mag) in avg.iter().enumerate().skip(1) {
        let freq = k as f64 * bin_hz;
        if freq < (cfg.band_low as f64 - 500.0) || freq > (cfg.band_high as f64 + 500.0) {
            assert!(
                mag <= floor,
                "bin {k} at {freq:.0} Hz: {mag:.3e} above -40 dB floor {floor:.3e}"
            );
        }
    }
}
