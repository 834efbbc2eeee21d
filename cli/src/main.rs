use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec};
use sonictag::{ModemConfig, Receiver, Transmitter};
use std::fs::File;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sonictag")]
#[command(about = "Ultrasonic modem loopback tooling: byte payloads <-> WAV frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sample rate in Hz (must match on both endpoints)
    #[arg(long, default_value = "48000")]
    sample_rate: usize,

    /// Reed-Solomon parity bytes per frame
    #[arg(long, default_value = "16")]
    rs_nsym: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a binary file into a WAV audio frame
    Encode {
        /// Input binary file
        #[arg(value_name = "INPUT.BIN")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,
    },

    /// Decode payloads out of a WAV recording
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output binary file (frames are concatenated)
        #[arg(value_name = "OUTPUT.BIN")]
        output: PathBuf,
    },

    /// Encode then immediately decode a payload in memory
    Selftest {
        /// Payload text to loop back
        #[arg(long, default_value = "Hello, World!")]
        payload: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = ModemConfig {
        sample_rate: cli.sample_rate,
        rs_nsym: cli.rs_nsym,
        ..ModemConfig::default()
    };

    match cli.command {
        Commands::Encode { input, output } => encode_command(cfg, &input, &output),
        Commands::Decode { input, output } => decode_command(cfg, &input, &output),
        Commands::Selftest { payload } => selftest_command(cfg, payload.as_bytes()),
    }
}

fn encode_command(
    cfg: ModemConfig,
    input_path: &PathBuf,
    output_path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(input_path)?;
    println!("Read {} bytes from {}", data.len(), input_path.display());

    let mut tx = Transmitter::new(cfg.clone())?;
    let samples = tx.encode(&data)?;
    println!("Encoded to {} audio samples", samples.len());

    let spec = WavSpec {
        channels: 1,
        sample_rate: cfg.sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let file = File::create(output_path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for sample in samples {
        let clamped = sample.max(-1.0).min(1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;

    println!("Wrote {}", output_path.display());
    Ok(())
}

fn decode_command(
    cfg: ModemConfig,
    input_path: &PathBuf,
    output_path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(input_path)?;
    let mut reader = hound::WavReader::new(file)?;

    let spec = reader.spec();
    println!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );
    if spec.sample_rate as usize != cfg.sample_rate {
        return Err(format!(
            "WAV is {} Hz but the modem expects {} Hz; re-record, don't resample ultrasound",
            spec.sample_rate, cfg.sample_rate
        )
        .into());
    }

    let mut samples: Vec<f32> = match (spec.bits_per_sample, spec.sample_format) {
        (16, SampleFormat::Int) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (32, SampleFormat::Float) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (bits, format) => {
            return Err(format!("unsupported WAV format: {bits}-bit {format:?}").into());
        }
    };

    if spec.channels == 2 {
        println!("Folding stereo to mono...");
        samples = samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();
    } else if spec.channels != 1 {
        return Err(format!("unsupported channel count: {}", spec.channels).into());
    }

    let mut rx = Receiver::new(cfg)?;
    let payloads = rx.push(&samples);
    println!("Decoded {} frame(s)", payloads.len());

    let mut out = Vec::new();
    for payload in &payloads {
        out.extend_from_slice(payload);
    }
    std::fs::write(output_path, &out)?;
    println!("Wrote {} bytes to {}", out.len(), output_path.display());

    Ok(())
}

fn selftest_command(cfg: ModemConfig, payload: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    let sample_rate = cfg.sample_rate;
    let mut tx = Transmitter::new(cfg.clone())?;
    let mut rx = Receiver::new(cfg)?;

    let samples = tx.encode(payload)?;
    println!(
        "Encoded {} bytes into {} samples ({:.2} s)",
        payload.len(),
        samples.len(),
        samples.len() as f64 / sample_rate as f64
    );

    let decoded = rx.push(&samples);
    match decoded.first() {
        Some(back) if back == payload => {
            println!("Loopback OK");
            Ok(())
        }
        Some(back) => Err(format!(
            "loopback mismatch: sent {} bytes, got {} bytes",
            payload.len(),
            back.len()
        )
        .into()),
        None => Err("loopback produced no frames".into()),
    }
}
