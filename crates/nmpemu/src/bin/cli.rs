use clap::Parser;
use nmp_hw::specs::audio::SPEAKER_RATE;
use nmp_hw::specs::timing::TICKS_PER_SECOND;
use nmpemu::mmio::nmp::navigation::EntryKind;
use nmpemu::{Args, AudioEvent, Channel, CliCommand, EmulatorCore, GuestDriver};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

type Writer = hound::WavWriter<BufWriter<File>>;

/// Collects what the console would hear into a WAV file
struct WavSink<'p> {
    path: &'p Path,
    writer: Option<Writer>,
    pending_left: Option<Vec<i8>>,
    error: Option<hound::Error>,
}

impl<'p> WavSink<'p> {
    fn new(path: &'p Path) -> Self {
        Self {
            path,
            writer: None,
            pending_left: None,
            error: None,
        }
    }

    fn writer(&mut self, spec: hound::WavSpec) -> Result<&mut Writer, hound::Error> {
        if self.writer.is_none() {
            info!("Writing {:?} ({} Hz, {} ch, {}-bit)", self.path, spec.sample_rate, spec.channels, spec.bits_per_sample);
            self.writer = Some(hound::WavWriter::create(self.path, spec)?);
        }
        // Just created above
        self.writer
            .as_mut()
            .ok_or(hound::Error::FormatError("writer not open"))
    }

    fn handle(&mut self, event: &AudioEvent) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.write(event) {
            self.error = Some(e);
        }
    }

    fn write(&mut self, event: &AudioEvent) -> Result<(), hound::Error> {
        match event {
            AudioEvent::Chunk {
                channel: Channel::Left,
                samples,
            } => {
                self.pending_left = Some(samples.clone());
            }
            AudioEvent::Chunk {
                channel: Channel::Right,
                samples,
            } => {
                let Some(left) = self.pending_left.take() else {
                    return Ok(());
                };
                let writer = self.writer(hound::WavSpec {
                    channels: 2,
                    sample_rate: SPEAKER_RATE,
                    bits_per_sample: 8,
                    sample_format: hound::SampleFormat::Int,
                })?;
                for (&l, &r) in left.iter().zip(samples) {
                    writer.write_sample(l)?;
                    writer.write_sample(r)?;
                }
            }
            AudioEvent::Pcm {
                frequency,
                channels,
                samples,
            } => {
                let writer = self.writer(hound::WavSpec {
                    channels: *channels,
                    sample_rate: *frequency,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                })?;
                for &sample in samples {
                    writer.write_sample(sample)?;
                }
            }
            AudioEvent::Progress { .. } => {
                self.pending_left = None;
            }
            AudioEvent::Finished => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<(), hound::Error> {
        if let Some(e) = self.error {
            return Err(e);
        }
        match self.writer {
            Some(writer) => writer.finalize(),
            None => {
                warn!("No audio was produced, {:?} not written", self.path);
                Ok(())
            }
        }
    }
}

fn run_play(
    driver: &mut GuestDriver<'_>,
    file: &str,
    seconds: u64,
    volume: Option<u8>,
    wav_out: Option<&Path>,
) -> Result<(), hound::Error> {
    if let Some(volume) = volume {
        driver.set_volume(volume);
    }

    let reply = driver.play(file);
    info!("PLAY_MUSIC status: {:#06X}", reply.status);

    let mut sink = wav_out.map(WavSink::new);
    let ticks = driver.pump_audio(seconds * TICKS_PER_SECOND as u64, |event| {
        match &event {
            AudioEvent::Progress {
                percent,
                elapsed_secs,
            } => println!("{:>3}:{:02} {:>3}%", elapsed_secs / 60, elapsed_secs % 60, percent),
            AudioEvent::Finished => println!("finished"),
            _ => {}
        }
        if let Some(sink) = sink.as_mut() {
            sink.handle(&event);
        }
    });
    info!("Played {} ticks", ticks);

    driver.stop();
    match sink {
        Some(sink) => sink.finish(),
        None => Ok(()),
    }
}

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Create emulator config from args
    let config = args.to_emulator_config();

    // Create emulator
    info!("=== Creating Emulator ===");
    let mut emulator = match EmulatorCore::new(config) {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("Failed to create emulator: {}", e);
            std::process::exit(2);
        }
    };

    let mut driver = GuestDriver::new(&mut emulator);
    match driver.boot() {
        Ok(words) => info!("Boot handshake: {:04X?}", words),
        Err(e) => {
            eprintln!("Boot failed: {}", e);
            std::process::exit(1);
        }
    }

    let exit_code = match &args.command {
        CliCommand::Ls { dir } => {
            driver.enter_path(dir.as_deref().unwrap_or(""));
            for (name, kind) in driver.list_dir() {
                match kind {
                    EntryKind::Folder => println!("{}/", name),
                    EntryKind::File => println!("{}", name),
                }
            }
            0
        }
        CliCommand::Tags { dir, file } => {
            driver.enter_path(dir);
            let tags = driver.tags(file);
            println!("Title:  {}", tags.title);
            println!("Artist: {}", tags.artist);
            0
        }
        CliCommand::Play {
            dir,
            file,
            seconds,
            volume,
            wav_out,
        } => {
            driver.enter_path(dir);
            match run_play(&mut driver, file, *seconds, *volume, wav_out.as_deref()) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Failed to write WAV: {}", e);
                    1
                }
            }
        }
    };

    // Log final state
    info!("=== Emulation Complete ===");
    emulator.print_final_state();

    std::process::exit(exit_code);
}
