use clap::Parser;
use opnatrack::chip::ChipBackend;
use opnatrack::s98::{S98Recorder, S98WriterHandle};
use opnatrack::vgm::{Gd3Metadata, VgmRecorder, VgmWriterHandle};
use opnatrack::{Config, OpnaController, PlaybackManager, Project};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Writer kept after the recorder moves into the controller
enum Output {
    Vgm(VgmWriterHandle),
    S98(S98WriterHandle),
}

#[derive(Parser, Debug)]
#[command(name = "opnatrack")]
#[command(version = "0.1.0")]
#[command(about = "Render a YM2608 tracker project to VGM or S98", long_about = None)]
struct Args {
    /// Project file (module and instruments as JSON)
    input: PathBuf,

    /// Output file; a .s98 extension selects S98, anything else VGM
    #[arg(short, long)]
    output: PathBuf,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Song number
    #[arg(long, default_value_t = 0)]
    song: usize,

    /// Order to start from
    #[arg(long, default_value_t = 0)]
    order: usize,

    /// Gzip the output (also implied by a .vgz extension)
    #[arg(long)]
    vgz: bool,

    /// Stop rendering after this many seconds
    #[arg(long, default_value_t = 600.0)]
    max_seconds: f64,

    /// Leave the tag out of S98 output
    #[arg(long)]
    no_tag: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), opnatrack::Error> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let project = Project::load(&args.input)?;
    let metadata = Gd3Metadata::from_module(&project.module, args.song);

    let has_extension =
        |ext: &str| args.output.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext));
    let (chip, output): (Box<dyn ChipBackend>, Output) = if has_extension("s98") {
        let recorder = S98Recorder::new(config.chip.clock, config.chip.rate);
        let writer = recorder.writer();
        (Box::new(recorder), Output::S98(writer))
    } else {
        let recorder = VgmRecorder::new(config.chip.clock, config.chip.rate);
        let writer = recorder.writer();
        (Box::new(recorder), Output::Vgm(writer))
    };
    let mut opna = OpnaController::new(chip, config.chip.rate);
    opna.set_master_volume(config.playback.master_volume);
    opna.set_master_volume_fm(config.chip.fm_volume_db);
    opna.set_master_volume_ssg(config.chip.ssg_volume_db);

    let mut playback = PlaybackManager::new(
        opna,
        Arc::new(RwLock::new(project.module)),
        Arc::new(RwLock::new(project.instruments)),
    );
    playback.set_song(args.song)?;
    playback.set_channel_retrieving(config.playback.retrieve_channel_state);
    // A looping song would never end
    playback.set_song_looping(false);
    playback.start_play_song(args.order)?;

    let max_frames = (args.max_seconds.max(0.0) * f64::from(config.chip.rate)) as u64;
    let frames = playback.render(max_frames);
    if playback.is_play_song() {
        warn!(seconds = args.max_seconds, "time limit reached, stopping");
        playback.stop_play_song();
    }

    match output {
        Output::Vgm(writer) => {
            let compress = args.vgz || has_extension("vgz");
            writer.lock().save(&args.output, &metadata, compress)?;
            info!(frames, output = %args.output.display(), "VGM written");
        }
        Output::S98(writer) => {
            let tag = (!args.no_tag).then_some(&metadata);
            writer.lock().save(&args.output, tag)?;
            info!(frames, output = %args.output.display(), "S98 written");
        }
    }

    Ok(())
}
