use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use previewconfig::{parse_color, parse_duration, parse_size, Oscillator};

#[derive(Parser, Debug)]
#[command(
    name = "fraglive",
    author,
    version,
    about = "Live GLSL fragment shader preview"
)]
pub struct Cli {
    /// Fragment shader to compile and watch (defaults to `default.frag`).
    #[arg(value_name = "SHADER")]
    pub shader: Option<PathBuf>,

    /// Directory whose changes trigger a recompile (defaults to the shader's directory).
    #[arg(long, value_name = "DIR")]
    pub watch_dir: Option<PathBuf>,

    /// Image bound to the next texture unit; repeat for `tex0`, `tex1`, ...
    #[arg(long = "texture", value_name = "PATH")]
    pub textures: Vec<PathBuf>,

    /// Oscillator frequency in Hz driving the `phase` uniform.
    #[arg(long, value_name = "HZ", overrides_with_all = ["freq", "bpm"])]
    pub freq: Option<f32>,

    /// Oscillator tempo in beats per minute; converted to `bpm / 60` Hz.
    #[arg(long, value_name = "BPM", overrides_with_all = ["freq", "bpm"])]
    pub bpm: Option<f32>,

    /// How long the watcher waits before re-checking for shutdown (e.g. `5s`, `250ms`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub watch_timeout: Option<Duration>,

    /// Initial window size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Optional TOML file with preview settings; flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Background colour cleared before each draw.
    #[arg(long, value_name = "R,G,B", value_parser = parse_color)]
    pub clear_color: Option<[f32; 3]>,
}

impl Cli {
    /// The oscillator requested on the command line, if any.
    ///
    /// `--freq` and `--bpm` override each other, so at most one survives
    /// parsing and it is the one given last.
    pub fn oscillator(&self) -> Option<Oscillator> {
        self.freq
            .map(Oscillator::Frequency)
            .or(self.bpm.map(Oscillator::Bpm))
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
