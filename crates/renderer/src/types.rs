use std::path::PathBuf;
use std::time::Duration;

/// Immutable configuration passed to the renderer at start-up.
///
/// `PreviewConfig` is the merged result of the config file and CLI flags and
/// tells the renderer which shader to watch, which images to bind as texture
/// units and how fast the `phase` oscillator runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Fragment shader that is compiled at startup and on every change.
    pub fragment_path: PathBuf,
    /// Directory whose modifications trigger a reload.
    pub watch_dir: PathBuf,
    /// Images bound to texture units 0..N, exposed as `tex0..texN-1`.
    pub textures: Vec<PathBuf>,
    /// Oscillator frequency in Hz.
    pub frequency: f32,
    /// Bounded wait of the watcher between cancellation checks.
    pub watch_timeout: Duration,
    /// Initial window size in physical pixels.
    pub surface_size: (u32, u32),
    /// Colour the surface is cleared to before each draw.
    pub clear_color: [f32; 3],
}

impl PreviewConfig {
    pub fn new(fragment_path: impl Into<PathBuf>) -> Self {
        let fragment_path = fragment_path.into();
        Self {
            watch_dir: hotreload::default_watch_dir(&fragment_path),
            fragment_path,
            textures: Vec::new(),
            frequency: 1.0,
            watch_timeout: hotreload::DEFAULT_WATCH_TIMEOUT,
            surface_size: (1280, 720),
            clear_color: [0.2, 0.3, 0.3],
        }
    }
}
