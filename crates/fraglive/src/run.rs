use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use previewconfig::{
    resolve_oscillator, PreviewFile, DEFAULT_CLEAR_COLOR, DEFAULT_SURFACE_SIZE,
};
use renderer::{PreviewConfig, Renderer};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

const DEFAULT_SHADER: &str = "default.frag";

pub fn run(cli: Cli) -> Result<()> {
    let file = match cli.config.as_deref() {
        Some(path) => {
            let file = PreviewFile::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::debug!(config = %path.display(), "loaded preview config");
            Some((path.to_path_buf(), file))
        }
        None => None,
    };
    let config = merge_config(&cli, file.as_ref().map(|(path, file)| (path.as_path(), file)))?;

    tracing::info!(
        shader = %config.fragment_path.display(),
        watch_dir = %config.watch_dir.display(),
        textures = config.textures.len(),
        frequency = config.frequency,
        "starting fraglive preview"
    );
    if !config.fragment_path.exists() {
        tracing::warn!(
            shader = %config.fragment_path.display(),
            "shader does not exist yet; showing the fallback until it is created"
        );
    }

    Renderer::new(config).run()
}

/// Builds the renderer configuration from the optional config file and the CLI.
///
/// Flags take precedence over the file. Relative paths in the file resolve
/// against the file's own directory.
fn merge_config(cli: &Cli, file: Option<(&Path, &PreviewFile)>) -> Result<PreviewConfig> {
    let base = file
        .and_then(|(path, _)| path.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let file = file.map(|(_, file)| file);
    let from_file = |path: &PathBuf| base.join(path);

    let fragment_path = cli
        .shader
        .clone()
        .or_else(|| file.and_then(|f| f.shader.as_ref()).map(from_file))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SHADER));

    let mut config = PreviewConfig::new(fragment_path);
    if let Some(dir) = cli
        .watch_dir
        .clone()
        .or_else(|| file.and_then(|f| f.watch_dir.as_ref()).map(from_file))
    {
        config.watch_dir = dir;
    }

    config.textures = if !cli.textures.is_empty() {
        cli.textures.clone()
    } else {
        file.map(|f| f.textures.iter().map(from_file).collect())
            .unwrap_or_default()
    };

    let oscillator = resolve_oscillator(
        file.and_then(PreviewFile::oscillator)
            .into_iter()
            .chain(cli.oscillator()),
    )
    .validate()
    .context("invalid oscillator setting")?;
    config.frequency = oscillator.hz();
    tracing::debug!(%oscillator, "resolved phase oscillator");

    if let Some(timeout) = cli.watch_timeout.or(file.and_then(|f| f.watch_timeout)) {
        config.watch_timeout = timeout;
    }
    config.surface_size = cli
        .size
        .or(file.and_then(|f| f.size))
        .unwrap_or(DEFAULT_SURFACE_SIZE);
    config.clear_color = cli
        .clear_color
        .or(file.and_then(|f| f.clear_color))
        .unwrap_or(DEFAULT_CLEAR_COLOR);

    Ok(config)
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["fraglive"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_without_file() {
        let config = merge_config(&cli(&[]), None).unwrap();
        assert_eq!(config.fragment_path, PathBuf::from("default.frag"));
        assert_eq!(config.watch_dir, PathBuf::from("."));
        assert_eq!(config.frequency, 1.0);
        assert_eq!(config.surface_size, (1280, 720));
        assert_eq!(config.clear_color, [0.2, 0.3, 0.3]);
        assert!(config.textures.is_empty());
    }

    #[test]
    fn watch_dir_follows_shader_directory() {
        let config = merge_config(&cli(&["shaders/wave.frag"]), None).unwrap();
        assert_eq!(config.watch_dir, PathBuf::from("shaders"));

        let config =
            merge_config(&cli(&["shaders/wave.frag", "--watch-dir", "assets"]), None).unwrap();
        assert_eq!(config.watch_dir, PathBuf::from("assets"));
    }

    #[test]
    fn bpm_converts_to_hz() {
        let config = merge_config(&cli(&["--bpm", "120"]), None).unwrap();
        assert_eq!(config.frequency, 2.0);
    }

    #[test]
    fn cli_rate_overrides_file_rate() {
        let file = PreviewFile::from_toml_str("frequency = 4.0").unwrap();
        let path = Path::new("preview.toml");

        let config = merge_config(&cli(&[]), Some((path, &file))).unwrap();
        assert_eq!(config.frequency, 4.0);

        let config = merge_config(&cli(&["--bpm", "30"]), Some((path, &file))).unwrap();
        assert_eq!(config.frequency, 0.5);
    }

    #[test]
    fn rejects_non_positive_rate() {
        let err = merge_config(&cli(&["--freq", "0"]), None).unwrap_err();
        assert!(format!("{err:#}").contains("frequency"));
    }

    #[test]
    fn file_paths_resolve_against_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.toml");
        std::fs::write(
            &path,
            r#"
shader = "wave.frag"
textures = ["noise.png"]
watch_timeout = "2s"
size = "800x600"
"#,
        )
        .unwrap();
        let file = PreviewFile::load(&path).unwrap();

        let config = merge_config(&cli(&[]), Some((&path, &file))).unwrap();
        assert_eq!(config.fragment_path, dir.path().join("wave.frag"));
        assert_eq!(config.watch_dir, dir.path().to_path_buf());
        assert_eq!(config.textures, vec![dir.path().join("noise.png")]);
        assert_eq!(config.watch_timeout, Duration::from_secs(2));
        assert_eq!(config.surface_size, (800, 600));

        let config = merge_config(
            &cli(&["other.frag", "--texture", "grid.png", "--size", "320x240"]),
            Some((&path, &file)),
        )
        .unwrap();
        assert_eq!(config.fragment_path, PathBuf::from("other.frag"));
        assert_eq!(config.textures, vec![PathBuf::from("grid.png")]);
        assert_eq!(config.surface_size, (320, 240));
    }
}
