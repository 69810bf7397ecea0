//! Frame coordinator: the engine context that owns all reload state.
//!
//! ```text
//!   watcher thread ──raise()──▶ ChangeSignal
//!                                   │ take() (once per frame)
//!                                   ▼
//!   Engine::frame ──▶ RecompilePipeline ──Success──▶ UniformRegistry::rebuild
//!        │                                               │ bind_textures, use_program
//!        └──────────── feed uniforms ◀───────────────────┘
//!                           │
//!                           ▼
//!                         draw
//! ```
//!
//! A failed attempt leaves program, registry and texture bindings untouched,
//! so the frame renders exactly like the previous one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::{GraphicsDevice, InfoLog};
use crate::program::{CreateError, ShaderProgram};
use crate::reload::{DiagnosticSink, RecompilePipeline, ReloadOutcome, ReloadStats, TracingSink};
use crate::signal::ChangeSignal;
use crate::source::ShaderSource;
use crate::uniforms::{FrameUniforms, UniformRegistry, UniformRole};
use crate::watcher::{ChangeSource, WatchError, WatchHandle, DEFAULT_WATCH_TIMEOUT};

/// Immutable parameters resolved before the engine starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fragment shader file that is loaded at startup and on every change.
    pub fragment_path: PathBuf,
    /// Directory whose modifications trigger a reload.
    pub watch_dir: PathBuf,
    /// Number of `texN` sampler roles.
    pub texture_units: u32,
    /// Bounded wait of the watcher between cancellation checks.
    pub watch_timeout: Duration,
    /// Vertex stage source, compiled once.
    pub vertex_source: String,
    /// Fragment source linked when the user's file fails at startup.
    pub fallback_fragment: String,
}

impl EngineConfig {
    pub fn new(
        fragment_path: impl Into<PathBuf>,
        vertex_source: impl Into<String>,
        fallback_fragment: impl Into<String>,
    ) -> Self {
        let fragment_path = fragment_path.into();
        let watch_dir = default_watch_dir(&fragment_path);
        Self {
            fragment_path,
            watch_dir,
            texture_units: 0,
            watch_timeout: DEFAULT_WATCH_TIMEOUT,
            vertex_source: vertex_source.into(),
            fallback_fragment: fallback_fragment.into(),
        }
    }
}

/// Parent directory of `fragment`, or `.` for a bare file name.
pub fn default_watch_dir(fragment: &Path) -> PathBuf {
    match fragment.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("graphics device error: {0}")]
    Device(#[source] E),
    #[error("vertex stage failed to compile:\n{0}")]
    VertexStage(InfoLog),
    #[error("fallback fragment failed to build: {0}")]
    Fallback(String),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl<E> From<CreateError<E>> for EngineError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(value: CreateError<E>) -> Self {
        match value {
            CreateError::Device(err) => EngineError::Device(err),
            CreateError::VertexCompile(log) => EngineError::VertexStage(log),
        }
    }
}

/// What happened during one [`Engine::frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    /// A pending change was consumed and a reload attempted.
    pub reload_attempted: bool,
    /// The attempt relinked the program.
    pub reloaded: bool,
}

/// Engine context owning program, uniform registry, pipeline and watch session.
pub struct Engine<D: GraphicsDevice> {
    device: D,
    program: ShaderProgram,
    registry: UniformRegistry,
    pipeline: RecompilePipeline,
    signal: Arc<ChangeSignal>,
    fragment_path: PathBuf,
    watch_dir: PathBuf,
    watch_timeout: Duration,
    watch: Option<WatchHandle>,
    using_fallback: bool,
}

impl<D: GraphicsDevice> std::fmt::Debug for Engine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("program", &self.program)
            .field("fragment_path", &self.fragment_path)
            .field("using_fallback", &self.using_fallback)
            .finish_non_exhaustive()
    }
}

impl<D: GraphicsDevice> Engine<D> {
    /// Builds the program and links the user's fragment, logging diagnostics.
    pub fn new(device: D, config: &EngineConfig) -> Result<Self, EngineError<D::Error>> {
        Self::with_sink(device, config, Box::new(TracingSink))
    }

    /// Like [`Engine::new`] with a custom diagnostic sink.
    ///
    /// If the user's fragment cannot be read, compiled or linked, the fallback
    /// fragment is linked instead so the surface still renders; its failure
    /// is fatal.
    pub fn with_sink(
        mut device: D,
        config: &EngineConfig,
        sink: Box<dyn DiagnosticSink>,
    ) -> Result<Self, EngineError<D::Error>> {
        let mut program = ShaderProgram::create(&mut device, &config.vertex_source)?;
        let mut pipeline = RecompilePipeline::new(sink);

        let outcome = pipeline.reload_from_file(&mut device, &mut program, &config.fragment_path);
        let using_fallback = !outcome.is_success();
        if using_fallback {
            warn!(
                path = %config.fragment_path.display(),
                "shader failed at startup; rendering fallback until it is fixed"
            );
            let fallback = ShaderSource::from_text("<fallback>", config.fallback_fragment.as_str());
            match crate::reload::recompile(&mut device, &mut program, fallback) {
                ReloadOutcome::Success => {}
                ReloadOutcome::CompileFailure(log) | ReloadOutcome::LinkFailure(log) => {
                    return Err(EngineError::Fallback(log.to_string()));
                }
                ReloadOutcome::ReadFailure(err) => {
                    return Err(EngineError::Fallback(err.to_string()));
                }
            }
        }

        let mut registry = UniformRegistry::new(UniformRole::all(config.texture_units));
        registry.rebuild(&device, program.id());
        device.use_program(program.id());
        registry.bind_textures(&mut device);

        info!(
            path = %config.fragment_path.display(),
            uniforms = registry.present_count(),
            fallback = using_fallback,
            "shader program ready"
        );

        Ok(Self {
            device,
            program,
            registry,
            pipeline,
            signal: Arc::new(ChangeSignal::new()),
            fragment_path: config.fragment_path.clone(),
            watch_dir: config.watch_dir.clone(),
            watch_timeout: config.watch_timeout,
            watch: None,
            using_fallback,
        })
    }

    /// Starts the `notify` watcher on the configured directory.
    pub fn start_watching(&mut self) -> Result<(), WatchError> {
        let handle = WatchHandle::watch_directory(
            &self.watch_dir,
            Arc::clone(&self.signal),
            self.watch_timeout,
        )?;
        self.replace_watch(handle)
    }

    /// Starts the watcher thread over a custom change source.
    pub fn start_watching_with<S>(&mut self, source: S) -> Result<(), WatchError>
    where
        S: ChangeSource + 'static,
    {
        let handle = WatchHandle::spawn(source, Arc::clone(&self.signal), self.watch_timeout)?;
        self.replace_watch(handle)
    }

    fn replace_watch(&mut self, handle: WatchHandle) -> Result<(), WatchError> {
        match self.watch.replace(handle) {
            Some(previous) => previous.shutdown(),
            None => Ok(()),
        }
    }

    /// Runs one render iteration.
    ///
    /// Consumes the change signal at most once, reloads if it was set, feeds
    /// `values` to every present uniform and draws.
    pub fn frame(&mut self, values: &FrameUniforms) -> Result<FrameReport, D::Error> {
        let mut report = FrameReport::default();

        if self.signal.take() {
            report.reload_attempted = true;
            report.reloaded = self.reload();
        }

        self.registry.feed(&mut self.device, values);
        self.device.draw()?;
        Ok(report)
    }

    fn reload(&mut self) -> bool {
        let outcome = self.pipeline.reload_from_file(
            &mut self.device,
            &mut self.program,
            &self.fragment_path,
        );
        if !outcome.is_success() {
            return false;
        }

        let mapping = self.registry.rebuild(&self.device, self.program.id());
        self.registry.bind_textures(&mut self.device);
        self.device.use_program(self.program.id());
        self.using_fallback = false;
        debug!(?mapping, "uniform locations after relink");
        info!(path = %self.fragment_path.display(), "shader reloaded");
        true
    }

    /// Returns an error that ended the watcher thread, if one was reported.
    pub fn poll_fatal(&self) -> Option<WatchError> {
        self.watch.as_ref().and_then(WatchHandle::poll_fatal)
    }

    /// Cancels and joins the watcher thread.
    pub fn shutdown(mut self) -> Result<D, WatchError> {
        if let Some(watch) = self.watch.take() {
            watch.shutdown()?;
        }
        Ok(self.device)
    }

    pub fn signal(&self) -> &Arc<ChangeSignal> {
        &self.signal
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn registry(&self) -> &UniformRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ReloadStats {
        self.pipeline.stats()
    }

    pub fn fragment_path(&self) -> &Path {
        &self.fragment_path
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// True while the built-in fallback fragment is what renders.
    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }
}
