//! Hot-reload core for the live fragment-shader preview.
//!
//! A watcher thread raises a [`ChangeSignal`] whenever the shader directory is
//! modified. The render loop consumes the signal once per frame through
//! [`Engine::frame`], recompiles and relinks the live program in place and, on
//! success only, re-resolves uniform locations. Failed attempts keep the last
//! good executable rendering and produce one diagnostic per failure streak.
//!
//! The graphics API is abstracted behind [`GraphicsDevice`], a program model
//! of separately compiled stages linked into one program object.

mod device;
mod engine;
mod program;
mod reload;
mod signal;
mod source;
mod uniforms;
mod watcher;

#[cfg(test)]
mod fake;

pub use device::{
    GraphicsDevice, InfoLog, ProgramId, StageId, StageKind, UniformLocation, UniformValue,
};
pub use engine::{default_watch_dir, Engine, EngineConfig, EngineError, FrameReport};
pub use program::{
    CreateError, LinkStatus, ShaderProgram, POSITION_ATTRIBUTE_INDEX, POSITION_ATTRIBUTE_NAME,
};
pub use reload::{
    attempt_reload, recompile, Diagnostic, DiagnosticKind, DiagnosticSink, DumpGate,
    RecompilePipeline, ReloadOutcome, ReloadStats, TracingSink,
};
pub use signal::ChangeSignal;
pub use source::ShaderSource;
pub use uniforms::{FrameUniforms, UniformRegistry, UniformRole};
pub use watcher::{
    ChangeSource, NotifySource, WaitOutcome, WatchError, WatchHandle, WatchState,
    DEFAULT_WATCH_TIMEOUT,
};
