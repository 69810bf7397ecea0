//! The graphics-platform seam consumed by the engine.
//!
//! The engine speaks a small "program object" model: stages are compiled from
//! source, a program joins a vertex and a fragment stage, linking finalises
//! attribute and uniform locations, and uniform writes go to the program that
//! is currently in use. [`GraphicsDevice`] is implemented by the `wgpu`
//! backend in the `renderer` crate and by a scripted fake in tests.

use std::fmt;

/// Which pipeline stage a stage object compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Vertex => f.write_str("vertex"),
            StageKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Identity of a stage object owned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u32);

/// Identity of a program object owned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Opaque uniform location, valid only for the link that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformLocation(pub u32);

/// Value written into a uniform location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    /// Texture unit index for a sampler uniform.
    Sampler(u32),
}

/// Compiler or linker output explaining a failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoLog(String);

impl InfoLog {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for InfoLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.trim_end())
    }
}

impl From<String> for InfoLog {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InfoLog {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Compile/link/draw primitives of the underlying graphics platform.
///
/// All methods are called from the render thread only.
pub trait GraphicsDevice {
    /// Errors that are not shader diagnostics (lost surface, unknown ids).
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_stage(&mut self, kind: StageKind) -> Result<StageId, Self::Error>;

    /// Replaces the source of an existing stage object and compiles it.
    fn compile_stage(&mut self, stage: StageId, source: &str) -> Result<(), InfoLog>;

    /// Creates a program with both stages attached. Attachments never change.
    fn create_program(
        &mut self,
        vertex: StageId,
        fragment: StageId,
    ) -> Result<ProgramId, Self::Error>;

    /// Binds a vertex attribute name to an index; takes effect at the next link.
    fn bind_attribute(&mut self, program: ProgramId, index: u32, name: &str);

    /// Relinks the program from the currently compiled stages.
    ///
    /// On failure the previously linked executable must stay intact and
    /// keep rendering if the program is in use.
    fn link_program(&mut self, program: ProgramId) -> Result<(), InfoLog>;

    /// Looks up an active uniform of the last successful link.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn use_program(&mut self, program: ProgramId);

    /// Writes a value into the program currently in use.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    /// Draws the full-screen quad with the program currently in use.
    fn draw(&mut self) -> Result<(), Self::Error>;
}
