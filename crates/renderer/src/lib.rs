//! Renderer crate for fraglive, the live fragment-shader preview.
//!
//! The crate glues the preview window, the `wgpu` backend of the hot-reload
//! engine, and the GLSL dialect handling together. The overall flow is:
//!
//! ```text
//!   CLI / config file
//!          │ PreviewConfig
//!          ▼
//!   Renderer::run ──▶ PreviewState ──▶ winit event loop ──▶ Engine::frame()
//!                          │                                    │
//!                          └─ WgpuDevice (GraphicsDevice) ◀─────┘
//! ```
//!
//! `PreviewState` owns the engine, which owns the device and every GPU
//! resource; the watcher thread only ever touches the engine's change signal.
//! User shaders are written in desktop GL style and normalised to Vulkan GLSL
//! before naga compiles them.

mod compile;
mod gpu;
mod runtime;
mod types;
mod window;

use anyhow::Result;

pub use compile::{FALLBACK_FRAGMENT_GLSL, VERTEX_SHADER_GLSL};
pub use gpu::{RenderError, WgpuDevice};
pub use runtime::{oscillator_phase, FrameClock, TimeSample};
pub use types::PreviewConfig;

pub struct Renderer {
    config: PreviewConfig,
}

impl Renderer {
    /// Builds a renderer for the supplied configuration.
    pub fn new(config: PreviewConfig) -> Self {
        Self { config }
    }

    /// Opens the preview window and blocks until it closes.
    ///
    /// Returns an error if the window or GPU cannot be initialised, if the
    /// vertex or fallback shader fails to build, or if the watcher fails.
    pub fn run(&mut self) -> Result<()> {
        window::run(&self.config)
    }
}
