//! GPU side of the preview.
//!
//! - `context` owns wgpu instance/device/surface wiring and reconfigures the
//!   swapchain when the window resizes.
//! - `reflect` reads uniform and sampler slots back from compiled naga modules.
//! - `textures` uploads the configured images as texture units.
//! - `device` implements the engine's `GraphicsDevice` on top of all three.

mod context;
mod device;
mod reflect;
mod textures;

pub use device::{RenderError, WgpuDevice};
