use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use hotreload::{Engine, EngineConfig};
use tracing::{debug, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::compile::{FALLBACK_FRAGMENT_GLSL, VERTEX_SHADER_GLSL};
use crate::gpu::{RenderError, WgpuDevice};
use crate::runtime::FrameClock;
use crate::types::PreviewConfig;

const WINDOW_TITLE: &str = "fraglive";

/// Everything the event loop mutates between frames.
///
/// `engine` is declared before `window` so the surface is dropped first.
struct PreviewState {
    engine: Option<Engine<WgpuDevice>>,
    clock: FrameClock,
    frequency: f32,
    window: Arc<Window>,
}

impl PreviewState {
    fn new(window: Arc<Window>, config: &PreviewConfig) -> Result<Self> {
        let device = WgpuDevice::new(
            window.as_ref(),
            window.inner_size(),
            &config.textures,
            config.clear_color,
        )?;

        let mut engine_config = EngineConfig::new(
            &config.fragment_path,
            VERTEX_SHADER_GLSL,
            FALLBACK_FRAGMENT_GLSL,
        );
        engine_config.watch_dir = config.watch_dir.clone();
        engine_config.texture_units = device.texture_units();
        engine_config.watch_timeout = config.watch_timeout;

        let mut engine =
            Engine::new(device, &engine_config).context("failed to initialise shader engine")?;
        engine.start_watching().with_context(|| {
            format!("failed to watch {}", engine_config.watch_dir.display())
        })?;
        info!(
            shader = %config.fragment_path.display(),
            dir = %engine_config.watch_dir.display(),
            "watching for shader changes"
        );

        Ok(Self {
            engine: Some(engine),
            clock: FrameClock::new(),
            frequency: config.frequency,
            window,
        })
    }

    fn render(&mut self) -> Result<(), RenderError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let size = engine.device().size();
        let sample = self.clock.sample();
        let uniforms = sample.uniforms((size.width, size.height), self.frequency);
        let report = engine.frame(&uniforms)?;
        if report.reload_attempted {
            tracing::debug!(
                frame = sample.frame_index,
                reloaded = report.reloaded,
                "processed shader change"
            );
        }
        Ok(())
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(engine) = self.engine.as_mut() {
            engine.device_mut().resize(size);
        }
    }

    fn size(&self) -> PhysicalSize<u32> {
        self.engine
            .as_ref()
            .map(|engine| engine.device().size())
            .unwrap_or_else(|| self.window.inner_size())
    }

    /// Reports a fatal watcher error, if the watcher thread has died.
    fn poll_fatal(&self) -> Option<anyhow::Error> {
        let engine = self.engine.as_ref()?;
        engine
            .poll_fatal()
            .map(|err| anyhow::Error::new(err).context("shader watcher failed"))
    }

    /// Cancels and joins the watcher; idempotent.
    fn shutdown(&mut self) -> Result<()> {
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };
        engine
            .shutdown()
            .map(drop)
            .context("shader watcher failed during shutdown")
    }
}

/// Opens the preview window and drives the `winit` event loop until the
/// window closes, Escape is pressed or the watcher fails.
pub(crate) fn run(config: &PreviewConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to initialize event loop")?;
    let window_size = PhysicalSize::new(config.surface_size.0, config.surface_size.1);
    let window = WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(window_size)
        .build(&event_loop)
        .context("failed to create preview window")?;
    let window = Arc::new(window);

    let mut state = PreviewState::new(window, config)?;
    state.window.request_redraw();

    let failure = Rc::new(RefCell::new(FirstFailure::default()));
    let loop_failure = Rc::clone(&failure);
    let fail = move |err: anyhow::Error| loop_failure.borrow_mut().record(err);

    event_loop
        .run(move |event, elwt| {
            // Drive redraws via vblank by waiting between events.
            elwt.set_control_flow(ControlFlow::Wait);

            match event {
                Event::WindowEvent { window_id, event } if window_id == state.window.id() => {
                    match event {
                        WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                            elwt.exit();
                        }
                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    logical_key: Key::Named(NamedKey::Escape),
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        } => {
                            info!("escape pressed; closing preview");
                            elwt.exit();
                        }
                        WindowEvent::Resized(new_size) => {
                            state.resize(new_size);
                        }
                        WindowEvent::RedrawRequested => match state.render() {
                            Ok(()) => {}
                            Err(RenderError::Surface(
                                wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated,
                            )) => {
                                state.resize(state.size());
                            }
                            Err(RenderError::Surface(wgpu::SurfaceError::Timeout)) => {
                                warn!("surface timeout; retrying next frame");
                            }
                            Err(other) => {
                                fail(anyhow::Error::new(other).context("failed to render frame"));
                                elwt.exit();
                            }
                        },
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    if let Some(err) = state.poll_fatal() {
                        fail(err);
                        elwt.exit();
                    } else {
                        state.window.request_redraw();
                    }
                }
                Event::LoopExiting => {
                    if let Err(err) = state.shutdown() {
                        fail(err);
                    }
                    info!("preview closed");
                }
                _ => {}
            }
        })
        .map_err(|err| anyhow!("event loop error: {err}"))?;

    let failure = failure.take();
    failure.into_result()
}

/// Keeps the first error that ends the event loop; the caller reports it.
#[derive(Debug, Default)]
struct FirstFailure(Option<anyhow::Error>);

impl FirstFailure {
    fn record(&mut self, err: anyhow::Error) {
        if self.0.is_some() {
            debug!("{err:#}; already exiting after an earlier failure");
            return;
        }
        self.0 = Some(err);
    }

    fn into_result(self) -> Result<()> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
