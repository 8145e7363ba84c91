// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use lumen_core::init_tracing;
use lumen_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};
use lumen_platform::{load_scene, FrameClock};
use lumen_render::{FrameOutcome, RenderOptions, RenderSize, Renderer, SceneAssets};
use lumen_render_vk::VkRenderer;
use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
    assets: AssetsCfg,
    log: LogCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WindowCfg {
    width: u32,
    height: u32,
    title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: 800,
            height: 600,
            title: "Lumen".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    /// Unset follows the build profile.
    validation: Option<bool>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: RenderOptions::default().clear_color,
            validation: None,
        }
    }
}

impl RenderCfg {
    fn options(&self) -> RenderOptions {
        let defaults = RenderOptions::default();
        RenderOptions {
            clear_color: self.clear_color,
            validation: self.validation.unwrap_or(defaults.validation),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AssetsCfg {
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    texture_size: u32,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        AssetsCfg {
            vertex_shader: "shaders/bin/quad.vert.spv".into(),
            fragment_shader: "shaders/bin/quad.frag.spv".into(),
            texture_size: 256,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LogCfg {
    filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        LogCfg {
            filter: "info".into(),
        }
    }
}

/// Absent file means defaults. A malformed one is reported once tracing is up.
fn load_cfg(path: &Path) -> (AppCfg, Option<String>) {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                AppCfg::default(),
                Some(format!("{}: {e}; using defaults", path.display())),
            ),
        },
        Err(_) => (AppCfg::default(), None),
    }
}

// Field order: the renderer must go before the window it draws into.
struct App {
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    cfg: AppCfg,
    assets: SceneAssets,
    clock: FrameClock,
    /// Zero-area surface: stop polling until a nonzero resize.
    paused: bool,
}

impl App {
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn frame(&mut self) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };
        let (delta_ms, sample) = self.clock.tick(Instant::now());
        if let Err(e) = renderer.update(delta_ms) {
            error!("update error: {e:#}");
        }
        match renderer.render() {
            Ok(FrameOutcome::Skipped) => self.paused = true,
            Ok(_) => {}
            Err(e) => error!("render error: {e:#}"),
        }
        if let Some(sample) = sample {
            window.set_title(&sample.title(&self.cfg.window.title));
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => {
                error!("create_window failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        let size = RenderSize {
            width: size.width,
            height: size.height,
        };
        let options = self.cfg.render.options();
        match VkRenderer::new(&window, &window, size, &self.assets, options) {
            Ok(r) => {
                info!(
                    width = size.width,
                    height = size.height,
                    validation = r.validation_enabled(),
                    "renderer ready"
                );
                self.renderer = Some(r);
            }
            Err(e) => {
                error!("renderer init failed: {e:#}");
                event_loop.exit();
                return;
            }
        }

        self.clock = FrameClock::new(Instant::now());
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.shutdown(event_loop);
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
                info!("escape pressed");
                self.shutdown(event_loop);
            }
            WindowEvent::Focused(_) => {}
            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = &mut self.renderer {
                    let size = RenderSize {
                        width: new_size.width,
                        height: new_size.height,
                    };
                    if let Err(e) = renderer.resize(size) {
                        error!("resize error: {e:#}");
                    }
                    if !size.is_zero() && self.paused {
                        self.paused = false;
                        if let Some(w) = &self.window {
                            w.request_redraw();
                        }
                    }
                }
            }
            WindowEvent::RedrawRequested => self.frame(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (cfg, cfg_error) = load_cfg(&args.config);
    init_tracing(&cfg.log.filter);
    if let Some(msg) = cfg_error {
        warn!("config: {msg}");
    }

    let assets = load_scene(
        &cfg.assets.vertex_shader,
        &cfg.assets.fragment_shader,
        cfg.assets.texture_size,
    );
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        renderer: None,
        window: None,
        cfg,
        assets,
        clock: FrameClock::new(Instant::now()),
        paused: false,
    };
    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            title = "Demo"

            [render]
            validation = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "Demo");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert!(!cfg.render.options().validation);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.4, 1.0]);
        assert_eq!(cfg.assets.texture_size, 256);
        assert_eq!(cfg.log.filter, "info");
    }

    #[test]
    fn unset_validation_follows_build_profile() {
        let cfg = AppCfg::default();
        assert_eq!(cfg.render.options().validation, cfg!(debug_assertions));
    }

    #[test]
    fn malformed_or_missing_file_falls_back() {
        let missing = std::env::temp_dir().join("lumen-no-such-config.toml");
        let (cfg, err) = load_cfg(&missing);
        assert!(err.is_none());
        assert_eq!(cfg.window.title, "Lumen");

        let bad = std::env::temp_dir().join(format!("lumen-bad-{}.toml", std::process::id()));
        fs::write(&bad, "[window]\nwidth = \"wide\"\n").unwrap();
        let (cfg, err) = load_cfg(&bad);
        fs::remove_file(&bad).ok();
        assert!(err.is_some());
        assert_eq!(cfg.window.width, 800);
    }
}
