// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Tightly packed RGBA8 pixels, row-major.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Opaque inputs handed over by the asset boundary. Empty shader blobs are
/// accepted here and rejected by the backend at pipeline creation.
#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub vertex_spv: Vec<u8>,
    pub fragment_spv: Vec<u8>,
    pub texture: TextureData,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    pub clear_color: [f32; 4],
    /// Enables API diagnostic layers and the message sink.
    pub validation: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            clear_color: [0.1, 0.2, 0.4, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Image acquired, submitted and presented.
    Presented,
    /// Presentation target went stale; the swap chain was rebuilt and this frame dropped.
    Rebuilt,
    /// Nothing to draw into (minimised, or a rebuild is still pending).
    Skipped,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        assets: &SceneAssets,
        options: RenderOptions,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn update(&mut self, delta_ms: f64) -> Result<()>;
    fn render(&mut self) -> Result<FrameOutcome>;
}
