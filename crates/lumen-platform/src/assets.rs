// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use lumen_render::{SceneAssets, TextureData};
use tracing::{debug, warn};

/// Reads a pre-compiled shader blob. A missing or unreadable file yields an
/// empty buffer; the backend rejects it at pipeline creation.
pub fn read_bytecode(path: impl AsRef<Path>) -> Vec<u8> {
    let path = path.as_ref();
    match fs::read(path) {
        Ok(bytes) => {
            debug!(path = %path.display(), len = bytes.len(), "shader bytecode loaded");
            bytes
        }
        Err(e) => {
            warn!(path = %path.display(), "shader bytecode unavailable: {e}");
            Vec::new()
        }
    }
}

/// Square RGBA8 checkerboard (8 cells per side) tinted by a UV gradient.
pub fn checker_texture(size: u32) -> TextureData {
    let size = size.max(1);
    let cell = (size / 8).max(1);
    let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
    for y in 0..size {
        for x in 0..size {
            let lit = ((x / cell) + (y / cell)) % 2 == 0;
            let u = (x * 255 / size) as u8;
            let v = (y * 255 / size) as u8;
            let px = if lit { [u, v, 255, 255] } else { [u / 4, v / 4, 64, 255] };
            pixels.extend_from_slice(&px);
        }
    }
    TextureData {
        width: size,
        height: size,
        pixels,
    }
}

pub fn load_scene(
    vertex_shader: impl AsRef<Path>,
    fragment_shader: impl AsRef<Path>,
    texture_size: u32,
) -> SceneAssets {
    SceneAssets {
        vertex_spv: read_bytecode(vertex_shader),
        fragment_spv: read_bytecode(fragment_shader),
        texture: checker_texture(texture_size),
    }
}
