// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),

    #[error("required instance extension {0} is not available")]
    MissingInstanceExtension(String),

    #[error("no physical device meets the requirements")]
    NoSuitableDevice,

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("image layout transition {from:?} -> {to:?} is not supported")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    #[error("{0} shader bytecode is empty")]
    EmptyShader(ShaderStage),

    #[error("{stage} shader bytecode is not valid SPIR-V: {source}")]
    InvalidShader {
        stage: ShaderStage,
        #[source]
        source: std::io::Error,
    },

    #[error("texture {width}x{height} does not match {len} bytes of RGBA8 pixels")]
    InvalidTexture { width: u32, height: u32, len: usize },

    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("acquire_next_image failed: {0}")]
    Acquire(vk::Result),

    #[error("queue_present failed: {0}")]
    Present(vk::Result),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Names the failing call on a raw `vk::Result`.
pub(crate) trait VkResultExt<T> {
    fn op(self, op: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn op(self, op: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Vulkan { op, result })
    }
}
