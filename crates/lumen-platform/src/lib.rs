// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Host-side pieces the renderer does not own: windowing, asset loading and
//! frame timing.

pub use winit;

pub mod assets;
pub mod clock;

pub use assets::{checker_texture, load_scene, read_bytecode};
pub use clock::{FpsSample, FrameClock};
