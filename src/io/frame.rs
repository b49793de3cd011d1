//! Random RGB frame synthesis.

use crate::io::Generator;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// An interleaved 8-bit RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    /// Size of the pixel buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }
}

/// Fills every channel of every pixel with uniform noise in `0..=255`.
pub struct RandomFrameGenerator {
    rng: StdRng,
}

impl RandomFrameGenerator {
    /// Generator seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic generator for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomFrameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RandomFrameGenerator {
    type Payload = Frame;

    fn generate(&mut self, width: u32, height: u32) -> Result<Frame> {
        if width == 0 || height == 0 {
            anyhow::bail!("Frame dimensions must be positive, got {}x{}", width, height);
        }

        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(Frame::CHANNELS))
            .ok_or_else(|| anyhow::anyhow!("Frame {}x{} is too large", width, height))?;

        let mut pixels = vec![0u8; len];
        self.rng.fill_bytes(&mut pixels);

        Ok(Frame {
            width,
            height,
            pixels,
        })
    }
}
