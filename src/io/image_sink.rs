//! Writes frames as image files into a single directory.

use crate::io::{Frame, Sink};
use anyhow::{Context, Result};
use image::{ExtendedColorType, ImageFormat};
use std::path::{Path, PathBuf};

/// Encodes each frame to `<directory>/<key>.<extension>`.
///
/// The encoder is picked from the extension (`png`, `jpg`, `bmp`, `ppm`, ...).
#[derive(Debug, Clone)]
pub struct ImageFileSink {
    directory: PathBuf,
    extension: String,
    format: ImageFormat,
}

impl ImageFileSink {
    /// Create the sink, creating `directory` if it does not exist.
    pub fn new(directory: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let directory = directory.into();
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();

        let format = ImageFormat::from_extension(&extension)
            .ok_or_else(|| anyhow::anyhow!("Unsupported image extension '{}'", extension))?;
        if !format.writing_enabled() {
            anyhow::bail!("No encoder available for '{}'", extension);
        }

        std::fs::create_dir_all(&directory).with_context(|| {
            format!("Failed to create output directory {}", directory.display())
        })?;

        Ok(Self {
            directory,
            extension,
            format,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Full path for a destination key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", key, self.extension))
    }

    /// Count regular files in the output directory.
    pub fn count_files(&self) -> Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(&self.directory)? {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Sink<Frame> for ImageFileSink {
    fn persist(&self, key: &str, frame: Frame) -> Result<u64> {
        let path = self.path_for(key);

        // Encoders assert on the buffer length; reject mismatches here instead.
        let expected = frame.width as usize * frame.height as usize * Frame::CHANNELS;
        if frame.pixels.len() != expected {
            anyhow::bail!(
                "Frame {} has {} bytes, expected {} for {}x{} RGB",
                key,
                frame.pixels.len(),
                expected,
                frame.width,
                frame.height
            );
        }

        image::save_buffer_with_format(
            &path,
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
            self.format,
        )
        .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(std::fs::metadata(&path)?.len())
    }
}
