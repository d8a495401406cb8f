use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

/// Quality every screenshot is encoded at.
pub const JPEG_QUALITY: u8 = 100;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to flush {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn writer thread for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writer thread for {path} panicked")]
    Panicked { path: PathBuf },
}

impl WriteError {
    pub fn path(&self) -> &Path {
        match self {
            WriteError::Create { path, .. }
            | WriteError::Encode { path, .. }
            | WriteError::Flush { path, .. }
            | WriteError::Spawn { path, .. }
            | WriteError::Panicked { path } => path,
        }
    }
}

/// Encodes `image` as a quality-100 JPEG at `path`, dropping alpha.
///
/// Each step logs its own failure before returning it.
pub fn write_jpeg(image: &RgbaImage, path: &Path) -> Result<(), WriteError> {
    let file = File::create(path).map_err(|source| {
        tracing::error!(path = %path.display(), %source, "cannot create screenshot file");
        WriteError::Create {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut writer = BufWriter::new(file);
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|source| {
            tracing::error!(path = %path.display(), %source, "cannot encode screenshot");
            WriteError::Encode {
                path: path.to_path_buf(),
                source,
            }
        })?;

    writer.flush().map_err(|source| {
        tracing::error!(path = %path.display(), %source, "cannot flush screenshot file");
        WriteError::Flush {
            path: path.to_path_buf(),
            source,
        }
    })?;

    tracing::info!(path = %path.display(), "screenshot saved");
    Ok(())
}

struct PendingWrite {
    path: PathBuf,
    handle: JoinHandle<Result<PathBuf, WriteError>>,
}

/// Runs [`write_jpeg`] on background threads, one per image.
#[derive(Default)]
pub struct JpegWriter {
    pending: Vec<PendingWrite>,
    failed: Vec<WriteError>,
}

impl JpegWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands `image` off for encoding; takes ownership so the caller never
    /// waits on disk I/O.
    pub fn submit(&mut self, image: RgbaImage, path: PathBuf) {
        let target = path.clone();
        let spawned = thread::Builder::new()
            .name("crtshot-jpeg".into())
            .spawn(move || write_jpeg(&image, &target).map(|()| target));
        match spawned {
            Ok(handle) => self.pending.push(PendingWrite { path, handle }),
            Err(source) => {
                tracing::error!(path = %path.display(), %source, "cannot spawn screenshot writer");
                self.failed.push(WriteError::Spawn { path, source });
            }
        }
    }

    /// Number of writes not yet collected by [`reap`](Self::reap) or
    /// [`wait`](Self::wait).
    pub fn pending(&self) -> usize {
        self.pending.len() + self.failed.len()
    }

    /// Collects writes that have already finished without blocking and
    /// returns the paths they targeted. Failures are logged, not returned.
    pub fn reap(&mut self) -> Vec<PathBuf> {
        let mut done: Vec<PathBuf> = self
            .failed
            .drain(..)
            .map(|err| err.path().to_path_buf())
            .collect();
        let (finished, running): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|write| write.handle.is_finished());
        self.pending = running;

        for write in finished {
            match write.handle.join() {
                Ok(Ok(path)) => done.push(path),
                Ok(Err(err)) => {
                    tracing::debug!(%err, "collected failed screenshot write");
                    done.push(write.path);
                }
                Err(_) => {
                    tracing::error!(path = %write.path.display(), "screenshot writer panicked");
                    done.push(write.path);
                }
            }
        }
        done
    }

    /// Joins every outstanding write in submission order.
    pub fn wait(&mut self) -> Vec<Result<PathBuf, WriteError>> {
        let mut results: Vec<_> = self.failed.drain(..).map(Err).collect();
        for write in self.pending.drain(..) {
            let result = write
                .handle
                .join()
                .unwrap_or_else(|_| Err(WriteError::Panicked { path: write.path }));
            results.push(result);
        }
        results
    }
}

impl Drop for JpegWriter {
    fn drop(&mut self) {
        for write in self.pending.drain(..) {
            let _ = write.handle.join();
        }
    }
}
