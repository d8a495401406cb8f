//! Multi-frame screenshot capture.
//!
//! A session renders a number of frames through the CRT persistence stages,
//! reads each one back, averages them on a background thread and finishes the
//! composite with the sharpen/effects stages before handing it to the JPEG
//! writer. Only one session runs at a time.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError};
use crtprefs::{CaptureSettings, CrtPreferences, ExposureMode, PreferenceStore};
use image::RgbaImage;

use crate::composite::{composite, CompositeError};
use crate::crt::{CrtMode, CrtSequencer};
use crate::device::{RenderDevice, RenderError};
use crate::types::{CartridgeMetadata, ShaderEnvironment};
use crate::writer::{JpegWriter, WriteError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Frames are rendered so the phosphor settles, but not captured.
    Warming,
    Accumulating,
    /// Waiting for the background average.
    Compositing,
    /// The finished image was handed to the writer on this call.
    Saving,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Warming => "warming",
            SessionPhase::Accumulating => "accumulating",
            SessionPhase::Compositing => "compositing",
            SessionPhase::Saving => "saving",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScreenshotError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error("compositing thread exited without a result")]
    CompositorLost,
    #[error("failed to spawn compositing thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to reserve space for {0} exposures")]
    Reserve(usize),
}

/// Cloneable view of whether a session is in flight.
#[derive(Clone, Debug)]
pub struct SessionActivity(Arc<AtomicBool>);

impl SessionActivity {
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Held for the lifetime of a session; dropping it lets the next one start.
#[derive(Debug)]
struct SessionGuard(Arc<AtomicBool>);

impl SessionGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Session {
    _guard: SessionGuard,
    mode: ExposureMode,
    path: PathBuf,
    prefs: CrtPreferences,
    exposures: i32,
    counter: i32,
    compositing: Option<Receiver<Result<RgbaImage, CompositeError>>>,
}

impl Session {
    fn phase(&self) -> SessionPhase {
        if self.compositing.is_some() {
            SessionPhase::Compositing
        } else if self.counter > self.exposures {
            SessionPhase::Warming
        } else {
            SessionPhase::Accumulating
        }
    }
}

pub struct ScreenshotSequencer {
    preferences: Arc<PreferenceStore<CrtPreferences>>,
    capture: CaptureSettings,
    busy: Arc<AtomicBool>,
    crt: CrtSequencer,
    exposures: Vec<RgbaImage>,
    session: Option<Session>,
    claimed: HashSet<PathBuf>,
    writer: JpegWriter,
}

impl ScreenshotSequencer {
    pub fn new(preferences: Arc<PreferenceStore<CrtPreferences>>, capture: CaptureSettings) -> Self {
        Self {
            preferences,
            capture,
            busy: Arc::new(AtomicBool::new(false)),
            crt: CrtSequencer::new(),
            exposures: Vec::new(),
            session: None,
            claimed: HashSet::new(),
            writer: JpegWriter::new(),
        }
    }

    pub fn activity(&self) -> SessionActivity {
        SessionActivity(Arc::clone(&self.busy))
    }

    pub fn is_working(&self) -> bool {
        self.session.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map_or(SessionPhase::Idle, Session::phase)
    }

    /// Frames left before compositing; zero when idle.
    pub fn exposure_count(&self) -> i32 {
        self.session.as_ref().map_or(0, |session| session.counter)
    }

    /// Raw frames captured so far in the current session.
    pub fn exposures_len(&self) -> usize {
        self.exposures.len()
    }

    /// Where the current session will write its image.
    pub fn output_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|session| session.path.as_path())
    }

    /// Begins a capture session.
    ///
    /// Returns `false`, leaving all state untouched, when another session is
    /// still in flight.
    pub fn start_process<C>(
        &mut self,
        mode: ExposureMode,
        cartridge: &C,
        suffix: Option<&str>,
    ) -> bool
    where
        C: CartridgeMetadata + ?Sized,
    {
        let Some(guard) = SessionGuard::try_acquire(&self.busy) else {
            tracing::warn!(mode = %mode, "screenshot already in progress; request dropped");
            return false;
        };

        let exposures = self.capture.exposures_for(mode) as usize;
        self.exposures.clear();
        if self.exposures.try_reserve_exact(exposures).is_err() {
            tracing::error!(
                mode = %mode,
                err = %ScreenshotError::Reserve(exposures),
                "screenshot session aborted"
            );
            return false;
        }

        self.reap_saves();
        let stem = file_stem(cartridge.short_name(), mode, suffix);
        let path = unique_path(self.capture.output_dir(), &stem, &self.claimed);
        self.claimed.insert(path.clone());

        let warmup = self.capture.warmup_frames as i32;
        let prefs = self.preferences.snapshot().scaled_for(mode);
        self.crt.flush_phosphor();

        tracing::info!(
            mode = %mode,
            exposures,
            warmup,
            path = %path.display(),
            "screenshot session started"
        );
        self.session = Some(Session {
            _guard: guard,
            mode,
            path,
            prefs,
            exposures: exposures as i32,
            counter: exposures as i32 + warmup,
            compositing: None,
        });
        true
    }

    /// Advances the session by one video frame. Does nothing while idle.
    ///
    /// Failures abort the session and are logged; the returned phase is then
    /// [`SessionPhase::Idle`].
    pub fn process<D>(&mut self, device: &mut D, env: &ShaderEnvironment) -> SessionPhase
    where
        D: RenderDevice + ?Sized,
    {
        self.reap_saves();
        let outcome = match self.phase() {
            SessionPhase::Idle => return SessionPhase::Idle,
            SessionPhase::Compositing => self.poll_composite(device),
            _ => self.expose(device, env),
        };

        match outcome {
            Ok(phase) => phase,
            Err(err) => {
                tracing::error!(%err, "screenshot session aborted");
                self.abort();
                SessionPhase::Idle
            }
        }
    }

    /// Blocks until every image still with the writer is on disk (or failed).
    ///
    /// Saves that already finished were collected by earlier `process` calls
    /// and are not reported again.
    pub fn wait_for_saves(&mut self) -> Vec<Result<PathBuf, WriteError>> {
        let results = self.writer.wait();
        for result in &results {
            let path = match result {
                Ok(path) => path.as_path(),
                Err(err) => err.path(),
            };
            self.claimed.remove(path);
        }
        results
    }

    /// Images handed to the writer and not yet collected.
    pub fn pending_saves(&self) -> usize {
        self.writer.pending()
    }

    /// Frees the CRT framebuffers held on `device`.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: RenderDevice + ?Sized,
    {
        self.crt.release(device);
    }

    fn expose<D>(
        &mut self,
        device: &mut D,
        env: &ShaderEnvironment,
    ) -> Result<SessionPhase, ScreenshotError>
    where
        D: RenderDevice + ?Sized,
    {
        let Some(session) = self.session.as_mut() else {
            return Ok(SessionPhase::Idle);
        };

        let warming = session.counter > session.exposures;
        let output = self
            .crt
            .process(device, env, &session.prefs, CrtMode::Exposure)?;
        if !warming {
            self.exposures.push(device.read_pixels(output)?);
        }
        session.counter -= 1;
        tracing::debug!(
            remaining = session.counter,
            captured = self.exposures.len(),
            warming,
            "screenshot frame processed"
        );
        if session.counter > 0 {
            return Ok(session.phase());
        }

        let exposures = std::mem::take(&mut self.exposures);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name("crtshot-composite".into())
            .spawn(move || {
                let _ = sender.send(composite(&exposures));
            })
            .map_err(ScreenshotError::Spawn)?;
        session.compositing = Some(receiver);
        Ok(SessionPhase::Compositing)
    }

    fn poll_composite<D>(&mut self, device: &mut D) -> Result<SessionPhase, ScreenshotError>
    where
        D: RenderDevice + ?Sized,
    {
        let Some(session) = self.session.as_ref() else {
            return Ok(SessionPhase::Idle);
        };
        let Some(receiver) = session.compositing.as_ref() else {
            return Ok(session.phase());
        };
        let image = match receiver.try_recv() {
            Ok(result) => result?,
            Err(TryRecvError::Empty) => return Ok(SessionPhase::Compositing),
            Err(TryRecvError::Disconnected) => return Err(ScreenshotError::CompositorLost),
        };

        let (width, height) = image.dimensions();
        let uploaded = device.upload(&image)?;
        drop(image);
        let env = ShaderEnvironment::new(width, height, uploaded);
        let finished = self
            .crt
            .process(device, &env, &session.prefs, CrtMode::Finalise)
            .and_then(|output| device.read_pixels(output));
        device.release(uploaded);
        let finished = finished?;

        if let Some(session) = self.session.take() {
            tracing::info!(
                mode = %session.mode,
                path = %session.path.display(),
                "screenshot composited"
            );
            self.writer.submit(finished, session.path);
        }
        Ok(SessionPhase::Saving)
    }

    /// Forgets finished writes; their names are guarded by the file on disk
    /// from here on.
    fn reap_saves(&mut self) {
        for path in self.writer.reap() {
            self.claimed.remove(&path);
        }
    }

    fn abort(&mut self) {
        self.exposures = Vec::new();
        if let Some(session) = self.session.take() {
            self.claimed.remove(&session.path);
        }
    }
}

/// `<cartridge>_<mode>[_<suffix>]` with anything outside `[A-Za-z0-9_-]`
/// replaced.
fn file_stem(cartridge: &str, mode: ExposureMode, suffix: Option<&str>) -> String {
    let mut name = sanitize(cartridge);
    if name.is_empty() {
        name.push_str("screenshot");
    }
    name.push('_');
    name.push_str(mode.tag());
    if let Some(suffix) = suffix.map(sanitize).filter(|suffix| !suffix.is_empty()) {
        name.push('_');
        name.push_str(&suffix);
    }
    name
}

fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// First of `stem.jpg`, `stem_1.jpg`, ... that neither exists on disk nor was
/// handed out earlier.
fn unique_path(dir: &Path, stem: &str, claimed: &HashSet<PathBuf>) -> PathBuf {
    let taken = |path: &Path| path.exists() || claimed.contains(path);
    let first = dir.join(format!("{stem}.jpg"));
    if !taken(&first) {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}.jpg")))
        .find(|path| !taken(path))
        .unwrap_or(first)
}
