//! Frame decoding through an `ffmpeg` child process.
//!
//! ffmpeg writes raw `rgb24` frames to stdout; `ffmpeg-sidecar` parses them
//! into [`FfmpegEvent::OutputFrame`] events alongside its log stream.

use std::path::{Path, PathBuf};

use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use ffmpeg_sidecar::iter::FfmpegIterator;
use roadwatch_core::{Frame, FrameSource, VideoOpener, VisionError};
use tracing::{debug, warn};

/// Opens videos by spawning ffmpeg. Uses `ffmpeg` from `PATH` unless an
/// explicit binary is configured.
#[derive(Clone, Debug, Default)]
pub struct FfmpegOpener {
    ffmpeg_path: Option<PathBuf>,
}

impl FfmpegOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: Some(path.into()),
        }
    }

    fn command(&self) -> FfmpegCommand {
        match &self.ffmpeg_path {
            Some(path) => FfmpegCommand::new_with_path(path),
            None => FfmpegCommand::new(),
        }
    }
}

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VisionError> {
        if !path.is_file() {
            return Err(VisionError::open(path, "no such file"));
        }

        let mut cmd = self.command();
        let _ = cmd
            .hide_banner()
            .input(path.to_string_lossy().into_owned())
            .rawvideo();

        let mut child = cmd.spawn().map_err(|e| VisionError::open(path, e))?;
        let events = match child.iter() {
            Ok(events) => events,
            Err(e) => {
                reap(&mut child);
                return Err(VisionError::open(path, e));
            }
        };
        debug!(path = %path.display(), "ffmpeg decoder started");

        Ok(Box::new(FfmpegFrameSource {
            child,
            events,
            frames: 0,
            last_error: None,
            finished: false,
        }))
    }
}

/// Live decoder over one file. Dropping it kills and reaps ffmpeg.
pub struct FfmpegFrameSource {
    child: FfmpegChild,
    events: FfmpegIterator,
    frames: u64,
    last_error: Option<String>,
    finished: bool,
}

impl FrameSource for FfmpegFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.finished {
            return Ok(None);
        }
        for event in self.events.by_ref() {
            match event {
                FfmpegEvent::OutputFrame(frame) => {
                    let (width, height) = (frame.width, frame.height);
                    let image = Frame::from_raw(width, height, frame.data).ok_or_else(|| {
                        VisionError::Decode(format!(
                            "frame {} has wrong size for {width}x{height} rgb24",
                            self.frames
                        ))
                    })?;
                    self.frames += 1;
                    return Ok(Some(image));
                }
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, message)
                | FfmpegEvent::Error(message) => {
                    debug!(error = %message, "ffmpeg reported error");
                    self.last_error = Some(message);
                }
                _ => {}
            }
        }

        self.finished = true;
        if self.frames > 0 {
            return Ok(None);
        }
        let status = self.child.wait().map_err(|e| VisionError::Decode(e.to_string()))?;
        match (status.success(), self.last_error.take()) {
            (_, Some(message)) => Err(VisionError::Decode(message)),
            (false, None) => Err(VisionError::Decode(format!("ffmpeg exited with {status}"))),
            (true, None) => Ok(None),
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        reap(&mut self.child);
    }
}

fn reap(child: &mut FfmpegChild) {
    // Kill fails once the process has already exited.
    let _ = child.kill();
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap ffmpeg");
    }
}
