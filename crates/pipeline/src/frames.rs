//! Raw frame pipes.
//!
//! Decoding and encoding run as ffmpeg child processes exchanging packed
//! RGB24 frames over stdin/stdout. These types are blocking and are driven
//! from `spawn_blocking`.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use image::RgbImage;
use reefwatch_core::ffmpeg::{self, FfmpegTools, VideoInfo};

use crate::error::PipelineError;

/// Produces decoded frames in presentation order.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, PipelineError>;
}

/// Consumes annotated frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PipelineError>;

    /// Flush and close. Must be called once after the last frame.
    fn finish(self: Box<Self>) -> Result<(), PipelineError>;
}

/// Drain a child's stderr on a helper thread so a chatty ffmpeg can never
/// block on a full pipe.
fn collect_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(std::thread::spawn(move || {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text);
        text
    }))
}

fn finish_child(mut child: Child, stderr: Option<JoinHandle<String>>, what: &str) -> Result<(), PipelineError> {
    let status = child.wait()?;
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    if !status.success() {
        return Err(PipelineError::FramePipe(format!(
            "ffmpeg {what} exited with {:?}: {}",
            status.code(),
            stderr.trim()
        )));
    }
    Ok(())
}

/// Frames decoded by an `ffmpeg -f rawvideo` child.
pub struct FfmpegFrameReader {
    child: Option<Child>,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    frame_bytes: usize,
}

impl FfmpegFrameReader {
    pub fn spawn(tools: &FfmpegTools, input: &Path, info: &VideoInfo) -> Result<Self, PipelineError> {
        let mut child = Command::new(&tools.ffmpeg)
            .args(ffmpeg::decode_args(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::FramePipe("decoder stdout unavailable".into()))?;
        let stderr = collect_stderr(&mut child);

        Ok(Self {
            child: Some(child),
            stdout,
            stderr,
            width: info.width,
            height: info.height,
            frame_bytes: info.frame_bytes(),
        })
    }

    fn reap(&mut self) -> Result<(), PipelineError> {
        match self.child.take() {
            Some(child) => finish_child(child, self.stderr.take(), "decode"),
            None => Ok(()),
        }
    }
}

impl FrameSource for FfmpegFrameReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, PipelineError> {
        if self.child.is_none() {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            self.reap()?;
            return Ok(None);
        }
        if filled < buf.len() {
            self.reap()?;
            return Err(PipelineError::FramePipe(format!(
                "truncated frame: got {filled} of {} bytes",
                self.frame_bytes
            )));
        }

        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| PipelineError::FramePipe("frame buffer size mismatch".into()))
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        // Early exit (max_frames, errors): stop the decoder instead of
        // leaving it blocked on a full stdout.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Frames encoded by an `ffmpeg` child reading rawvideo on stdin.
pub struct FfmpegFrameWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegFrameWriter {
    pub fn spawn(
        tools: &FfmpegTools,
        output: &Path,
        info: &VideoInfo,
        segment_secs: u32,
    ) -> Result<Self, PipelineError> {
        let mut child = Command::new(&tools.ffmpeg)
            .args(ffmpeg::encode_args(info, output, segment_secs))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let stderr = collect_stderr(&mut child);
        Ok(Self {
            child: Some(child),
            stdin,
            stderr,
        })
    }
}

impl FrameSink for FfmpegFrameWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PipelineError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::FramePipe("encoder stdin closed".into()))?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), PipelineError> {
        // Closing stdin signals end of input.
        drop(self.stdin.take());
        match self.child.take() {
            Some(child) => finish_child(child, self.stderr.take(), "encode"),
            None => Ok(()),
        }
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        // Abandoned without `finish`: the output is incomplete anyway.
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory frame pipes for tests.

    use std::sync::{Arc, Mutex};

    use super::*;

    pub(crate) struct VecSource {
        frames: std::vec::IntoIter<RgbImage>,
        pub fail_at: Option<usize>,
        served: usize,
    }

    impl VecSource {
        pub(crate) fn new(frames: Vec<RgbImage>) -> Self {
            Self {
                frames: frames.into_iter(),
                fail_at: None,
                served: 0,
            }
        }

        pub(crate) fn solid(count: usize, width: u32, height: u32) -> Self {
            Self::new((0..count).map(|_| RgbImage::new(width, height)).collect())
        }
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>, PipelineError> {
            if self.fail_at == Some(self.served) {
                return Err(PipelineError::FramePipe("corrupt stream".into()));
            }
            self.served += 1;
            Ok(self.frames.next())
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct VecSink {
        pub frames: Arc<Mutex<Vec<RgbImage>>>,
        pub finished: Arc<Mutex<bool>>,
    }

    impl FrameSink for VecSink {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PipelineError> {
            self.frames.lock().unwrap().push(frame.clone());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), PipelineError> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }
}
