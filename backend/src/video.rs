use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{Mat, MatTraitConst, Size},
    videoio::{
        self, CAP_ANY, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter,
        VideoWriterTrait, VideoWriterTraitConst,
    },
};

/// A destination for fixed-size BGR frames written in order.
#[cfg_attr(test, automock)]
pub trait FrameSink {
    /// Appends `frame` as the next frame.
    fn write(&mut self, frame: &Mat) -> Result<()>;

    /// Flushes and closes the sink. No frame can be written afterward.
    fn release(&mut self) -> Result<()>;
}

/// A [`FrameSink`] encoding frames into a `mp4v` video file.
pub struct VideoSink {
    writer: VideoWriter,
    path: PathBuf,
    size: Size,
    frames: usize,
}

impl VideoSink {
    pub fn create(path: impl AsRef<Path>, size: Size, fps: f64) -> Result<VideoSink> {
        let path = path.as_ref();
        if fps <= 0.0 {
            bail!("invalid frame rate {fps} for {}", path.display());
        }
        if size.width <= 0 || size.height <= 0 {
            bail!("invalid frame size {size:?} for {}", path.display());
        }

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(path_str(path)?, fourcc, fps, size, true)?;
        if !writer.is_opened()? {
            bail!("failed to open video writer {}", path.display());
        }

        Ok(VideoSink {
            writer,
            path: path.to_path_buf(),
            size,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames written so far.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl FrameSink for VideoSink {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        let size = frame.size()?;
        if size != self.size {
            bail!(
                "frame size {size:?} does not match {:?} of {}",
                self.size,
                self.path.display()
            );
        }
        self.writer.write(frame)?;
        self.frames += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}

/// Sequential frame reader over a video file.
pub struct VideoSource {
    capture: VideoCapture,
    fps: f64,
    size: Size,
}

impl VideoSource {
    pub fn open(path: impl AsRef<Path>) -> Result<VideoSource> {
        let path = path.as_ref();
        let capture = VideoCapture::from_file(path_str(path)?, CAP_ANY)?;
        if !capture.is_opened()? {
            bail!("cannot open {}", path.display());
        }

        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        Ok(VideoSource {
            capture,
            fps,
            size: Size::new(width, height),
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Reads the next frame or `None` at the end of the video.
    pub fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("non UTF-8 path {}", path.display()))
}
