//! MPEG-4 visualization clips, encoded in-process with ffmpeg.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{FrameSink, SinkFactory};
use crate::frame::{ClipInfo, Frame};

/// Used when the source reports no frame rate.
const FALLBACK_FPS: f32 = 25.0;

/// Writes `<output_dir>/track_<clip>.mp4` at the clip's frame rate.
pub struct VideoSinkFactory {
    output_dir: PathBuf,
}

impl VideoSinkFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl SinkFactory for VideoSinkFactory {
    fn create(&self, clip_name: &str, info: &ClipInfo) -> Result<Box<dyn FrameSink>> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("create visualization dir {}", self.output_dir.display()))?;
        let path = self.output_dir.join(format!("track_{}.mp4", clip_name));
        let sink = VideoSink::create(&path, info)?;
        log::info!("writing tracking visualization to {}", path.display());
        Ok(Box::new(sink))
    }
}

pub struct VideoSink {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    finished: bool,
}

impl VideoSink {
    /// Open `path` for writing. Odd dimensions are cropped by one pixel, as
    /// YUV 4:2:0 needs even sizes.
    pub fn create(path: &Path, info: &ClipInfo) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let (width, height) = (info.width & !1, info.height & !1);
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot encode {}x{} frames", info.width, info.height));
        }
        let fps = if info.fps.is_finite() && info.fps > 0.0 {
            info.fps
        } else {
            FALLBACK_FPS
        };
        let frame_rate = ffmpeg::Rational::from(fps as f64);
        let time_base = frame_rate.invert();

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create '{}' with ffmpeg", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg was built without an MPEG-4 encoder"))?;
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create ffmpeg video encoder")?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_time_base(time_base);
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .context("open ffmpeg video encoder")?;

        let stream_index = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            stream.index()
        };
        output
            .write_header()
            .with_context(|| format!("write header of '{}'", path.display()))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            time_base,
            width,
            height,
            next_pts: 0,
            finished: false,
        })
    }

    fn to_rgb_frame(&self, frame: &Frame) -> Result<ffmpeg::frame::Video> {
        if frame.width() < self.width || frame.height() < self.height {
            return Err(anyhow!(
                "frame {} is {}x{}, sink expects {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }
        let mut rgb =
            ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        let row_bytes = self.width as usize * 3;
        let src_row = frame.width() as usize * 3;
        let src = frame.pixels();
        let dst = rgb.data_mut(0);
        for y in 0..self.height as usize {
            let from = src
                .get(y * src_row..y * src_row + row_bytes)
                .context("frame row is out of bounds")?;
            dst.get_mut(y * stride..y * stride + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(from);
        }
        Ok(rgb)
    }

    fn write_packets(&mut self) -> Result<()> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("output stream {} vanished", self.stream_index))?;
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .with_context(|| format!("write packet to '{}'", self.path.display()))?;
        }
        Ok(())
    }
}

impl FrameSink for VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let rgb = self.to_rgb_frame(frame)?;
        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;
        self.encoder
            .send_frame(&yuv)
            .context("send frame to ffmpeg encoder")?;
        self.write_packets()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder
            .send_eof()
            .context("flush ffmpeg encoder")?;
        self.write_packets()?;
        self.output
            .write_trailer()
            .with_context(|| format!("finalize '{}'", self.path.display()))?;
        log::debug!("{}: {} frames encoded", self.path.display(), self.next_pts);
        Ok(())
    }
}
