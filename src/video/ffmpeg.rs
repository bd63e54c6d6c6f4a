//! Local video file source using FFmpeg.
//!
//! Frames are decoded in-memory on demand: each request seeks to the nearest
//! preceding keyframe and decodes forward until the requested time.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::VideoSource;

pub struct FfmpegVideoSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl FfmpegVideoSource {
    pub fn open(path: &str) -> Result<Self> {
        if path.contains("://") {
            return Err(anyhow!("video detection only supports local paths (no URL schemes)"));
        }
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "opened video {} ({}x{})",
            path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
        })
    }

    fn to_stream_pts(&self, timestamp_ms: u64) -> i64 {
        let num = i64::from(self.time_base.numerator().max(1));
        let den = i64::from(self.time_base.denominator());
        (timestamp_ms as i64).saturating_mul(den) / num.saturating_mul(1000)
    }

    fn next_video_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        frame_to_image(&rgb_frame)
    }
}

impl VideoSource for FfmpegVideoSource {
    fn duration_ms(&mut self) -> Result<Option<u64>> {
        // Container duration is in AV_TIME_BASE (microseconds).
        let duration = self.input.duration();
        if duration <= 0 {
            return Ok(None);
        }
        Ok(Some((duration / 1000) as u64))
    }

    fn frame_at(&mut self, timestamp_ms: u64) -> Result<Option<RgbImage>> {
        let target_us = (timestamp_ms as i64).saturating_mul(1000);
        self.input
            .seek(target_us, ..target_us)
            .with_context(|| format!("seek to {}ms in {}", timestamp_ms, self.path))?;
        self.decoder.flush();

        let target_pts = self.to_stream_pts(timestamp_ms);
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut last: Option<RgbImage> = None;

        while let Some(packet) = self.next_video_packet() {
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
                let image = self.convert(&decoded)?;
                if pts >= target_pts {
                    return Ok(Some(image));
                }
                last = Some(image);
            }
        }

        // End of stream: drain the decoder and settle for the last frame.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            last = Some(self.convert(&decoded)?);
        }
        Ok(last)
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("decoded frame does not fit {}x{}", width, height))
}
