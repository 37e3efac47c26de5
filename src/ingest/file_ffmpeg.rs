//! Local video file decoding using FFmpeg.
//!
//! Frames are decoded in-memory and converted to packed RGB24. Rewinding
//! reopens the input, which also resets decoder state after a corrupt packet.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::file::FileConfig;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    stream: DecodeStream,
    frame_count: u64,
}

struct DecodeStream {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("ffmpeg initialisation failed")?;
        let stream = DecodeStream::open(&config.path)?;
        log::info!("FileSource: opened {} (ffmpeg)", config.path);
        Ok(Self {
            config,
            stream,
            frame_count: 0,
        })
    }

    pub(crate) fn path(&self) -> &str {
        &self.config.path
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame = self.stream.next_frame()?;
        if frame.is_some() {
            self.frame_count += 1;
        }
        Ok(frame)
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.stream = DecodeStream::open(&self.config.path)?;
        log::debug!(
            "FileSource: rewound {} after {} frames",
            self.config.path,
            self.frame_count
        );
        Ok(())
    }
}

impl DecodeStream {
    fn open(path: &str) -> Result<Self> {
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("cannot open '{}' for decoding", path))?;
        let track = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' contains no video track", path))?;
        let stream_index = track.index();
        let decoder = ffmpeg::codec::context::Context::from_parameters(track.parameters())
            .and_then(|codec| codec.decoder().video())
            .with_context(|| format!("no usable video decoder for '{}'", path))?;
        let scaler = rgb_scaler(&decoder)?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
        })
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }

        while let Some((index, packet)) = self.next_packet() {
            if index != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("decoder rejected packet")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        // Drain frames still buffered in the decoder.
        if !self.flushed {
            self.flushed = true;
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
        }
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }

    fn next_packet(&mut self) -> Option<(usize, ffmpeg::Packet)> {
        self.input
            .packets()
            .next()
            .map(|(stream, packet)| (stream.index(), packet))
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .context("RGB conversion failed")?;
        frame_to_image(&rgb)
    }
}

/// Same-size conversion from the decoder's pixel format to packed RGB24.
fn rgb_scaler(decoder: &ffmpeg::codec::decoder::Video) -> Result<ffmpeg::software::scaling::Context> {
    let (width, height) = (decoder.width(), decoder.height());
    ffmpeg::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg::format::Pixel::RGB24,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .context("cannot build RGB24 converter")
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("decoded frame has inconsistent dimensions"))
}
