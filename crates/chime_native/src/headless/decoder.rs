//! 无设备后端使用的解码器
//!
//! 使用 symphonia 探测并解码文件，供长度预扫描和频谱采样使用。

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::{ERROR_CODEC, ERROR_DECODE, ERROR_FILEFORM, ERROR_FILEOPEN};

/// 解码器错误
#[derive(thiserror::Error, Debug)]
pub(crate) enum DecoderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unrecognized format: {0}")]
    Format(String),
    #[error("No supported audio track found")]
    NoTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
    #[error("Decode error: {0}")]
    Decode(String),
}

impl DecoderError {
    /// 对应的原生错误码
    pub(crate) fn native_code(&self) -> i32 {
        match self {
            DecoderError::Io(_) => ERROR_FILEOPEN,
            DecoderError::Format(_) | DecoderError::NoTrack => ERROR_FILEFORM,
            DecoderError::UnsupportedCodec => ERROR_CODEC,
            DecoderError::Decode(_) => ERROR_DECODE,
        }
    }
}

/// 流参数
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub n_frames: Option<u64>,
}

pub(crate) struct StreamDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    /// seek 后需要丢弃的帧数（实际落点早于目标时）
    skip_frames: u64,
    pub info: StreamInfo,
}

impl StreamDecoder {
    pub(crate) fn open(path: &Path) -> Result<Self, DecoderError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecoderError::Format(e.to_string()))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let info = StreamInfo {
            sample_rate: codec_params.sample_rate.unwrap_or(44100),
            channels: codec_params.channels.map(|c| c.count()).unwrap_or(2),
            n_frames: codec_params.n_frames,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|_| DecoderError::UnsupportedCodec)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            skip_frames: 0,
            info,
        })
    }

    /// 解码下一个包，返回交错的 f32 采样；文件结束返回 `None`
    pub(crate) fn decode_next(&mut self) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(DecoderError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // 损坏的包直接跳过
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DecoderError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;

            if self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < capacity as usize)
            {
                self.sample_buf = Some(SampleBuffer::new(capacity, spec));
            }
            let Some(sample_buf) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref(decoded);

            let mut samples = sample_buf.samples();
            if self.skip_frames > 0 {
                let frames = (samples.len() / self.info.channels.max(1)) as u64;
                let skip = self.skip_frames.min(frames);
                self.skip_frames -= skip;
                samples = &samples[skip as usize * self.info.channels.max(1)..];
                if samples.is_empty() {
                    continue;
                }
            }

            return Ok(Some(samples.to_vec()));
        }
    }

    /// 跳转到指定秒数
    pub(crate) fn seek(&mut self, seconds: f64) -> Result<(), DecoderError> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecoderError::Decode(e.to_string()))?;

        self.decoder.reset();
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);

        Ok(())
    }

    /// 预扫描：逐包解码并统计总帧数
    pub(crate) fn count_frames(&mut self) -> Result<u64, DecoderError> {
        let channels = self.info.channels.max(1) as u64;
        let mut frames = 0u64;
        while let Some(samples) = self.decode_next()? {
            frames += samples.len() as u64 / channels;
        }
        Ok(frames)
    }

    /// 从当前位置读取至多 `frames` 帧并混为单声道
    pub(crate) fn read_mono(&mut self, frames: usize) -> Result<Vec<f32>, DecoderError> {
        let channels = self.info.channels.max(1);
        let mut mono = Vec::with_capacity(frames);

        while mono.len() < frames {
            let Some(samples) = self.decode_next()? else {
                break;
            };
            for frame in samples.chunks_exact(channels) {
                if mono.len() == frames {
                    break;
                }
                mono.push(frame.iter().sum::<f32>() / channels as f32);
            }
        }

        Ok(mono)
    }
}
