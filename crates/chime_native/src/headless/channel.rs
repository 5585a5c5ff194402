//! 无设备后端的通道状态

use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::decoder::{StreamDecoder, StreamInfo};

/// 输出按 16 位整型计量字节位置
const BYTES_PER_SAMPLE: u64 = 2;

/// 对数滑动无法经过 0，以此代替
const LOG_FLOOR: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Transport {
    Stopped,
    Playing { since: Instant, from: u64 },
    Paused,
}

#[derive(Debug, Clone, Copy)]
struct Slide {
    from: f32,
    to: f32,
    started: Instant,
    duration: Duration,
    logarithmic: bool,
}

/// 可滑动的通道属性
#[derive(Debug, Clone, Copy)]
pub(crate) struct Param {
    value: f32,
    slide: Option<Slide>,
}

impl Param {
    pub(crate) fn new(value: f32) -> Self {
        Self { value, slide: None }
    }

    pub(crate) fn current(&self, now: Instant) -> f32 {
        let Some(slide) = self.slide else {
            return self.value;
        };

        let elapsed = now.saturating_duration_since(slide.started);
        if slide.duration.is_zero() || elapsed >= slide.duration {
            return slide.to;
        }

        let t = (elapsed.as_secs_f64() / slide.duration.as_secs_f64()) as f32;
        if slide.logarithmic {
            let from = slide.from.max(LOG_FLOOR);
            let to = slide.to.max(LOG_FLOOR);
            from * (to / from).powf(t)
        } else {
            slide.from + (slide.to - slide.from) * t
        }
    }

    pub(crate) fn set(&mut self, value: f32) {
        self.value = value;
        self.slide = None;
    }

    pub(crate) fn slide_to(&mut self, to: f32, duration: Duration, logarithmic: bool, now: Instant) {
        let from = self.current(now);
        self.value = to;
        self.slide = Some(Slide {
            from,
            to,
            started: now,
            duration,
            logarithmic,
        });
    }
}

/// 无声道信息的流按单声道计
fn block_align(info: &StreamInfo) -> u64 {
    info.channels.max(1) as u64 * BYTES_PER_SAMPLE
}

pub(crate) struct Channel {
    pub path: PathBuf,
    pub flags: u32,
    pub info: StreamInfo,
    /// 总长度（字节）
    pub length: u64,
    pub transport: Transport,
    /// 非播放状态下的位置（字节）
    pub position: u64,
    pub volume: Param,
    pub frequency: Param,
    pub pan: Param,
    /// 频谱采样用的解码器，首次取数据时打开
    pub sampler: Option<StreamDecoder>,
}

impl Channel {
    pub(crate) fn new(path: PathBuf, flags: u32, info: StreamInfo, frames: u64) -> Self {
        Self {
            path,
            flags,
            info,
            length: frames * block_align(&info),
            transport: Transport::Stopped,
            position: 0,
            volume: Param::new(1.0),
            frequency: Param::new(info.sample_rate as f32),
            pan: Param::new(0.0),
            sampler: None,
        }
    }

    /// 每帧字节数
    pub(crate) fn block_align(&self) -> u64 {
        block_align(&self.info)
    }

    pub(crate) fn bytes_per_second(&self) -> f64 {
        self.info.sample_rate as f64 * self.block_align() as f64
    }

    /// 当前位置（字节），播放中按墙钟推进
    pub(crate) fn position_at(&self, now: Instant) -> u64 {
        match self.transport {
            Transport::Playing { since, from } => {
                let elapsed = now.saturating_duration_since(since).as_secs_f64();
                let advanced = (elapsed * self.bytes_per_second()) as u64;
                let pos = from.saturating_add(advanced);
                let pos = pos - pos % self.block_align();
                pos.min(self.length)
            }
            Transport::Stopped | Transport::Paused => self.position,
        }
    }

    /// 播放是否已越过结尾
    pub(crate) fn has_ended(&self, now: Instant) -> bool {
        matches!(self.transport, Transport::Playing { .. }) && self.position_at(now) >= self.length
    }

    pub(crate) fn play(&mut self, restart: bool, now: Instant) {
        if restart {
            self.position = 0;
        } else if let Transport::Playing { .. } = self.transport {
            return;
        }
        self.transport = Transport::Playing {
            since: now,
            from: self.position,
        };
    }

    pub(crate) fn pause(&mut self, now: Instant) {
        self.position = self.position_at(now);
        self.transport = Transport::Paused;
    }

    pub(crate) fn stop(&mut self, now: Instant) {
        self.position = self.position_at(now);
        self.transport = Transport::Stopped;
    }

    pub(crate) fn seek(&mut self, pos: u64, now: Instant) {
        self.position = pos - pos % self.block_align();
        if let Transport::Playing { .. } = self.transport {
            self.transport = Transport::Playing {
                since: now,
                from: self.position,
            };
        }
    }

    pub(crate) fn bytes_to_seconds(&self, pos: u64) -> f64 {
        pos as f64 / self.bytes_per_second()
    }

    pub(crate) fn seconds_to_bytes(&self, secs: f64) -> u64 {
        let frames = (secs * self.info.sample_rate as f64).floor() as u64;
        frames * self.block_align()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(seconds: u64) -> Channel {
        let info = StreamInfo {
            sample_rate: 8000,
            channels: 2,
            n_frames: Some(8000 * seconds),
        };
        Channel::new(PathBuf::from("test.wav"), 0, info, 8000 * seconds)
    }

    #[test]
    fn test_length_in_bytes() {
        let ch = channel(3);
        assert_eq!(ch.length, 3 * 8000 * 4);
        assert_eq!(ch.bytes_to_seconds(ch.length), 3.0);
        assert_eq!(ch.seconds_to_bytes(1.5), 12000 * 4);
    }

    #[test]
    fn test_zero_channel_stream_counts_as_mono() {
        let info = StreamInfo {
            sample_rate: 8000,
            channels: 0,
            n_frames: Some(8000),
        };
        let ch = Channel::new(PathBuf::from("odd.wav"), 0, info, 8000);
        assert_eq!(ch.block_align(), BYTES_PER_SAMPLE);
        assert_eq!(ch.length, 8000 * BYTES_PER_SAMPLE);
        assert_eq!(ch.bytes_to_seconds(ch.length), 1.0);
    }

    #[test]
    fn test_position_advances_only_while_playing() {
        let mut ch = channel(10);
        let t0 = Instant::now();
        assert_eq!(ch.position_at(t0 + Duration::from_secs(1)), 0);

        ch.play(false, t0);
        assert_eq!(ch.position_at(t0 + Duration::from_secs(1)), 32000);

        ch.pause(t0 + Duration::from_secs(2));
        assert_eq!(ch.position_at(t0 + Duration::from_secs(5)), 64000);

        // 继续播放不回到开头
        ch.play(false, t0 + Duration::from_secs(5));
        assert_eq!(ch.position_at(t0 + Duration::from_secs(6)), 96000);
    }

    #[test]
    fn test_playback_ends_at_length() {
        let mut ch = channel(1);
        let t0 = Instant::now();
        ch.play(true, t0);
        assert!(!ch.has_ended(t0));
        assert!(ch.has_ended(t0 + Duration::from_secs(2)));
        assert_eq!(ch.position_at(t0 + Duration::from_secs(2)), ch.length);
    }

    #[test]
    fn test_linear_slide() {
        let mut p = Param::new(1.0);
        let t0 = Instant::now();
        p.slide_to(0.0, Duration::from_millis(100), false, t0);
        let mid = p.current(t0 + Duration::from_millis(50));
        assert!((mid - 0.5).abs() < 1e-3);
        assert_eq!(p.current(t0 + Duration::from_millis(100)), 0.0);
    }

    #[test]
    fn test_log_slide_reaches_target() {
        let mut p = Param::new(1.0);
        let t0 = Instant::now();
        p.slide_to(0.0, Duration::from_millis(100), true, t0);
        let mid = p.current(t0 + Duration::from_millis(50));
        // 对数曲线在中点远低于线性值
        assert!(mid < 0.05);
        assert!(mid > 0.0);
        assert_eq!(p.current(t0 + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_set_cancels_slide() {
        let mut p = Param::new(1.0);
        let t0 = Instant::now();
        p.slide_to(0.0, Duration::from_secs(1), false, t0);
        p.set(0.7);
        assert_eq!(p.current(t0 + Duration::from_millis(500)), 0.7);
    }
}
