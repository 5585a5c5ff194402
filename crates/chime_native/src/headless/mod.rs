//! 无设备后端
//!
//! 在进程内实现 `NativeApi`：不打开输出设备，按墙钟推进播放位置。
//! 普通音频流经 symphonia 探测与解码；tracker module 无渲染器，加载时报告
//! `ERROR_FILEFORM`。错误码与原生库一样按线程保存。

mod channel;
mod decoder;

use std::cell::Cell;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::*;
use channel::{Channel, Transport};
use decoder::{DecoderError, StreamDecoder};

const FFT_SIZE: usize = FFT2048_BINS * 2;

/// 频率属性允许的范围（0 表示恢复原始采样率）
const MIN_FREQUENCY: f32 = 100.0;
const MAX_FREQUENCY: f32 = 100_000.0;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(ERROR_OK) };
}

fn set_error(code: i32) {
    LAST_ERROR.with(|e| e.set(code));
}

/// 以错误码失败
fn fail<T>(code: i32, value: T) -> T {
    set_error(code);
    value
}

fn ok<T>(value: T) -> T {
    set_error(ERROR_OK);
    value
}

#[derive(Debug, Clone, Copy)]
struct Device {
    device: i32,
    freq: u32,
}

#[derive(Default)]
struct State {
    device: Option<Device>,
    channels: HashMap<RawHandle, Channel>,
}

impl State {
    /// 结算播放到结尾的通道：停止，带 AUTOFREE 的直接释放
    fn settle(&mut self, handle: RawHandle, now: Instant) {
        let Some(ch) = self.channels.get_mut(&handle) else {
            return;
        };
        if !ch.has_ended(now) {
            return;
        }
        if ch.flags & STREAM_AUTOFREE != 0 {
            log::debug!("headless channel {handle} reached the end and was freed");
            self.channels.remove(&handle);
        } else {
            ch.stop(now);
        }
    }

    /// 查找通道并设置错误码
    fn channel(&mut self, handle: RawHandle, now: Instant) -> Result<&mut Channel, i32> {
        if self.device.is_none() {
            return Err(ERROR_INIT);
        }
        self.settle(handle, now);
        self.channels.get_mut(&handle).ok_or(ERROR_HANDLE)
    }
}

/// 进程内的无设备原生库实现
pub struct HeadlessBackend {
    state: Mutex<State>,
    next_handle: AtomicU32,
    fft: Arc<dyn Fft<f32>>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);
        Self {
            state: Mutex::new(State::default()),
            // 句柄单调递增，永不复用
            next_handle: AtomicU32::new(0x1000),
            fft,
        }
    }

    /// 当前存活的通道数（含未经上层登记的）
    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// 初始化时使用的设备与频率
    pub fn device(&self) -> Option<(i32, u32)> {
        self.state.lock().device.map(|d| (d.device, d.freq))
    }

    fn with_channel<T>(
        &self,
        handle: RawHandle,
        failed: T,
        f: impl FnOnce(&mut Channel, Instant) -> Result<T, i32>,
    ) -> T {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.channel(handle, now).and_then(|ch| f(ch, now)) {
            Ok(v) => ok(v),
            Err(code) => fail(code, failed),
        }
    }

    fn open_stream(&self, path: &Path, flags: u32) -> Result<Channel, DecoderError> {
        let mut decoder = StreamDecoder::open(path)?;
        // 容器未给出帧数时逐包计数
        let frames = match decoder.info.n_frames {
            Some(n) => n,
            None => decoder.count_frames()?,
        };
        Ok(Channel::new(path.to_path_buf(), flags, decoder.info, frames))
    }

    /// 在锁内取出采样位置与解码器，供锁外解码
    fn checkout_sampler(
        &self,
        handle: RawHandle,
    ) -> Result<(PathBuf, f64, Option<StreamDecoder>), i32> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let ch = state.channel(handle, now)?;
        if ch.transport == Transport::Stopped {
            return Err(ERROR_NOPLAY);
        }
        let seconds = ch.bytes_to_seconds(ch.position_at(now));
        Ok((ch.path.clone(), seconds, ch.sampler.take()))
    }

    fn compute_fft(
        &self,
        sampler: &mut StreamDecoder,
        seconds: f64,
        out: &mut [f32],
    ) -> Result<(), i32> {
        let mono = sampler
            .seek(seconds)
            .and_then(|_| sampler.read_mono(FFT_SIZE))
            .map_err(|e| {
                log::debug!("headless sampler failed: {e}");
                e.native_code()
            })?;
        if mono.is_empty() {
            return Err(ERROR_ENDED);
        }

        let mut buffer: Vec<Complex<f32>> = (0..FFT_SIZE)
            .map(|i| {
                let sample = mono.get(i).copied().unwrap_or(0.0);
                let window = 0.5 * (1.0 - (2.0 * PI * i as f32 / (FFT_SIZE - 1) as f32).cos());
                Complex::new(sample * window, 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        // Hann 窗相干增益 0.5：满幅正弦的峰值归一到约 1.0
        let scale = 4.0 / FFT_SIZE as f32;
        for (dst, bin) in out.iter_mut().zip(buffer.iter().take(FFT2048_BINS)) {
            *dst = (bin.norm() * scale).min(1.0);
        }
        Ok(())
    }
}

impl NativeApi for HeadlessBackend {
    fn init(&self, device: i32, freq: u32, _flags: u32) -> bool {
        let mut state = self.state.lock();
        if state.device.is_some() {
            return fail(ERROR_ALREADY, false);
        }
        if device < -1 {
            return fail(ERROR_DEVICE, false);
        }
        state.device = Some(Device { device, freq });
        ok(true)
    }

    fn free(&self) -> bool {
        let mut state = self.state.lock();
        if state.device.take().is_none() {
            return fail(ERROR_INIT, false);
        }
        state.channels.clear();
        ok(true)
    }

    fn error_get_code(&self) -> i32 {
        LAST_ERROR.with(|e| e.get())
    }

    fn music_load(&self, path: &Path, _flags: u32) -> RawHandle {
        if self.state.lock().device.is_none() {
            return fail(ERROR_INIT, 0);
        }
        if let Err(e) = std::fs::metadata(path) {
            log::debug!("headless music load {}: {e}", path.display());
            return fail(ERROR_FILEOPEN, 0);
        }
        fail(ERROR_FILEFORM, 0)
    }

    fn music_free(&self, _handle: RawHandle) -> bool {
        // 无设备后端不会产生 module 通道
        if self.state.lock().device.is_none() {
            return fail(ERROR_INIT, false);
        }
        fail(ERROR_HANDLE, false)
    }

    fn stream_create_file(&self, path: &Path, flags: u32) -> RawHandle {
        if self.state.lock().device.is_none() {
            return fail(ERROR_INIT, 0);
        }

        // 解码在锁外进行
        let channel = match self.open_stream(path, flags) {
            Ok(ch) => ch,
            Err(e) => {
                log::debug!("headless stream load {}: {e}", path.display());
                return fail(e.native_code(), 0);
            }
        };

        let mut state = self.state.lock();
        if state.device.is_none() {
            return fail(ERROR_INIT, 0);
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        state.channels.insert(handle, channel);
        ok(handle)
    }

    fn stream_free(&self, handle: RawHandle) -> bool {
        let mut state = self.state.lock();
        if state.device.is_none() {
            return fail(ERROR_INIT, false);
        }
        match state.channels.remove(&handle) {
            Some(_) => ok(true),
            None => fail(ERROR_HANDLE, false),
        }
    }

    fn channel_play(&self, handle: RawHandle, restart: bool) -> bool {
        self.with_channel(handle, false, |ch, now| {
            ch.play(restart, now);
            Ok(true)
        })
    }

    fn channel_pause(&self, handle: RawHandle) -> bool {
        self.with_channel(handle, false, |ch, now| match ch.transport {
            Transport::Playing { .. } => {
                ch.pause(now);
                Ok(true)
            }
            Transport::Paused => Err(ERROR_ALREADY),
            Transport::Stopped => Err(ERROR_NOPLAY),
        })
    }

    fn channel_stop(&self, handle: RawHandle) -> bool {
        self.with_channel(handle, false, |ch, now| {
            ch.stop(now);
            Ok(true)
        })
    }

    fn channel_is_active(&self, handle: RawHandle) -> u32 {
        self.with_channel(handle, ACTIVE_STOPPED, |ch, _| {
            Ok(match ch.transport {
                Transport::Playing { .. } => ACTIVE_PLAYING,
                Transport::Paused => ACTIVE_PAUSED,
                Transport::Stopped => ACTIVE_STOPPED,
            })
        })
    }

    fn channel_get_length(&self, handle: RawHandle, mode: u32) -> u64 {
        self.with_channel(handle, u64::MAX, |ch, _| {
            if mode != POS_BYTE {
                return Err(ERROR_NOTAVAIL);
            }
            Ok(ch.length)
        })
    }

    fn channel_get_position(&self, handle: RawHandle, mode: u32) -> u64 {
        self.with_channel(handle, u64::MAX, |ch, now| {
            if mode != POS_BYTE {
                return Err(ERROR_NOTAVAIL);
            }
            Ok(ch.position_at(now))
        })
    }

    fn channel_set_position(&self, handle: RawHandle, pos: u64, mode: u32) -> bool {
        self.with_channel(handle, false, |ch, now| {
            if mode != POS_BYTE {
                return Err(ERROR_NOTAVAIL);
            }
            if pos > ch.length {
                return Err(ERROR_POSITION);
            }
            ch.seek(pos, now);
            Ok(true)
        })
    }

    fn channel_bytes2seconds(&self, handle: RawHandle, pos: u64) -> f64 {
        self.with_channel(handle, -1.0, |ch, _| Ok(ch.bytes_to_seconds(pos)))
    }

    fn channel_seconds2bytes(&self, handle: RawHandle, secs: f64) -> u64 {
        self.with_channel(handle, u64::MAX, |ch, _| {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ERROR_ILLPARAM);
            }
            Ok(ch.seconds_to_bytes(secs))
        })
    }

    fn channel_set_attribute(&self, handle: RawHandle, attrib: u32, value: f32) -> bool {
        self.with_channel(handle, false, |ch, _| {
            match attrib {
                ATTRIB_VOL if value >= 0.0 => ch.volume.set(value),
                ATTRIB_FREQ if value == 0.0 => ch.frequency.set(ch.info.sample_rate as f32),
                ATTRIB_FREQ if (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&value) => {
                    ch.frequency.set(value)
                }
                ATTRIB_PAN if (-1.0..=1.0).contains(&value) => ch.pan.set(value),
                ATTRIB_VOL | ATTRIB_FREQ | ATTRIB_PAN => return Err(ERROR_ILLPARAM),
                _ => return Err(ERROR_ILLTYPE),
            }
            Ok(true)
        })
    }

    fn channel_get_attribute(&self, handle: RawHandle, attrib: u32, value: &mut f32) -> bool {
        self.with_channel(handle, false, |ch, now| {
            *value = match attrib {
                ATTRIB_VOL => ch.volume.current(now),
                ATTRIB_FREQ => ch.frequency.current(now),
                ATTRIB_PAN => ch.pan.current(now),
                _ => return Err(ERROR_ILLTYPE),
            };
            Ok(true)
        })
    }

    fn channel_slide_attribute(
        &self,
        handle: RawHandle,
        attrib: u32,
        value: f32,
        time_ms: u32,
    ) -> bool {
        let logarithmic = attrib & SLIDE_LOG != 0;
        let attrib = attrib & !SLIDE_LOG;
        let duration = Duration::from_millis(time_ms as u64);

        self.with_channel(handle, false, |ch, now| {
            match attrib {
                ATTRIB_VOL if value >= 0.0 => ch.volume.slide_to(value, duration, logarithmic, now),
                ATTRIB_FREQ if value == 0.0 => {
                    let original = ch.info.sample_rate as f32;
                    ch.frequency.slide_to(original, duration, logarithmic, now)
                }
                ATTRIB_FREQ if (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&value) => {
                    ch.frequency.slide_to(value, duration, logarithmic, now)
                }
                ATTRIB_PAN if (-1.0..=1.0).contains(&value) => {
                    ch.pan.slide_to(value, duration, logarithmic, now)
                }
                ATTRIB_VOL | ATTRIB_FREQ | ATTRIB_PAN => return Err(ERROR_ILLPARAM),
                _ => return Err(ERROR_ILLTYPE),
            }
            Ok(true)
        })
    }

    fn channel_get_tags(&self, handle: RawHandle, _tags: u32) -> Option<String> {
        // 普通音频流没有 module 标签
        self.with_channel(handle, None, |_, _| Err(ERROR_NOTAVAIL))
    }

    fn channel_get_data(&self, handle: RawHandle, buffer: &mut [f32], length: u32) -> u32 {
        if length != DATA_FFT2048 {
            return self.with_channel(handle, u32::MAX, |_, _| Err(ERROR_ILLTYPE));
        }
        if buffer.len() < FFT2048_BINS {
            return fail(ERROR_ILLPARAM, u32::MAX);
        }

        let (path, seconds, sampler) = match self.checkout_sampler(handle) {
            Ok(checkout) => checkout,
            Err(code) => return fail(code, u32::MAX),
        };

        // 打开与解码都不持有后端锁
        let mut sampler = match sampler {
            Some(sampler) => sampler,
            None => match StreamDecoder::open(&path) {
                Ok(sampler) => sampler,
                Err(e) => return fail(e.native_code(), u32::MAX),
            },
        };
        let result = self.compute_fft(&mut sampler, seconds, buffer);

        // 通道期间被释放时直接丢弃解码器
        if let Some(ch) = self.state.lock().channels.get_mut(&handle) {
            ch.sampler = Some(sampler);
        }

        match result {
            Ok(()) => ok((FFT2048_BINS * std::mem::size_of::<f32>()) as u32),
            Err(code) => fail(code, u32::MAX),
        }
    }
}
