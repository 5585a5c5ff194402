//! 原生调用的类型化封装
//!
//! 每个方法执行一次原生调用；失败时读取最近错误码并翻译。不保存状态，不重试。

use std::path::Path;
use std::time::Duration;

use chime_native::{self as native, NativeApi, RawHandle, FFT2048_BINS};
use serde::Serialize;

use crate::{NativeError, NativeErrorKind};

/// 通道播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    /// 缓冲不足而暂停输出
    Stalled,
}

impl PlaybackStatus {
    fn from_active(active: u32) -> Self {
        match active {
            native::ACTIVE_PLAYING => PlaybackStatus::Playing,
            native::ACTIVE_STALLED => PlaybackStatus::Stalled,
            native::ACTIVE_PAUSED | native::ACTIVE_PAUSED_DEVICE => PlaybackStatus::Paused,
            _ => PlaybackStatus::Stopped,
        }
    }
}

/// 可设置的通道属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// 播放采样率（Hz）
    Frequency,
    /// 音量 0.0 ~ 1.0
    Volume,
}

impl Attribute {
    fn code(self) -> u32 {
        match self {
            Attribute::Frequency => native::ATTRIB_FREQ,
            Attribute::Volume => native::ATTRIB_VOL,
        }
    }
}

/// 属性渐变曲线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideCurve {
    Linear,
    Logarithmic,
}

/// 原生库的类型化封装
pub struct Bindings<N> {
    native: N,
}

impl<N: NativeApi> Bindings<N> {
    pub fn new(native: N) -> Self {
        Self { native }
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    fn last_error(&self) -> NativeError {
        NativeError::from_code(self.native.error_get_code())
    }

    fn check(&self, ok: bool) -> Result<(), NativeError> {
        if ok {
            Ok(())
        } else {
            Err(self.last_error())
        }
    }

    fn handle(&self, raw: RawHandle) -> Result<RawHandle, NativeError> {
        if raw == 0 {
            Err(self.last_error())
        } else {
            Ok(raw)
        }
    }

    fn qword(&self, value: u64) -> Result<u64, NativeError> {
        if value == u64::MAX {
            Err(self.last_error())
        } else {
            Ok(value)
        }
    }

    pub fn init(&self, device: i32, frequency: u32, flags: u32) -> Result<(), NativeError> {
        self.check(self.native.init(device, frequency, flags))
    }

    pub fn free(&self) -> Result<(), NativeError> {
        self.check(self.native.free())
    }

    pub fn load_music(&self, path: &Path, flags: u32) -> Result<RawHandle, NativeError> {
        self.handle(self.native.music_load(path, flags))
    }

    pub fn load_stream(&self, path: &Path, flags: u32) -> Result<RawHandle, NativeError> {
        self.handle(self.native.stream_create_file(path, flags))
    }

    pub fn free_music(&self, handle: RawHandle) -> Result<(), NativeError> {
        self.check(self.native.music_free(handle))
    }

    pub fn free_stream(&self, handle: RawHandle) -> Result<(), NativeError> {
        self.check(self.native.stream_free(handle))
    }

    pub fn play(&self, handle: RawHandle, restart: bool) -> Result<(), NativeError> {
        self.check(self.native.channel_play(handle, restart))
    }

    pub fn pause(&self, handle: RawHandle) -> Result<(), NativeError> {
        self.check(self.native.channel_pause(handle))
    }

    pub fn stop(&self, handle: RawHandle) -> Result<(), NativeError> {
        self.check(self.native.channel_stop(handle))
    }

    /// 原生库对无效句柄也返回“已停止”
    pub fn status(&self, handle: RawHandle) -> PlaybackStatus {
        PlaybackStatus::from_active(self.native.channel_is_active(handle))
    }

    /// 总长度（原生字节单位）
    pub fn length(&self, handle: RawHandle) -> Result<u64, NativeError> {
        self.qword(self.native.channel_get_length(handle, native::POS_BYTE))
    }

    pub fn position(&self, handle: RawHandle) -> Result<u64, NativeError> {
        self.qword(self.native.channel_get_position(handle, native::POS_BYTE))
    }

    pub fn set_position(&self, handle: RawHandle, pos: u64) -> Result<(), NativeError> {
        self.check(self.native.channel_set_position(handle, pos, native::POS_BYTE))
    }

    pub fn to_duration(&self, handle: RawHandle, pos: u64) -> Result<Duration, NativeError> {
        let secs = self.native.channel_bytes2seconds(handle, pos);
        if secs < 0.0 || !secs.is_finite() {
            return Err(self.last_error());
        }
        Ok(Duration::from_secs_f64(secs))
    }

    pub fn to_position(&self, handle: RawHandle, time: Duration) -> Result<u64, NativeError> {
        self.qword(self.native.channel_seconds2bytes(handle, time.as_secs_f64()))
    }

    pub fn set_attribute(
        &self,
        handle: RawHandle,
        attrib: Attribute,
        value: f32,
    ) -> Result<(), NativeError> {
        self.check(self.native.channel_set_attribute(handle, attrib.code(), value))
    }

    pub fn attribute(&self, handle: RawHandle, attrib: Attribute) -> Result<f32, NativeError> {
        let mut value = 0.0;
        self.check(self.native.channel_get_attribute(handle, attrib.code(), &mut value))?;
        Ok(value)
    }

    /// 立即返回，渐变由原生库在后台完成
    pub fn slide_attribute(
        &self,
        handle: RawHandle,
        attrib: Attribute,
        value: f32,
        window: Duration,
        curve: SlideCurve,
    ) -> Result<(), NativeError> {
        let code = match curve {
            SlideCurve::Linear => attrib.code(),
            SlideCurve::Logarithmic => attrib.code() | native::SLIDE_LOG,
        };
        let time_ms = u32::try_from(window.as_millis()).unwrap_or(u32::MAX);
        self.check(self.native.channel_slide_attribute(handle, code, value, time_ms))
    }

    /// 读取标签；原生库没有该标签时返回 `None`
    pub fn tag(&self, handle: RawHandle, tags: u32) -> Result<Option<String>, NativeError> {
        match self.native.channel_get_tags(handle, tags) {
            Some(value) => Ok(Some(value)),
            None => {
                let err = self.last_error();
                match err.kind {
                    NativeErrorKind::NotAvailable => Ok(None),
                    _ => Err(err),
                }
            }
        }
    }

    /// 2048 点 FFT 幅度
    pub fn fft2048(&self, handle: RawHandle) -> Result<[f32; FFT2048_BINS], NativeError> {
        let mut bins = [0.0f32; FFT2048_BINS];
        let written = self
            .native
            .channel_get_data(handle, &mut bins, native::DATA_FFT2048);
        if written == u32::MAX {
            return Err(self.last_error());
        }
        Ok(bins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_native::HeadlessBackend;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PlaybackStatus::from_active(native::ACTIVE_STOPPED), PlaybackStatus::Stopped);
        assert_eq!(PlaybackStatus::from_active(native::ACTIVE_PLAYING), PlaybackStatus::Playing);
        assert_eq!(PlaybackStatus::from_active(native::ACTIVE_STALLED), PlaybackStatus::Stalled);
        assert_eq!(PlaybackStatus::from_active(native::ACTIVE_PAUSED), PlaybackStatus::Paused);
        assert_eq!(
            PlaybackStatus::from_active(native::ACTIVE_PAUSED_DEVICE),
            PlaybackStatus::Paused
        );
        assert_eq!(PlaybackStatus::from_active(42), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_failures_are_translated() {
        let bindings = Bindings::new(HeadlessBackend::new());

        let err = bindings.free().unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::NotInitialized);

        bindings.init(-1, 44100, 0).unwrap();
        let err = bindings.init(-1, 44100, 0).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::AlreadyDone);

        let err = bindings.length(0xdead).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::InvalidHandle);
        let err = bindings.to_duration(0xdead, 0).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::InvalidHandle);
        let err = bindings.fft2048(0xdead).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::InvalidHandle);
    }

    #[test]
    fn test_missing_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = Bindings::new(HeadlessBackend::new());
        bindings.init(-1, 44100, 0).unwrap();

        let err = bindings.load_stream(&dir.path().join("gone.ogg"), 0).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::FileOpen);
    }
}
