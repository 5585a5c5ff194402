//! chime_native - 原生音频库 ABI
//!
//! 以 BASS 风格的 C ABI 描述原生音频库：`NativeApi` 的每个方法对应一个原生入口，
//! 返回值保持原生约定（失败时返回 0 / `u64::MAX` / 负数，错误码通过
//! `error_get_code` 读取）。类型化与错误翻译由上层完成。

mod bass;
mod headless;

pub use bass::*;
pub use headless::*;

use std::path::Path;

/// 原生通道句柄（HMUSIC / HSTREAM / HCHANNEL）
pub type RawHandle = u32;

// ============================================================================
// 错误码
// ============================================================================

pub const ERROR_OK: i32 = 0;
pub const ERROR_MEM: i32 = 1;
pub const ERROR_FILEOPEN: i32 = 2;
pub const ERROR_DRIVER: i32 = 3;
pub const ERROR_BUFLOST: i32 = 4;
pub const ERROR_HANDLE: i32 = 5;
pub const ERROR_FORMAT: i32 = 6;
pub const ERROR_POSITION: i32 = 7;
pub const ERROR_INIT: i32 = 8;
pub const ERROR_START: i32 = 9;
pub const ERROR_SSL: i32 = 10;
pub const ERROR_REINIT: i32 = 11;
pub const ERROR_ALREADY: i32 = 14;
pub const ERROR_NOTAUDIO: i32 = 17;
pub const ERROR_NOCHAN: i32 = 18;
pub const ERROR_ILLTYPE: i32 = 19;
pub const ERROR_ILLPARAM: i32 = 20;
pub const ERROR_NO3D: i32 = 21;
pub const ERROR_NOEAX: i32 = 22;
pub const ERROR_DEVICE: i32 = 23;
pub const ERROR_NOPLAY: i32 = 24;
pub const ERROR_FREQ: i32 = 25;
pub const ERROR_NOTFILE: i32 = 27;
pub const ERROR_NOHW: i32 = 29;
pub const ERROR_EMPTY: i32 = 31;
pub const ERROR_NONET: i32 = 32;
pub const ERROR_CREATE: i32 = 33;
pub const ERROR_NOFX: i32 = 34;
pub const ERROR_NOTAVAIL: i32 = 37;
pub const ERROR_DECODE: i32 = 38;
pub const ERROR_DX: i32 = 39;
pub const ERROR_TIMEOUT: i32 = 40;
pub const ERROR_FILEFORM: i32 = 41;
pub const ERROR_SPEAKER: i32 = 42;
pub const ERROR_VERSION: i32 = 43;
pub const ERROR_CODEC: i32 = 44;
pub const ERROR_ENDED: i32 = 45;
pub const ERROR_BUSY: i32 = 46;
pub const ERROR_UNSTREAMABLE: i32 = 47;
pub const ERROR_PROTOCOL: i32 = 48;
pub const ERROR_DENIED: i32 = 49;
pub const ERROR_UNKNOWN: i32 = -1;

// ============================================================================
// 加载标志
// ============================================================================

pub const SAMPLE_FLOAT: u32 = 0x100;
pub const STREAM_PRESCAN: u32 = 0x20000;
pub const STREAM_AUTOFREE: u32 = 0x40000;
pub const MUSIC_RAMP: u32 = 0x200;
pub const MUSIC_RAMPS: u32 = 0x400;
pub const MUSIC_POSRESET: u32 = 0x8000;
pub const MUSIC_PRESCAN: u32 = STREAM_PRESCAN;
pub const MUSIC_AUTOFREE: u32 = STREAM_AUTOFREE;
pub const UNICODE: u32 = 0x8000_0000;

// ============================================================================
// 通道状态 / 属性 / 数据
// ============================================================================

pub const ACTIVE_STOPPED: u32 = 0;
pub const ACTIVE_PLAYING: u32 = 1;
pub const ACTIVE_STALLED: u32 = 2;
pub const ACTIVE_PAUSED: u32 = 3;
pub const ACTIVE_PAUSED_DEVICE: u32 = 4;

pub const ATTRIB_FREQ: u32 = 1;
pub const ATTRIB_VOL: u32 = 2;
pub const ATTRIB_PAN: u32 = 3;
/// 与属性按位或，使滑动按对数曲线进行
pub const SLIDE_LOG: u32 = 0x0100_0000;

pub const POS_BYTE: u32 = 0;

/// 2048 点 FFT，返回 1024 个 f32
pub const DATA_FFT2048: u32 = 0x8000_0003;
pub const DATA_FLOAT: u32 = 0x4000_0000;

pub const TAG_MUSIC_NAME: u32 = 0x10000;
pub const TAG_MUSIC_MESSAGE: u32 = 0x10001;
pub const TAG_MUSIC_AUTH: u32 = 0x10004;

/// `DATA_FFT2048` 写出的 f32 个数
pub const FFT2048_BINS: usize = 1024;

/// 原生音频库 ABI
///
/// 实现方为进程级单例：同一时刻只应有一个已初始化的调用方。
/// 除 `error_get_code` 外，每个失败的调用都会更新“最近错误码”。
pub trait NativeApi: Send + Sync {
    fn init(&self, device: i32, freq: u32, flags: u32) -> bool;
    fn free(&self) -> bool;
    fn error_get_code(&self) -> i32;

    /// 以 tracker module 方式加载，失败返回 0
    fn music_load(&self, path: &Path, flags: u32) -> RawHandle;
    fn music_free(&self, handle: RawHandle) -> bool;
    /// 以普通音频流方式加载，失败返回 0
    fn stream_create_file(&self, path: &Path, flags: u32) -> RawHandle;
    fn stream_free(&self, handle: RawHandle) -> bool;

    fn channel_play(&self, handle: RawHandle, restart: bool) -> bool;
    fn channel_pause(&self, handle: RawHandle) -> bool;
    fn channel_stop(&self, handle: RawHandle) -> bool;
    /// 返回 `ACTIVE_*`，句柄无效时返回 `ACTIVE_STOPPED`
    fn channel_is_active(&self, handle: RawHandle) -> u32;

    /// 失败返回 `u64::MAX`
    fn channel_get_length(&self, handle: RawHandle, mode: u32) -> u64;
    /// 失败返回 `u64::MAX`
    fn channel_get_position(&self, handle: RawHandle, mode: u32) -> u64;
    fn channel_set_position(&self, handle: RawHandle, pos: u64, mode: u32) -> bool;
    /// 失败返回负数
    fn channel_bytes2seconds(&self, handle: RawHandle, pos: u64) -> f64;
    /// 失败返回 `u64::MAX`
    fn channel_seconds2bytes(&self, handle: RawHandle, secs: f64) -> u64;

    fn channel_set_attribute(&self, handle: RawHandle, attrib: u32, value: f32) -> bool;
    fn channel_get_attribute(&self, handle: RawHandle, attrib: u32, value: &mut f32) -> bool;
    /// 立即返回，由原生库在 `time_ms` 内完成渐变
    fn channel_slide_attribute(&self, handle: RawHandle, attrib: u32, value: f32, time_ms: u32)
        -> bool;

    /// 单字符串标签（`TAG_MUSIC_*`），不可用时返回 `None`
    fn channel_get_tags(&self, handle: RawHandle, tags: u32) -> Option<String>;
    /// 写入 `buffer`，返回写入字节数，失败返回 `u32::MAX`
    fn channel_get_data(&self, handle: RawHandle, buffer: &mut [f32], length: u32) -> u32;
}

impl<T: NativeApi + ?Sized> NativeApi for std::sync::Arc<T> {
    fn init(&self, device: i32, freq: u32, flags: u32) -> bool {
        (**self).init(device, freq, flags)
    }

    fn free(&self) -> bool {
        (**self).free()
    }

    fn error_get_code(&self) -> i32 {
        (**self).error_get_code()
    }

    fn music_load(&self, path: &Path, flags: u32) -> RawHandle {
        (**self).music_load(path, flags)
    }

    fn music_free(&self, handle: RawHandle) -> bool {
        (**self).music_free(handle)
    }

    fn stream_create_file(&self, path: &Path, flags: u32) -> RawHandle {
        (**self).stream_create_file(path, flags)
    }

    fn stream_free(&self, handle: RawHandle) -> bool {
        (**self).stream_free(handle)
    }

    fn channel_play(&self, handle: RawHandle, restart: bool) -> bool {
        (**self).channel_play(handle, restart)
    }

    fn channel_pause(&self, handle: RawHandle) -> bool {
        (**self).channel_pause(handle)
    }

    fn channel_stop(&self, handle: RawHandle) -> bool {
        (**self).channel_stop(handle)
    }

    fn channel_is_active(&self, handle: RawHandle) -> u32 {
        (**self).channel_is_active(handle)
    }

    fn channel_get_length(&self, handle: RawHandle, mode: u32) -> u64 {
        (**self).channel_get_length(handle, mode)
    }

    fn channel_get_position(&self, handle: RawHandle, mode: u32) -> u64 {
        (**self).channel_get_position(handle, mode)
    }

    fn channel_set_position(&self, handle: RawHandle, pos: u64, mode: u32) -> bool {
        (**self).channel_set_position(handle, pos, mode)
    }

    fn channel_bytes2seconds(&self, handle: RawHandle, pos: u64) -> f64 {
        (**self).channel_bytes2seconds(handle, pos)
    }

    fn channel_seconds2bytes(&self, handle: RawHandle, secs: f64) -> u64 {
        (**self).channel_seconds2bytes(handle, secs)
    }

    fn channel_set_attribute(&self, handle: RawHandle, attrib: u32, value: f32) -> bool {
        (**self).channel_set_attribute(handle, attrib, value)
    }

    fn channel_get_attribute(&self, handle: RawHandle, attrib: u32, value: &mut f32) -> bool {
        (**self).channel_get_attribute(handle, attrib, value)
    }

    fn channel_slide_attribute(
        &self,
        handle: RawHandle,
        attrib: u32,
        value: f32,
        time_ms: u32,
    ) -> bool {
        (**self).channel_slide_attribute(handle, attrib, value, time_ms)
    }

    fn channel_get_tags(&self, handle: RawHandle, tags: u32) -> Option<String> {
        (**self).channel_get_tags(handle, tags)
    }

    fn channel_get_data(&self, handle: RawHandle, buffer: &mut [f32], length: u32) -> u32 {
        (**self).channel_get_data(handle, buffer, length)
    }
}
