//! BASS 动态库绑定
//!
//! 运行时加载 bass.dll / libbass.so / libbass.dylib，并在打开时解析全部入口。

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::{NativeApi, RawHandle, DATA_FLOAT, UNICODE};

/// 动态库加载错误
#[derive(thiserror::Error, Debug)]
pub enum LibraryError {
    #[error("Failed to load native library {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Missing native symbol `{name}`: {source}")]
    Symbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

type Bool = c_int;
type Dword = u32;
type Qword = u64;

type InitFn = unsafe extern "system" fn(c_int, Dword, Dword, *mut c_void, *const c_void) -> Bool;
type FreeFn = unsafe extern "system" fn() -> Bool;
type ErrorGetCodeFn = unsafe extern "system" fn() -> c_int;
type MusicLoadFn =
    unsafe extern "system" fn(Bool, *const c_void, Qword, Dword, Dword, Dword) -> Dword;
type StreamCreateFileFn = unsafe extern "system" fn(Bool, *const c_void, Qword, Qword, Dword) -> Dword;
type HandleFn = unsafe extern "system" fn(Dword) -> Bool;
type ChannelPlayFn = unsafe extern "system" fn(Dword, Bool) -> Bool;
type ChannelIsActiveFn = unsafe extern "system" fn(Dword) -> Dword;
type ChannelGetQwordFn = unsafe extern "system" fn(Dword, Dword) -> Qword;
type ChannelSetPositionFn = unsafe extern "system" fn(Dword, Qword, Dword) -> Bool;
type Bytes2SecondsFn = unsafe extern "system" fn(Dword, Qword) -> f64;
type Seconds2BytesFn = unsafe extern "system" fn(Dword, f64) -> Qword;
type SetAttributeFn = unsafe extern "system" fn(Dword, Dword, f32) -> Bool;
type GetAttributeFn = unsafe extern "system" fn(Dword, Dword, *mut f32) -> Bool;
type SlideAttributeFn = unsafe extern "system" fn(Dword, Dword, f32, Dword) -> Bool;
type GetTagsFn = unsafe extern "system" fn(Dword, Dword) -> *const c_char;
type GetDataFn = unsafe extern "system" fn(Dword, *mut c_void, Dword) -> Dword;

struct Symbols {
    init: InitFn,
    free: FreeFn,
    error_get_code: ErrorGetCodeFn,
    music_load: MusicLoadFn,
    music_free: HandleFn,
    stream_create_file: StreamCreateFileFn,
    stream_free: HandleFn,
    channel_play: ChannelPlayFn,
    channel_pause: HandleFn,
    channel_stop: HandleFn,
    channel_is_active: ChannelIsActiveFn,
    channel_get_length: ChannelGetQwordFn,
    channel_get_position: ChannelGetQwordFn,
    channel_set_position: ChannelSetPositionFn,
    channel_bytes2seconds: Bytes2SecondsFn,
    channel_seconds2bytes: Seconds2BytesFn,
    channel_set_attribute: SetAttributeFn,
    channel_get_attribute: GetAttributeFn,
    channel_slide_attribute: SlideAttributeFn,
    channel_get_tags: GetTagsFn,
    channel_get_data: GetDataFn,
}

/// 运行时加载的 BASS
pub struct BassLibrary {
    symbols: Symbols,
    path: PathBuf,
    _lib: Library,
}

#[cfg(target_os = "windows")]
const DEFAULT_LIBRARY: &str = "bass.dll";
#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY: &str = "libbass.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_LIBRARY: &str = "libbass.so";

impl BassLibrary {
    /// 按平台默认库名在系统搜索路径中加载
    pub fn open_default() -> Result<Self, LibraryError> {
        Self::open(DEFAULT_LIBRARY)
    }

    /// 从指定路径加载
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref().to_path_buf();

        // SAFETY: 加载外部动态库会执行其初始化代码，调用方需信任该库。
        let lib = unsafe { Library::new(&path) }.map_err(|source| LibraryError::Load {
            path: path.clone(),
            source,
        })?;

        // SAFETY: 各签名与 bass.h 中的声明一致；函数指针随 `_lib` 一同存活。
        let symbols = unsafe {
            Symbols {
                init: symbol(&lib, "BASS_Init")?,
                free: symbol(&lib, "BASS_Free")?,
                error_get_code: symbol(&lib, "BASS_ErrorGetCode")?,
                music_load: symbol(&lib, "BASS_MusicLoad")?,
                music_free: symbol(&lib, "BASS_MusicFree")?,
                stream_create_file: symbol(&lib, "BASS_StreamCreateFile")?,
                stream_free: symbol(&lib, "BASS_StreamFree")?,
                channel_play: symbol(&lib, "BASS_ChannelPlay")?,
                channel_pause: symbol(&lib, "BASS_ChannelPause")?,
                channel_stop: symbol(&lib, "BASS_ChannelStop")?,
                channel_is_active: symbol(&lib, "BASS_ChannelIsActive")?,
                channel_get_length: symbol(&lib, "BASS_ChannelGetLength")?,
                channel_get_position: symbol(&lib, "BASS_ChannelGetPosition")?,
                channel_set_position: symbol(&lib, "BASS_ChannelSetPosition")?,
                channel_bytes2seconds: symbol(&lib, "BASS_ChannelBytes2Seconds")?,
                channel_seconds2bytes: symbol(&lib, "BASS_ChannelSeconds2Bytes")?,
                channel_set_attribute: symbol(&lib, "BASS_ChannelSetAttribute")?,
                channel_get_attribute: symbol(&lib, "BASS_ChannelGetAttribute")?,
                channel_slide_attribute: symbol(&lib, "BASS_ChannelSlideAttribute")?,
                channel_get_tags: symbol(&lib, "BASS_ChannelGetTags")?,
                channel_get_data: symbol(&lib, "BASS_ChannelGetData")?,
            }
        };

        log::debug!("loaded native audio library from {}", path.display());

        Ok(Self {
            symbols,
            path,
            _lib: lib,
        })
    }

    /// 已加载库的路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, LibraryError> {
    unsafe { lib.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|source| LibraryError::Symbol { name, source })
}

/// 传给原生库的文件名及对应的编码标志
struct NativePath {
    #[cfg(windows)]
    buf: Vec<u16>,
    #[cfg(not(windows))]
    buf: CString,
}

impl NativePath {
    #[cfg(windows)]
    fn new(path: &Path) -> Self {
        use std::os::windows::ffi::OsStrExt;
        let mut buf: Vec<u16> = path.as_os_str().encode_wide().collect();
        buf.push(0);
        Self { buf }
    }

    #[cfg(not(windows))]
    fn new(path: &Path) -> Self {
        use std::os::unix::ffi::OsStrExt;
        // 含内部 NUL 的路径退化为空串，由原生库报告 FILEOPEN
        Self {
            buf: CString::new(path.as_os_str().as_bytes()).unwrap_or_default(),
        }
    }

    fn as_ptr(&self) -> *const c_void {
        self.buf.as_ptr() as *const c_void
    }

    fn flags(&self) -> u32 {
        if cfg!(windows) {
            UNICODE
        } else {
            0
        }
    }
}

/// `channel_get_data` 的 `length` 参数需要的 f32 个数
fn required_floats(length: u32) -> Option<usize> {
    if length & 0x8000_0000 != 0 {
        // 只接受不带附加标志的 FFT 请求：FFT256 .. FFT32768
        match length {
            0x8000_0000..=0x8000_0007 => Some(128usize << (length & 0x7)),
            _ => None,
        }
    } else {
        Some(((length & !DATA_FLOAT) as usize).div_ceil(4))
    }
}

fn to_bool(v: Bool) -> bool {
    v != 0
}

impl NativeApi for BassLibrary {
    fn init(&self, device: i32, freq: u32, flags: u32) -> bool {
        // SAFETY: 窗口句柄与 GUID 允许为空。
        to_bool(unsafe {
            (self.symbols.init)(device, freq, flags, std::ptr::null_mut(), std::ptr::null())
        })
    }

    fn free(&self) -> bool {
        to_bool(unsafe { (self.symbols.free)() })
    }

    fn error_get_code(&self) -> i32 {
        unsafe { (self.symbols.error_get_code)() }
    }

    fn music_load(&self, path: &Path, flags: u32) -> RawHandle {
        let file = NativePath::new(path);
        // SAFETY: `file` 以 NUL 结尾，且在调用期间有效。
        unsafe {
            (self.symbols.music_load)(0, file.as_ptr(), 0, 0, flags | file.flags(), 1)
        }
    }

    fn music_free(&self, handle: RawHandle) -> bool {
        to_bool(unsafe { (self.symbols.music_free)(handle) })
    }

    fn stream_create_file(&self, path: &Path, flags: u32) -> RawHandle {
        let file = NativePath::new(path);
        // SAFETY: 同 `music_load`。
        unsafe { (self.symbols.stream_create_file)(0, file.as_ptr(), 0, 0, flags | file.flags()) }
    }

    fn stream_free(&self, handle: RawHandle) -> bool {
        to_bool(unsafe { (self.symbols.stream_free)(handle) })
    }

    fn channel_play(&self, handle: RawHandle, restart: bool) -> bool {
        to_bool(unsafe { (self.symbols.channel_play)(handle, restart as Bool) })
    }

    fn channel_pause(&self, handle: RawHandle) -> bool {
        to_bool(unsafe { (self.symbols.channel_pause)(handle) })
    }

    fn channel_stop(&self, handle: RawHandle) -> bool {
        to_bool(unsafe { (self.symbols.channel_stop)(handle) })
    }

    fn channel_is_active(&self, handle: RawHandle) -> u32 {
        unsafe { (self.symbols.channel_is_active)(handle) }
    }

    fn channel_get_length(&self, handle: RawHandle, mode: u32) -> u64 {
        unsafe { (self.symbols.channel_get_length)(handle, mode) }
    }

    fn channel_get_position(&self, handle: RawHandle, mode: u32) -> u64 {
        unsafe { (self.symbols.channel_get_position)(handle, mode) }
    }

    fn channel_set_position(&self, handle: RawHandle, pos: u64, mode: u32) -> bool {
        to_bool(unsafe { (self.symbols.channel_set_position)(handle, pos, mode) })
    }

    fn channel_bytes2seconds(&self, handle: RawHandle, pos: u64) -> f64 {
        unsafe { (self.symbols.channel_bytes2seconds)(handle, pos) }
    }

    fn channel_seconds2bytes(&self, handle: RawHandle, secs: f64) -> u64 {
        unsafe { (self.symbols.channel_seconds2bytes)(handle, secs) }
    }

    fn channel_set_attribute(&self, handle: RawHandle, attrib: u32, value: f32) -> bool {
        to_bool(unsafe { (self.symbols.channel_set_attribute)(handle, attrib, value) })
    }

    fn channel_get_attribute(&self, handle: RawHandle, attrib: u32, value: &mut f32) -> bool {
        // SAFETY: `value` 是有效的可写 f32。
        to_bool(unsafe { (self.symbols.channel_get_attribute)(handle, attrib, value as *mut f32) })
    }

    fn channel_slide_attribute(
        &self,
        handle: RawHandle,
        attrib: u32,
        value: f32,
        time_ms: u32,
    ) -> bool {
        to_bool(unsafe { (self.symbols.channel_slide_attribute)(handle, attrib, value, time_ms) })
    }

    fn channel_get_tags(&self, handle: RawHandle, tags: u32) -> Option<String> {
        let ptr = unsafe { (self.symbols.channel_get_tags)(handle, tags) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: `TAG_MUSIC_*` 返回以 NUL 结尾的字符串，在通道释放前有效。
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    fn channel_get_data(&self, handle: RawHandle, buffer: &mut [f32], length: u32) -> u32 {
        match required_floats(length) {
            Some(needed) if needed <= buffer.len() => {}
            _ => {
                log::error!(
                    "get_data request {length:#x} does not fit a buffer of {} floats",
                    buffer.len()
                );
                return u32::MAX;
            }
        }
        // SAFETY: 上面已确认缓冲区足以容纳本次请求写出的数据。
        unsafe {
            (self.symbols.channel_get_data)(handle, buffer.as_mut_ptr() as *mut c_void, length)
        }
    }
}
