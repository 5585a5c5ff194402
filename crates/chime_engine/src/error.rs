//! 错误类型与原生错误码翻译

use std::path::PathBuf;
use std::time::Duration;

use chime_native as native;

use crate::TrackHandle;

/// 原生错误的稳定分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeErrorKind {
    OutOfMemory,
    FileOpen,
    Driver,
    BufferLost,
    InvalidHandle,
    UnsupportedSampleFormat,
    InvalidPosition,
    NotInitialized,
    StartFailed,
    Ssl,
    Reinitialized,
    AlreadyDone,
    NotAudio,
    NoFreeChannel,
    IllegalType,
    IllegalParameter,
    No3d,
    NoEax,
    InvalidDevice,
    NotPlaying,
    InvalidSampleRate,
    NotAFile,
    NoHardwareVoice,
    EmptyFile,
    NoInternet,
    CreateFailed,
    EffectsUnavailable,
    NotAvailable,
    NotDecodingChannel,
    DirectXVersion,
    Timeout,
    UnsupportedFileFormat,
    SpeakerUnavailable,
    InvalidVersion,
    CodecUnavailable,
    Ended,
    DeviceBusy,
    Unstreamable,
    UnsupportedProtocol,
    AccessDenied,
    Unknown,
}

/// 错误码翻译表
const ERROR_TABLE: &[(i32, NativeErrorKind, &str)] = &[
    (native::ERROR_MEM, NativeErrorKind::OutOfMemory, "memory error"),
    (native::ERROR_FILEOPEN, NativeErrorKind::FileOpen, "can't open the file"),
    (native::ERROR_DRIVER, NativeErrorKind::Driver, "can't find a free or valid driver"),
    (native::ERROR_BUFLOST, NativeErrorKind::BufferLost, "the sample buffer was lost"),
    (native::ERROR_HANDLE, NativeErrorKind::InvalidHandle, "invalid handle"),
    (native::ERROR_FORMAT, NativeErrorKind::UnsupportedSampleFormat, "unsupported sample format"),
    (native::ERROR_POSITION, NativeErrorKind::InvalidPosition, "invalid position"),
    (native::ERROR_INIT, NativeErrorKind::NotInitialized, "init has not been successfully called"),
    (native::ERROR_START, NativeErrorKind::StartFailed, "output could not be started"),
    (native::ERROR_SSL, NativeErrorKind::Ssl, "SSL/HTTPS support isn't available"),
    (native::ERROR_REINIT, NativeErrorKind::Reinitialized, "device needs to be reinitialized"),
    (native::ERROR_ALREADY, NativeErrorKind::AlreadyDone, "already initialized/paused/whatever"),
    (native::ERROR_NOTAUDIO, NativeErrorKind::NotAudio, "file does not contain audio"),
    (native::ERROR_NOCHAN, NativeErrorKind::NoFreeChannel, "can't get a free channel"),
    (native::ERROR_ILLTYPE, NativeErrorKind::IllegalType, "an illegal type was specified"),
    (native::ERROR_ILLPARAM, NativeErrorKind::IllegalParameter, "an illegal parameter was specified"),
    (native::ERROR_NO3D, NativeErrorKind::No3d, "no 3D support"),
    (native::ERROR_NOEAX, NativeErrorKind::NoEax, "no EAX support"),
    (native::ERROR_DEVICE, NativeErrorKind::InvalidDevice, "illegal device number"),
    (native::ERROR_NOPLAY, NativeErrorKind::NotPlaying, "not playing"),
    (native::ERROR_FREQ, NativeErrorKind::InvalidSampleRate, "illegal sample rate"),
    (native::ERROR_NOTFILE, NativeErrorKind::NotAFile, "the stream is not a file stream"),
    (native::ERROR_NOHW, NativeErrorKind::NoHardwareVoice, "no hardware voices available"),
    (native::ERROR_EMPTY, NativeErrorKind::EmptyFile, "the file has no sample data"),
    (native::ERROR_NONET, NativeErrorKind::NoInternet, "no internet connection could be opened"),
    (native::ERROR_CREATE, NativeErrorKind::CreateFailed, "couldn't create the file"),
    (native::ERROR_NOFX, NativeErrorKind::EffectsUnavailable, "effects are not available"),
    (native::ERROR_NOTAVAIL, NativeErrorKind::NotAvailable, "requested data/action is not available"),
    (native::ERROR_DECODE, NativeErrorKind::NotDecodingChannel, "the channel is/isn't a decoding channel"),
    (native::ERROR_DX, NativeErrorKind::DirectXVersion, "a sufficient DirectX version is not installed"),
    (native::ERROR_TIMEOUT, NativeErrorKind::Timeout, "connection timed out"),
    (native::ERROR_FILEFORM, NativeErrorKind::UnsupportedFileFormat, "unsupported file format"),
    (native::ERROR_SPEAKER, NativeErrorKind::SpeakerUnavailable, "unavailable speaker"),
    (native::ERROR_VERSION, NativeErrorKind::InvalidVersion, "invalid library version"),
    (native::ERROR_CODEC, NativeErrorKind::CodecUnavailable, "codec is not available/supported"),
    (native::ERROR_ENDED, NativeErrorKind::Ended, "the channel/file has ended"),
    (native::ERROR_BUSY, NativeErrorKind::DeviceBusy, "the device is busy"),
    (native::ERROR_UNSTREAMABLE, NativeErrorKind::Unstreamable, "unstreamable file"),
    (native::ERROR_PROTOCOL, NativeErrorKind::UnsupportedProtocol, "unsupported protocol"),
    (native::ERROR_DENIED, NativeErrorKind::AccessDenied, "access denied"),
];

/// 翻译后的原生错误
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct NativeError {
    pub code: i32,
    pub kind: NativeErrorKind,
    pub message: &'static str,
}

impl NativeError {
    /// 按翻译表查找；未登记的错误码归为 `Unknown` 并保留原始值
    pub fn from_code(code: i32) -> Self {
        ERROR_TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|&(code, kind, message)| Self {
                code,
                kind,
                message,
            })
            .unwrap_or(Self {
                code,
                kind: NativeErrorKind::Unknown,
                message: "unknown native error",
            })
    }
}

/// 引擎错误
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Audio engine is not initialized")]
    NotInitialized,

    #[error("Audio engine is already initialized")]
    AlreadyInitialized,

    #[error("Invalid file path: {0:?}")]
    InvalidFilePath(PathBuf),

    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("Invalid track handle: {0}")]
    InvalidTrackHandle(TrackHandle),

    #[error("Invalid volume: {0}")]
    InvalidVolume(f32),

    #[error("Invalid position: {0:?}")]
    InvalidPosition(Duration),

    #[error("FFT data unavailable")]
    FftDataUnavailable,

    #[error("Native error: {0}")]
    Native(#[from] NativeError),
}

impl EngineError {
    /// 原生错误码（仅 `Native`）
    pub fn native_code(&self) -> Option<i32> {
        match self {
            EngineError::Native(e) => Some(e.code),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
