//! chime_engine - 音频引擎
//!
//! 在原生音频库之上提供线程安全的曲目管理：加载（module / 音频流互为回退）、
//! 播放控制、位置与音量、停止淡出以及频谱采样。

mod binding;
mod config;
mod engine;
mod error;
mod spectrum;
mod table;

pub use binding::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use spectrum::*;
pub use table::{TrackHandle, TrackInfo};

pub use chime_native::{BassLibrary, HeadlessBackend, LibraryError, NativeApi};
pub use chime_tags::{MetadataExtractor, SymphoniaExtractor, TagError, TrackMetadata};

/// 每帧频谱的幅度个数
pub const FFT_BINS: usize = chime_native::FFT2048_BINS;

/// 使用动态加载的原生库
pub type BassEngine = AudioEngine<BassLibrary>;

/// 无输出设备，用于测试与离线环境
pub type HeadlessEngine = AudioEngine<HeadlessBackend>;
