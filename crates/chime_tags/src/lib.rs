//! chime_tags - 曲目元数据
//!
//! 定义引擎使用的元数据提取接口，并提供基于 symphonia 的默认实现。

mod symphonia_extractor;

pub use symphonia_extractor::*;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

/// 元数据提取错误
#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),
}

/// 曲目元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub track: Option<u32>,
    pub disc: Option<u32>,
    pub year: Option<i32>,
    pub comment: Option<String>,
    pub duration: Option<Duration>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub codec: Option<String>,
}

impl TrackMetadata {
    /// 显示用标题：无标签时退回文件名
    pub fn display_title(&self, path: &Path) -> String {
        self.title.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// 元数据提取器
///
/// 只读取文件，不与播放引擎交互。
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<TrackMetadata, TagError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_falls_back_to_file_stem() {
        let meta = TrackMetadata::default();
        assert_eq!(meta.display_title(Path::new("/music/space_debris.mod")), "space_debris");

        let meta = TrackMetadata {
            title: Some("Space Debris".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.display_title(Path::new("/music/x.mod")), "Space Debris");
    }

    #[test]
    fn test_error_display() {
        let err = TagError::FileNotFound(PathBuf::from("gone.xm"));
        assert!(err.to_string().contains("gone.xm"));
    }
}
