//! 基于 symphonia 的元数据提取

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Value as MetaValue};
use symphonia::core::probe::Hint;

use crate::{MetadataExtractor, TagError, TrackMetadata};

/// 默认提取器
///
/// 尽力而为：symphonia 无法识别的文件（例如 tracker module）返回空元数据，
/// 只有路径本身的问题才报错。
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaExtractor;

impl MetadataExtractor for SymphoniaExtractor {
    fn extract(&self, path: &Path) -> Result<TrackMetadata, TagError> {
        if path.as_os_str().is_empty() {
            return Err(TagError::InvalidPath(path.to_path_buf()));
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TagError::FileNotFound(path.to_path_buf()));
            }
            Err(_) => return Err(TagError::InvalidPath(path.to_path_buf())),
        };
        if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
            return Err(TagError::InvalidPath(path.to_path_buf()));
        }

        Ok(read_tags(path, file).unwrap_or_default())
    }
}

fn read_tags(path: &Path, file: File) -> Option<TrackMetadata> {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let mut meta = TrackMetadata::default();

    if let Some(t) = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    {
        meta.codec = Some(format!("{:?}", t.codec_params.codec));
        meta.sample_rate = t.codec_params.sample_rate;
        meta.channels = t.codec_params.channels.map(|c| c.count() as u16);
        if let (Some(frames), Some(sr)) = (t.codec_params.n_frames, t.codec_params.sample_rate) {
            meta.duration = Some(Duration::from_secs_f64(frames as f64 / sr as f64));
        }
    }

    // 容器内与探测阶段（如 ID3v2）的两处标签都要看
    let container = probed.format.metadata().current().cloned();
    let probe_level = probed.metadata.get().and_then(|m| m.current().cloned());

    for revision in [container, probe_level].into_iter().flatten() {
        for tag in revision.tags() {
            let Some(val) = tag_text(&tag.value) else {
                continue;
            };
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => {
                    meta.title.get_or_insert(val);
                }
                Some(StandardTagKey::Artist) => {
                    meta.artist.get_or_insert(val);
                }
                Some(StandardTagKey::Album) => {
                    meta.album.get_or_insert(val);
                }
                Some(StandardTagKey::AlbumArtist) => {
                    meta.album_artist.get_or_insert(val);
                }
                Some(StandardTagKey::Genre) => {
                    meta.genre.get_or_insert(val);
                }
                Some(StandardTagKey::Comment) => {
                    meta.comment.get_or_insert(val);
                }
                Some(StandardTagKey::TrackNumber) => {
                    meta.track = meta.track.or_else(|| parse_leading_number(&val));
                }
                Some(StandardTagKey::DiscNumber) => {
                    meta.disc = meta.disc.or_else(|| parse_leading_number(&val));
                }
                Some(StandardTagKey::Date) => {
                    meta.year = meta.year.or_else(|| parse_leading_number(&val));
                }
                _ => {}
            }
        }
    }

    Some(meta)
}

/// "2024-01-01" / "3/12" 之类只取开头的数字
fn parse_leading_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// 标签的文本形式；二进制、无值标志与空白字符串视为缺失
fn tag_text(value: &MetaValue) -> Option<String> {
    let text = match value {
        MetaValue::String(s) => s.trim().to_string(),
        MetaValue::UnsignedInt(u) => u.to_string(),
        MetaValue::SignedInt(i) => i.to_string(),
        MetaValue::Float(f) => f.to_string(),
        MetaValue::Boolean(b) => b.to_string(),
        MetaValue::Binary(_) | MetaValue::Flag => return None,
    };
    (!text.is_empty()).then_some(text)
}
