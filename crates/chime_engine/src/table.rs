//! 曲目句柄表

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chime_native::RawHandle;
use serde::Serialize;

/// 曲目句柄
///
/// 沿用原生库分配的通道句柄，原生库保证不复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TrackHandle(RawHandle);

impl TrackHandle {
    pub(crate) fn new(raw: RawHandle) -> Self {
        Self(raw)
    }

    /// 原始数值，供日志或界面层比对
    pub fn raw(self) -> RawHandle {
        self.0
    }
}

impl fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

/// 已加载曲目在原生库中的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrackEntry {
    pub native_handle: RawHandle,
    pub file_path: PathBuf,
    /// 以 tracker module 方式加载，决定释放函数
    pub is_module: bool,
}

/// 已加载曲目的诊断信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub handle: TrackHandle,
    pub path: PathBuf,
    pub is_module: bool,
}

/// 句柄到原生通道的映射，由引擎的读写锁保护
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    entries: HashMap<TrackHandle, TrackEntry>,
}

impl HandleTable {
    pub fn insert(&mut self, handle: TrackHandle, entry: TrackEntry) {
        if self.entries.insert(handle, entry).is_some() {
            // 原生库复用了句柄，旧记录已失效
            log::warn!("native library reused handle {handle}");
        }
    }

    pub fn get(&self, handle: TrackHandle) -> Option<&TrackEntry> {
        self.entries.get(&handle)
    }

    pub fn remove(&mut self, handle: TrackHandle) -> Option<TrackEntry> {
        self.entries.remove(&handle)
    }

    /// 取出全部记录，表变为空
    pub fn drain(&mut self) -> Vec<(TrackHandle, TrackEntry)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按句柄排序的快照
    pub fn snapshot(&self) -> Vec<TrackInfo> {
        let mut tracks: Vec<TrackInfo> = self
            .entries
            .iter()
            .map(|(&handle, entry)| TrackInfo {
                handle,
                path: entry.file_path.clone(),
                is_module: entry.is_module,
            })
            .collect();
        tracks.sort_by_key(|t| t.handle);
        tracks
    }
}
