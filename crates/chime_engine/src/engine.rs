//! 音频引擎
//!
//! 管理原生库的初始化与已加载曲目的句柄表。所有方法同步执行，不创建线程；
//! 界面层按需轮询状态、位置与频谱。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chime_native::{self as native, NativeApi};
use chime_tags::{MetadataExtractor, SymphoniaExtractor, TagError, TrackMetadata};
use parking_lot::RwLock;

use crate::table::{HandleTable, TrackEntry};
use crate::*;

/// 按扩展名优先尝试 tracker module 加载
const MODULE_EXTENSIONS: &[&str] = &["mod", "mo3", "xm", "it", "s3m", "mtm", "umx"];

const MODULE_FLAGS: u32 =
    native::MUSIC_PRESCAN | native::MUSIC_RAMPS | native::MUSIC_AUTOFREE | native::MUSIC_POSRESET;
const STREAM_FLAGS: u32 = native::STREAM_PRESCAN | native::STREAM_AUTOFREE;

fn is_module_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| MODULE_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
}

/// 初始化状态与句柄表，由同一把锁保护
#[derive(Default)]
struct EngineState {
    /// `Some` 即已初始化
    config: Option<EngineConfig>,
    tracks: HandleTable,
}

impl EngineState {
    fn ensure_initialized(&self) -> EngineResult<()> {
        if self.config.is_none() {
            return Err(EngineError::NotInitialized);
        }
        Ok(())
    }

    fn entry(&self, handle: TrackHandle) -> EngineResult<&TrackEntry> {
        self.ensure_initialized()?;
        self.tracks
            .get(handle)
            .ok_or(EngineError::InvalidTrackHandle(handle))
    }
}

/// 音频引擎
///
/// 原生库是进程级单例：同一进程内同一时刻只能有一个已初始化的引擎。
/// 这一约束不由类型保证，由调用方负责。
///
/// 结构性操作（初始化、关闭、加载、卸载、停止）持有写锁；查询、播放、暂停、
/// 跳转与音量持有读锁，只改变原生通道状态，不改变句柄表。
pub struct AudioEngine<N: NativeApi> {
    bindings: Bindings<N>,
    state: RwLock<EngineState>,
    extractor: Arc<dyn MetadataExtractor>,
    fade: FadeOut,
}

impl<N: NativeApi> AudioEngine<N> {
    pub fn new(native: N) -> Self {
        Self::with_extractor(native, Arc::new(SymphoniaExtractor))
    }

    pub fn with_extractor(native: N, extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self {
            bindings: Bindings::new(native),
            state: RwLock::new(EngineState::default()),
            extractor,
            fade: FadeOut::default(),
        }
    }

    /// 替换停止时的淡出参数
    pub fn with_fade_out(mut self, fade: FadeOut) -> Self {
        self.fade = fade;
        self
    }

    /// 底层原生库
    pub fn native(&self) -> &N {
        self.bindings.native()
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    pub fn initialize(&self, device: i32, frequency: u32, flags: u32) -> EngineResult<()> {
        self.initialize_with(EngineConfig::new(device, frequency, flags))
    }

    pub fn initialize_with(&self, config: EngineConfig) -> EngineResult<()> {
        let mut state = self.state.write();
        if state.config.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }

        self.bindings
            .init(config.device, config.frequency, config.flags)?;
        state.config = Some(config);

        log::info!(
            "audio engine initialized: device={}, frequency={}, flags={:#x}",
            config.device,
            config.frequency,
            config.flags
        );
        Ok(())
    }

    /// 释放全部曲目与原生库
    ///
    /// 单个曲目的释放失败只记录日志；原生库释放失败时状态仍会被清空，
    /// 并返回该错误。
    pub fn shutdown(&self) -> EngineResult<()> {
        let mut state = self.state.write();
        state.ensure_initialized()?;

        for (handle, entry) in state.tracks.drain() {
            if let Err(e) = self.release(&entry) {
                log::warn!("failed to release track {handle} during shutdown: {e}");
            }
        }

        debug_assert!(state.tracks.is_empty());

        let freed = self.bindings.free();
        state.config = None;

        match &freed {
            Ok(()) => log::info!("audio engine shut down"),
            Err(e) => log::warn!("native free failed during shutdown: {e}"),
        }
        freed.map_err(Into::into)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().config.is_some()
    }

    /// 初始化时使用的配置
    pub fn config(&self) -> Option<EngineConfig> {
        self.state.read().config
    }

    // ========================================================================
    // 加载与卸载
    // ========================================================================

    /// 加载曲目
    ///
    /// 按扩展名选择首选加载方式；失败后换另一种方式重试一次，
    /// 两次都失败时返回第二次的错误。
    pub fn load(&self, path: impl AsRef<Path>) -> EngineResult<TrackHandle> {
        let path = path.as_ref();
        let mut state = self.state.write();
        state.ensure_initialized()?;

        if path.as_os_str().is_empty() {
            return Err(EngineError::InvalidFilePath(path.to_path_buf()));
        }
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }

        let prefer_module = is_module_path(path);
        let (native_handle, is_module) = match self.load_as(path, prefer_module) {
            Ok(h) => (h, prefer_module),
            Err(first) => {
                log::debug!(
                    "{} load failed for {} ({first}), retrying as {}",
                    if prefer_module { "module" } else { "stream" },
                    path.display(),
                    if prefer_module { "stream" } else { "module" },
                );
                (self.load_as(path, !prefer_module)?, !prefer_module)
            }
        };

        let handle = TrackHandle::new(native_handle);
        state.tracks.insert(
            handle,
            TrackEntry {
                native_handle,
                file_path: path.to_path_buf(),
                is_module,
            },
        );

        log::debug!(
            "loaded {} as {handle} ({})",
            path.display(),
            if is_module { "module" } else { "stream" }
        );
        Ok(handle)
    }

    fn load_as(&self, path: &Path, module: bool) -> Result<native::RawHandle, NativeError> {
        if module {
            self.bindings.load_music(path, MODULE_FLAGS)
        } else {
            self.bindings.load_stream(path, STREAM_FLAGS)
        }
    }

    /// 停止并释放原生通道
    ///
    /// 已被原生库自动释放的通道视为成功。
    fn release(&self, entry: &TrackEntry) -> Result<(), NativeError> {
        let raw = entry.native_handle;
        if let Err(e) = self.bindings.stop(raw) {
            log::debug!("stop before free failed for {raw:#x}: {e}");
        }

        let freed = if entry.is_module {
            self.bindings.free_music(raw)
        } else {
            self.bindings.free_stream(raw)
        };
        match freed {
            Err(e) if e.kind == NativeErrorKind::InvalidHandle => {
                log::debug!("channel {raw:#x} was already freed");
                Ok(())
            }
            other => other,
        }
    }

    /// 立即停止并卸载，不做淡出
    pub fn unload(&self, handle: TrackHandle) -> EngineResult<()> {
        let mut state = self.state.write();
        let entry = state.entry(handle)?.clone();

        let released = self.release(&entry);
        state.tracks.remove(handle);
        log::debug!("unloaded {handle}");
        released.map_err(Into::into)
    }

    /// 已加载曲目的快照
    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.state.read().tracks.snapshot()
    }

    pub fn track_count(&self) -> usize {
        self.state.read().tracks.len()
    }

    // ========================================================================
    // 播放控制
    // ========================================================================

    /// 已停止（或缓冲不足）时从头播放，否则原位继续
    pub fn play(&self, handle: TrackHandle) -> EngineResult<()> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        let restart = matches!(
            self.bindings.status(raw),
            PlaybackStatus::Stopped | PlaybackStatus::Stalled
        );
        self.bindings.play(raw, restart)?;
        Ok(())
    }

    /// 播放中则暂停，已暂停则继续
    pub fn pause(&self, handle: TrackHandle) -> EngineResult<()> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        match self.bindings.status(raw) {
            PlaybackStatus::Paused => self.bindings.play(raw, false)?,
            _ => self.bindings.pause(raw)?,
        }
        Ok(())
    }

    /// 淡出后停止并卸载
    ///
    /// 降调与静音两段渐变交给原生库后台执行，随后立即停止并释放通道，
    /// 因此渐变可能来不及完整播放。
    pub fn stop(&self, handle: TrackHandle) -> EngineResult<()> {
        let mut state = self.state.write();
        let entry = state.entry(handle)?.clone();

        self.fade_out(entry.native_handle);
        let released = self.release(&entry);
        state.tracks.remove(handle);
        log::debug!("stopped {handle}");
        released.map_err(Into::into)
    }

    fn fade_out(&self, raw: native::RawHandle) {
        let pitch = self.bindings.slide_attribute(
            raw,
            Attribute::Frequency,
            self.fade.pitch_floor_hz,
            self.fade.pitch_window,
            SlideCurve::Linear,
        );
        let volume = self.bindings.slide_attribute(
            raw,
            Attribute::Volume,
            0.0,
            self.fade.volume_window,
            SlideCurve::Logarithmic,
        );
        for e in [pitch, volume].into_iter().filter_map(Result::err) {
            log::warn!("fade out on {raw:#x} failed: {e}");
        }
    }

    // ========================================================================
    // 查询
    // ========================================================================

    pub fn status(&self, handle: TrackHandle) -> EngineResult<PlaybackStatus> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;
        Ok(self.bindings.status(raw))
    }

    pub fn position(&self, handle: TrackHandle) -> EngineResult<Duration> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        let pos = self.bindings.position(raw)?;
        Ok(self.bindings.to_duration(raw, pos)?)
    }

    pub fn duration(&self, handle: TrackHandle) -> EngineResult<Duration> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        let length = self.bindings.length(raw)?;
        Ok(self.bindings.to_duration(raw, length)?)
    }

    /// 跳转，超出曲目长度时不改变原生状态
    pub fn seek(&self, handle: TrackHandle, position: Duration) -> EngineResult<()> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        let length = self.bindings.length(raw)?;
        if position > self.bindings.to_duration(raw, length)? {
            return Err(EngineError::InvalidPosition(position));
        }

        let pos = self.bindings.to_position(raw, position)?.min(length);
        self.bindings.set_position(raw, pos)?;
        Ok(())
    }

    /// 音量范围 0.0 ~ 1.0
    pub fn set_volume(&self, handle: TrackHandle, volume: f32) -> EngineResult<()> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        if !(0.0..=1.0).contains(&volume) {
            return Err(EngineError::InvalidVolume(volume));
        }
        self.bindings.set_attribute(raw, Attribute::Volume, volume)?;
        Ok(())
    }

    pub fn volume(&self, handle: TrackHandle) -> EngineResult<f32> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;
        Ok(self.bindings.attribute(raw, Attribute::Volume)?)
    }

    /// tracker module 的曲名；普通音频流返回 `None`
    pub fn module_title(&self, handle: TrackHandle) -> EngineResult<Option<String>> {
        let state = self.state.read();
        let entry = state.entry(handle)?;
        if !entry.is_module {
            return Ok(None);
        }

        let title = self.bindings.tag(entry.native_handle, native::TAG_MUSIC_NAME)?;
        Ok(title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    /// 读取文件元数据，不需要初始化，也不登记句柄
    pub fn get_metadata(&self, path: impl AsRef<Path>) -> EngineResult<TrackMetadata> {
        self.extractor.extract(path.as_ref()).map_err(|e| match e {
            TagError::FileNotFound(p) => EngineError::FileNotFound(p),
            TagError::InvalidPath(p) => EngineError::InvalidFilePath(p),
        })
    }

    // ========================================================================
    // 频谱
    // ========================================================================

    /// 2048 点 FFT 的 1024 个幅度值
    ///
    /// 原生库取不到数据（未播放、已结束等）时统一返回 `FftDataUnavailable`。
    pub fn fft_data(&self, handle: TrackHandle) -> EngineResult<[f32; FFT_BINS]> {
        let state = self.state.read();
        let raw = state.entry(handle)?.native_handle;

        self.bindings.fft2048(raw).map_err(|e| {
            log::trace!("fft unavailable for {handle}: {e}");
            EngineError::FftDataUnavailable
        })
    }

    pub fn spectrum(&self, handle: TrackHandle) -> EngineResult<Spectrum> {
        self.fft_data(handle).map(Spectrum::new)
    }
}

impl<N: NativeApi> Drop for AudioEngine<N> {
    fn drop(&mut self) {
        if !self.is_initialized() {
            return;
        }
        if let Err(e) = self.shutdown() {
            log::warn!("shutdown on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_native::{HeadlessBackend, RawHandle};
    use parking_lot::Mutex;
    use std::f32::consts::PI;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    fn write_tone(dir: &Path, name: &str, freq: f32, seconds: u32, rate: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..rate * seconds {
            let t = i as f32 / rate as f32;
            let v = (2.0 * PI * freq * t).sin() * 0.8;
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn engine() -> AudioEngine<HeadlessBackend> {
        let engine = AudioEngine::new(HeadlessBackend::new());
        engine.initialize(-1, 44100, 0).unwrap();
        engine
    }

    /// 把 module 加载转给音频流，并记录渐变与 module 释放
    ///
    /// `refuse_release` 置位后，停止与各类释放调用以 `ERROR_BUSY` 失败。
    #[derive(Default)]
    struct Recording {
        inner: HeadlessBackend,
        slides: Mutex<Vec<(u32, f32, u32)>>,
        music_frees: AtomicUsize,
        refuse_release: AtomicBool,
        forced_error: Mutex<Option<i32>>,
    }

    impl Recording {
        fn refused(&self) -> bool {
            if !self.refuse_release.load(Ordering::SeqCst) {
                return false;
            }
            *self.forced_error.lock() = Some(native::ERROR_BUSY);
            true
        }
    }

    impl NativeApi for Recording {
        fn init(&self, device: i32, freq: u32, flags: u32) -> bool {
            self.inner.init(device, freq, flags)
        }
        fn free(&self) -> bool {
            !self.refused() && self.inner.free()
        }
        fn error_get_code(&self) -> i32 {
            self.forced_error
                .lock()
                .take()
                .unwrap_or_else(|| self.inner.error_get_code())
        }
        fn music_load(&self, path: &Path, flags: u32) -> RawHandle {
            self.inner.stream_create_file(path, flags)
        }
        fn music_free(&self, handle: RawHandle) -> bool {
            self.music_frees.fetch_add(1, Ordering::SeqCst);
            !self.refused() && self.inner.stream_free(handle)
        }
        fn stream_create_file(&self, path: &Path, flags: u32) -> RawHandle {
            self.inner.stream_create_file(path, flags)
        }
        fn stream_free(&self, handle: RawHandle) -> bool {
            !self.refused() && self.inner.stream_free(handle)
        }
        fn channel_play(&self, handle: RawHandle, restart: bool) -> bool {
            self.inner.channel_play(handle, restart)
        }
        fn channel_pause(&self, handle: RawHandle) -> bool {
            self.inner.channel_pause(handle)
        }
        fn channel_stop(&self, handle: RawHandle) -> bool {
            !self.refused() && self.inner.channel_stop(handle)
        }
        fn channel_is_active(&self, handle: RawHandle) -> u32 {
            self.inner.channel_is_active(handle)
        }
        fn channel_get_length(&self, handle: RawHandle, mode: u32) -> u64 {
            self.inner.channel_get_length(handle, mode)
        }
        fn channel_get_position(&self, handle: RawHandle, mode: u32) -> u64 {
            self.inner.channel_get_position(handle, mode)
        }
        fn channel_set_position(&self, handle: RawHandle, pos: u64, mode: u32) -> bool {
            self.inner.channel_set_position(handle, pos, mode)
        }
        fn channel_bytes2seconds(&self, handle: RawHandle, pos: u64) -> f64 {
            self.inner.channel_bytes2seconds(handle, pos)
        }
        fn channel_seconds2bytes(&self, handle: RawHandle, secs: f64) -> u64 {
            self.inner.channel_seconds2bytes(handle, secs)
        }
        fn channel_set_attribute(&self, handle: RawHandle, attrib: u32, value: f32) -> bool {
            self.inner.channel_set_attribute(handle, attrib, value)
        }
        fn channel_get_attribute(&self, handle: RawHandle, attrib: u32, value: &mut f32) -> bool {
            self.inner.channel_get_attribute(handle, attrib, value)
        }
        fn channel_slide_attribute(
            &self,
            handle: RawHandle,
            attrib: u32,
            value: f32,
            time_ms: u32,
        ) -> bool {
            self.slides.lock().push((attrib, value, time_ms));
            self.inner.channel_slide_attribute(handle, attrib, value, time_ms)
        }
        fn channel_get_tags(&self, _handle: RawHandle, tags: u32) -> Option<String> {
            (tags == native::TAG_MUSIC_NAME).then(|| "  Space Debris  ".to_string())
        }
        fn channel_get_data(&self, handle: RawHandle, buffer: &mut [f32], length: u32) -> u32 {
            self.inner.channel_get_data(handle, buffer, length)
        }
    }

    #[test]
    fn test_initialize_twice() {
        let engine = engine();
        assert_eq!(
            engine.initialize(-1, 44100, 0),
            Err(EngineError::AlreadyInitialized)
        );
        assert!(engine.is_initialized());
        assert_eq!(engine.config(), Some(EngineConfig::default()));
        assert_eq!(engine.native().device(), Some((-1, 44100)));
    }

    #[test]
    fn test_shutdown_before_initialize() {
        let engine = AudioEngine::new(HeadlessBackend::new());
        assert_eq!(engine.shutdown(), Err(EngineError::NotInitialized));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_native_init_failure_is_translated() {
        let engine = AudioEngine::new(HeadlessBackend::new());
        let err = engine.initialize(-7, 44100, 0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Native(NativeError {
                kind: NativeErrorKind::InvalidDevice,
                ..
            })
        ));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_reinitialize_after_shutdown() {
        let engine = engine();
        engine.shutdown().unwrap();
        engine.initialize_with(EngineConfig::new(-1, 48000, 0)).unwrap();
        assert_eq!(engine.config().map(|c| c.frequency), Some(48000));
    }

    #[test]
    fn test_uninitialized_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 1, 8000);
        let engine = AudioEngine::new(HeadlessBackend::new());
        let bogus = TrackHandle::new(0xdead);

        assert_eq!(engine.load(&path), Err(EngineError::NotInitialized));
        assert_eq!(engine.load(""), Err(EngineError::NotInitialized));
        assert_eq!(engine.play(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.pause(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.stop(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.unload(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.status(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.position(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.duration(bogus), Err(EngineError::NotInitialized));
        assert_eq!(
            engine.seek(bogus, Duration::from_secs(99)),
            Err(EngineError::NotInitialized)
        );
        assert_eq!(
            engine.set_volume(bogus, 2.0),
            Err(EngineError::NotInitialized)
        );
        assert_eq!(engine.volume(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.fft_data(bogus), Err(EngineError::NotInitialized));
        assert_eq!(engine.module_title(bogus), Err(EngineError::NotInitialized));
    }

    #[test]
    fn test_unknown_handle_is_rejected() {
        let engine = engine();
        let bogus = TrackHandle::new(0xdead);
        let invalid = Err(EngineError::InvalidTrackHandle(bogus));

        assert_eq!(engine.play(bogus), invalid);
        assert_eq!(engine.pause(bogus), invalid);
        assert_eq!(engine.stop(bogus), invalid);
        assert_eq!(engine.unload(bogus), invalid);
        assert_eq!(engine.status(bogus).map(|_| ()), invalid);
        assert_eq!(engine.position(bogus).map(|_| ()), invalid);
        assert_eq!(engine.duration(bogus).map(|_| ()), invalid);
        assert_eq!(engine.seek(bogus, Duration::from_secs(99)), invalid);
        assert_eq!(engine.set_volume(bogus, 2.0), invalid);
        assert_eq!(engine.volume(bogus).map(|_| ()), invalid);
        assert_eq!(engine.fft_data(bogus).map(|_| ()), invalid);
        assert_eq!(engine.spectrum(bogus).map(|_| ()), invalid);
        assert_eq!(engine.module_title(bogus).map(|_| ()), invalid);
    }

    #[test]
    fn test_load_path_validation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();

        assert_eq!(
            engine.load(""),
            Err(EngineError::InvalidFilePath(PathBuf::new()))
        );
        let missing = dir.path().join("missing.ogg");
        assert_eq!(
            engine.load(&missing),
            Err(EngineError::FileNotFound(missing))
        );
        assert_eq!(engine.track_count(), 0);
    }

    #[test]
    fn test_transport_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 5, 8000);
        let engine = engine();

        let handle = engine.load(&path).unwrap();
        assert_eq!(engine.status(handle), Ok(PlaybackStatus::Stopped));

        engine.play(handle).unwrap();
        assert_eq!(engine.status(handle), Ok(PlaybackStatus::Playing));

        engine.pause(handle).unwrap();
        assert_eq!(engine.status(handle), Ok(PlaybackStatus::Paused));

        // 再次暂停即继续
        engine.pause(handle).unwrap();
        assert_eq!(engine.status(handle), Ok(PlaybackStatus::Playing));

        engine.pause(handle).unwrap();
        engine.play(handle).unwrap();
        assert_eq!(engine.status(handle), Ok(PlaybackStatus::Playing));

        engine.stop(handle).unwrap();
        assert_eq!(
            engine.status(handle),
            Err(EngineError::InvalidTrackHandle(handle))
        );
        assert_eq!(engine.native().channel_count(), 0);
    }

    #[test]
    fn test_resume_keeps_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 5, 8000);
        let engine = engine();
        let handle = engine.load(&path).unwrap();

        engine.play(handle).unwrap();
        engine.pause(handle).unwrap();
        engine.seek(handle, Duration::from_secs(2)).unwrap();
        engine.play(handle).unwrap();
        assert!(engine.position(handle).unwrap() >= Duration::from_secs(2));
    }

    #[test]
    fn test_play_from_stopped_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 5, 8000);
        let engine = engine();
        let handle = engine.load(&path).unwrap();

        engine.seek(handle, Duration::from_secs(2)).unwrap();
        assert_eq!(engine.position(handle), Ok(Duration::from_secs(2)));

        // 已停止的通道从头播放
        engine.play(handle).unwrap();
        assert_eq!(engine.status(handle), Ok(PlaybackStatus::Playing));
        assert!(engine.position(handle).unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_schedules_fade_before_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = AudioEngine::new(Recording::default());
        engine.initialize(-1, 44100, 0).unwrap();

        let handle = engine.load(&path).unwrap();
        engine.play(handle).unwrap();
        engine.stop(handle).unwrap();

        let slides = engine.native().slides.lock().clone();
        assert_eq!(
            slides,
            vec![
                (native::ATTRIB_FREQ, 100.0, 500),
                (native::ATTRIB_VOL | native::SLIDE_LOG, 0.0, 100),
            ]
        );
        assert_eq!(engine.native().inner.channel_count(), 0);
        assert_eq!(engine.track_count(), 0);
    }

    #[test]
    fn test_custom_fade_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let fade = FadeOut {
            pitch_floor_hz: 200.0,
            pitch_window: Duration::from_millis(800),
            volume_window: Duration::from_millis(250),
        };
        let engine = AudioEngine::new(Recording::default()).with_fade_out(fade);
        engine.initialize(-1, 44100, 0).unwrap();

        let handle = engine.load(&path).unwrap();
        engine.stop(handle).unwrap();

        let slides = engine.native().slides.lock().clone();
        assert_eq!(slides[0], (native::ATTRIB_FREQ, 200.0, 800));
        assert_eq!(slides[1], (native::ATTRIB_VOL | native::SLIDE_LOG, 0.0, 250));
    }

    #[test]
    fn test_volume_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 1, 8000);
        let engine = engine();
        let handle = engine.load(&path).unwrap();

        assert_eq!(engine.volume(handle), Ok(1.0));
        engine.set_volume(handle, 0.5).unwrap();
        assert_eq!(engine.volume(handle), Ok(0.5));

        assert_eq!(
            engine.set_volume(handle, 1.5),
            Err(EngineError::InvalidVolume(1.5))
        );
        assert_eq!(
            engine.set_volume(handle, -0.1),
            Err(EngineError::InvalidVolume(-0.1))
        );
        assert!(matches!(
            engine.set_volume(handle, f32::NAN),
            Err(EngineError::InvalidVolume(_))
        ));
        assert_eq!(engine.volume(handle), Ok(0.5));

        engine.set_volume(handle, 0.0).unwrap();
        engine.set_volume(handle, 1.0).unwrap();
        assert_eq!(engine.volume(handle), Ok(1.0));
    }

    #[test]
    fn test_seek_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = engine();
        let handle = engine.load(&path).unwrap();

        let duration = engine.duration(handle).unwrap();
        assert_eq!(duration, Duration::from_secs(2));
        assert_eq!(engine.position(handle), Ok(Duration::ZERO));

        engine.seek(handle, Duration::from_secs(1)).unwrap();
        assert_eq!(engine.position(handle), Ok(Duration::from_secs(1)));

        let beyond = Duration::from_secs(3);
        assert_eq!(
            engine.seek(handle, beyond),
            Err(EngineError::InvalidPosition(beyond))
        );
        assert_eq!(engine.position(handle), Ok(Duration::from_secs(1)));

        engine.seek(handle, duration).unwrap();
        assert_eq!(engine.position(handle), Ok(duration));

        engine.seek(handle, Duration::ZERO).unwrap();
        assert_eq!(engine.position(handle), Ok(Duration::ZERO));
    }

    #[test]
    fn test_same_file_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 3, 8000);
        let engine = engine();

        let first = engine.load(&path).unwrap();
        let second = engine.load(&path).unwrap();
        assert_ne!(first, second);

        engine.seek(second, Duration::from_secs(1)).unwrap();
        engine.unload(first).unwrap();

        assert_eq!(
            engine.status(first),
            Err(EngineError::InvalidTrackHandle(first))
        );
        assert_eq!(engine.status(second), Ok(PlaybackStatus::Stopped));
        assert_eq!(engine.position(second), Ok(Duration::from_secs(1)));
        assert_eq!(engine.track_count(), 1);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = engine();

        let handles: Vec<_> = (0..3).map(|_| engine.load(&path).unwrap()).collect();
        engine.play(handles[0]).unwrap();
        assert_eq!(engine.native().channel_count(), 3);

        engine.shutdown().unwrap();
        assert!(!engine.is_initialized());
        assert_eq!(engine.track_count(), 0);
        assert_eq!(engine.native().channel_count(), 0);
        for &handle in &handles {
            assert_eq!(engine.status(handle), Err(EngineError::NotInitialized));
        }

        // 重新初始化后旧句柄仍然无效
        engine.initialize(-1, 44100, 0).unwrap();
        assert_eq!(
            engine.play(handles[0]),
            Err(EngineError::InvalidTrackHandle(handles[0]))
        );
    }

    #[test]
    fn test_shutdown_completes_when_native_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = AudioEngine::new(Recording::default());
        engine.initialize(-1, 44100, 0).unwrap();

        let first = engine.load(&path).unwrap();
        let second = engine.load(&path).unwrap();
        engine.play(first).unwrap();
        engine.native().refuse_release.store(true, Ordering::SeqCst);

        let err = engine.shutdown().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Native(NativeError {
                kind: NativeErrorKind::DeviceBusy,
                ..
            })
        ));
        assert!(!engine.is_initialized());
        assert_eq!(engine.track_count(), 0);
        assert_eq!(engine.status(first), Err(EngineError::NotInitialized));
        assert_eq!(engine.status(second), Err(EngineError::NotInitialized));
    }

    #[test]
    fn test_unload_removes_entry_when_free_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = AudioEngine::new(Recording::default());
        engine.initialize(-1, 44100, 0).unwrap();
        let handle = engine.load(&path).unwrap();

        engine.native().refuse_release.store(true, Ordering::SeqCst);
        assert_eq!(
            engine.unload(handle).map_err(|e| e.native_code()),
            Err(Some(native::ERROR_BUSY))
        );
        assert_eq!(
            engine.status(handle),
            Err(EngineError::InvalidTrackHandle(handle))
        );

        engine.native().refuse_release.store(false, Ordering::SeqCst);
    }

    #[test]
    fn test_drop_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 1, 8000);
        let backend = Arc::new(HeadlessBackend::new());

        let engine = AudioEngine::new(Arc::clone(&backend));
        engine.initialize(-1, 44100, 0).unwrap();
        engine.load(&path).unwrap();
        assert_eq!(backend.channel_count(), 1);

        drop(engine);
        assert_eq!(backend.device(), None);
        assert_eq!(backend.channel_count(), 0);
    }

    #[test]
    fn test_concurrent_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 1, 8000);
        let engine = engine();

        let handles: Vec<TrackHandle> = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| engine.load(&path).unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let mut unique = handles.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);
        assert_eq!(engine.track_count(), 8);
    }

    #[test]
    fn test_concurrent_queries_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = engine();
        let handles: Vec<_> = (0..4).map(|_| engine.load(&path).unwrap()).collect();

        thread::scope(|s| {
            for &handle in &handles {
                let engine = &engine;
                s.spawn(move || {
                    engine.play(handle).unwrap();
                    for _ in 0..20 {
                        engine.status(handle).unwrap();
                        engine.position(handle).unwrap();
                    }
                    engine.stop(handle).unwrap();
                });
            }
        });

        assert_eq!(engine.track_count(), 0);
        assert_eq!(engine.native().channel_count(), 0);
    }

    #[test]
    fn test_module_extension_falls_back_to_stream() {
        let dir = tempfile::tempdir().unwrap();
        // 实为 WAV，module 加载失败后以音频流加载
        let path = write_tone(dir.path(), "fake.XM", 440.0, 1, 8000);
        let engine = engine();

        let handle = engine.load(&path).unwrap();
        let tracks = engine.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].handle, handle);
        assert!(!tracks[0].is_module);
        assert_eq!(engine.module_title(handle), Ok(None));

        // 以音频流释放
        engine.unload(handle).unwrap();
        assert_eq!(engine.native().channel_count(), 0);
    }

    #[test]
    fn test_both_loaders_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mod");
        std::fs::write(&path, b"not a tracker module").unwrap();
        let engine = engine();

        let err = engine.load(&path).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Native(NativeError {
                kind: NativeErrorKind::UnsupportedFileFormat,
                ..
            })
        ));
        assert_eq!(engine.track_count(), 0);
    }

    #[test]
    fn test_module_loads_and_frees_as_module() {
        let dir = tempfile::tempdir().unwrap();
        let module = write_tone(dir.path(), "song.it", 440.0, 1, 8000);
        let stream = write_tone(dir.path(), "song.wav", 440.0, 1, 8000);
        let engine = AudioEngine::new(Recording::default());
        engine.initialize(-1, 44100, 0).unwrap();

        let m = engine.load(&module).unwrap();
        let s = engine.load(&stream).unwrap();
        let infos = engine.tracks();
        assert!(infos.iter().any(|t| t.handle == m && t.is_module));
        assert!(infos.iter().any(|t| t.handle == s && !t.is_module));

        assert_eq!(engine.module_title(m), Ok(Some("Space Debris".to_string())));
        assert_eq!(engine.module_title(s), Ok(None));

        engine.unload(m).unwrap();
        engine.unload(s).unwrap();
        assert_eq!(engine.native().music_frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fft_unavailable_when_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 1, 8000);
        let engine = engine();
        let handle = engine.load(&path).unwrap();

        assert_eq!(engine.fft_data(handle), Err(EngineError::FftDataUnavailable));
        assert_eq!(
            engine.spectrum(handle).map(|_| ()),
            Err(EngineError::FftDataUnavailable)
        );
    }

    #[test]
    fn test_spectrum_while_playing() {
        let dir = tempfile::tempdir().unwrap();
        let rate = 22050;
        let path = write_tone(dir.path(), "tone.wav", 1000.0, 3, rate);
        let engine = engine();
        let handle = engine.load(&path).unwrap();
        engine.play(handle).unwrap();

        let spectrum = engine.spectrum(handle).unwrap();
        assert_eq!(spectrum.as_slice().len(), FFT_BINS);

        let (bin, magnitude) = spectrum.peak();
        let hz = Spectrum::bin_frequency(bin, rate);
        assert!((hz - 1000.0).abs() < 30.0, "peak at {hz} Hz");
        assert!(magnitude > 0.5);
    }

    #[test]
    fn test_metadata_without_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "a.wav", 440.0, 2, 8000);
        let engine = AudioEngine::new(HeadlessBackend::new());

        let meta = engine.get_metadata(&path).unwrap();
        assert_eq!(meta.sample_rate, Some(8000));
        assert_eq!(meta.duration, Some(Duration::from_secs(2)));
        assert_eq!(engine.track_count(), 0);

        let missing = dir.path().join("gone.flac");
        assert_eq!(
            engine.get_metadata(&missing),
            Err(EngineError::FileNotFound(missing))
        );
        assert_eq!(
            engine.get_metadata(""),
            Err(EngineError::InvalidFilePath(PathBuf::new()))
        );
    }

    #[test]
    fn test_custom_extractor() {
        struct Fixed;

        impl MetadataExtractor for Fixed {
            fn extract(&self, _path: &Path) -> Result<TrackMetadata, TagError> {
                Ok(TrackMetadata {
                    title: Some("Fixed".to_string()),
                    ..Default::default()
                })
            }
        }

        let engine = AudioEngine::with_extractor(HeadlessBackend::new(), Arc::new(Fixed));
        let meta = engine.get_metadata("anything.mod").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Fixed"));
    }

    #[test]
    fn test_module_extension_detection() {
        assert!(is_module_path(Path::new("a.mod")));
        assert!(is_module_path(Path::new("b.S3M")));
        assert!(is_module_path(Path::new("c.umx")));
        assert!(!is_module_path(Path::new("d.mp3")));
        assert!(!is_module_path(Path::new("mod")));
    }
}
