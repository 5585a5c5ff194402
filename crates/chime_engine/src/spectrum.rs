//! 频谱数据

use chime_native::FFT2048_BINS;

/// FFT 点数
pub const FFT_SIZE: usize = FFT2048_BINS * 2;

/// 频带划分的最低频率
const MIN_BAND_HZ: f32 = 20.0;

/// 一帧 2048 点 FFT 的幅度谱（1024 个 bin，0 ~ 奈奎斯特）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spectrum {
    bins: [f32; FFT2048_BINS],
}

impl Spectrum {
    pub fn new(bins: [f32; FFT2048_BINS]) -> Self {
        Self { bins }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.bins
    }

    pub fn into_inner(self) -> [f32; FFT2048_BINS] {
        self.bins
    }

    /// 幅度最大的 bin：(索引, 幅度)
    pub fn peak(&self) -> (usize, f32) {
        self.bins
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0), |best, (i, v)| if v > best.1 { (i, v) } else { best })
    }

    /// bin 的中心频率
    pub fn bin_frequency(index: usize, sample_rate: u32) -> f32 {
        index as f32 * sample_rate as f32 / FFT_SIZE as f32
    }

    /// 按对数间隔合并为 `count` 个频带，每个频带取区间内的最大幅度
    ///
    /// 频带范围为 20 Hz ~ 奈奎斯特频率。低频端一个频带可能不足一个 bin，
    /// 此时取最近的 bin。
    pub fn bands(&self, count: usize, sample_rate: u32) -> Vec<f32> {
        if count == 0 || sample_rate == 0 {
            return Vec::new();
        }

        let nyquist = sample_rate as f32 / 2.0;
        let min_freq = MIN_BAND_HZ.min(nyquist);
        let log_min = min_freq.log10();
        let log_max = nyquist.log10();
        let hz_per_bin = sample_rate as f32 / FFT_SIZE as f32;

        let edge = |i: usize| {
            let log_freq = log_min + (log_max - log_min) * (i as f32 / count as f32);
            10.0_f32.powf(log_freq)
        };

        (0..count)
            .map(|i| {
                let lo = (edge(i) / hz_per_bin).floor() as usize;
                let hi = (edge(i + 1) / hz_per_bin).ceil() as usize;
                let lo = lo.min(FFT2048_BINS - 1);
                let hi = hi.clamp(lo + 1, FFT2048_BINS);
                self.bins[lo..hi].iter().copied().fold(0.0, f32::max)
            })
            .collect()
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self::new([0.0; FFT2048_BINS])
    }
}

impl AsRef<[f32]> for Spectrum {
    fn as_ref(&self) -> &[f32] {
        &self.bins
    }
}
