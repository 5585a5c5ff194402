//! 引擎配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 原生库初始化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 输出设备，-1 为系统默认设备
    pub device: i32,
    /// 输出采样率
    pub frequency: u32,
    /// 原生初始化标志
    pub flags: u32,
}

impl EngineConfig {
    pub fn new(device: i32, frequency: u32, flags: u32) -> Self {
        Self {
            device,
            frequency,
            flags,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: -1,
            frequency: 44100,
            flags: 0,
        }
    }
}

/// 停止时的淡出效果
///
/// 两段渐变都交给原生库执行，引擎不等待其完成。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeOut {
    /// 降调的目标频率（Hz），原生库接受的最小值为 100
    pub pitch_floor_hz: f32,
    #[serde(with = "millis")]
    pub pitch_window: Duration,
    #[serde(with = "millis")]
    pub volume_window: Duration,
}

impl Default for FadeOut {
    fn default() -> Self {
        Self {
            pitch_floor_hz: 100.0,
            pitch_window: Duration::from_millis(500),
            volume_window: Duration::from_millis(100),
        }
    }
}

/// 偏好文件中以毫秒保存时长
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "frequency": 48000 }"#).unwrap();
        assert_eq!(config, EngineConfig::new(-1, 48000, 0));

        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_fade_out_windows_in_millis() {
        let fade: FadeOut = serde_json::from_str(r#"{ "volume_window": 250 }"#).unwrap();
        assert_eq!(fade.volume_window, Duration::from_millis(250));
        assert_eq!(fade.pitch_window, Duration::from_millis(500));
        assert_eq!(fade.pitch_floor_hz, 100.0);

        let json = serde_json::to_value(FadeOut::default()).unwrap();
        assert_eq!(json["pitch_window"], 500);
        assert_eq!(json["volume_window"], 100);
    }
}
