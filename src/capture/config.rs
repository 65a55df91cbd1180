//! # 配置模块
//!
//! ## 设计思路
//!
//! 将采集、校验、裁剪、编码、上传各阶段的可调参数集中到 `CaptureConfig`，
//! 由 `CaptureService` 以 `Arc<RwLock<_>>` 持有，每次会话开始时取一次快照。
//! 画质档位（quality / balanced / speed）作为高层语义，映射到重采样滤镜与 JPEG 质量。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用配置（5 MiB 上限、512×512 输出、质量 92）。
//! - 支持从 JSON 设置文件加载，缺省字段回落到默认值。
//! - `validate` 拒绝无意义的组合，避免运行期才暴露问题。

use std::path::Path;

use fast_image_resize as fr;
use serde::{Deserialize, Serialize};

/// 原始图片体积上限：5 MiB。
pub const MAX_RAW_BYTES: u64 = 5 * 1024 * 1024;
/// 输出方图边长（像素）。
pub const DEFAULT_OUTPUT_SIZE: u32 = 512;
pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("无法读取配置文件：{0}")]
    Io(#[from] std::io::Error),

    #[error("配置文件格式错误：{0}")]
    Parse(#[from] serde_json::Error),

    #[error("配置值无效：{0}")]
    Invalid(String),
}

/// 重采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    Lanczos3,
}

impl ResampleFilter {
    pub(crate) fn to_fast_alg(self) -> fr::ResizeAlg {
        match self {
            Self::Nearest => fr::ResizeAlg::Nearest,
            Self::Bilinear => fr::ResizeAlg::Convolution(fr::FilterType::Bilinear),
            Self::CatmullRom => fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom),
            Self::Lanczos3 => fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3),
        }
    }

    /// `fast_image_resize` 失败时回退到 `image` 自带实现所用的滤镜。
    pub(crate) fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Bilinear => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// 上传适配器参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 资料更新接口地址（`PUT`）。
    pub endpoint: String,
    /// multipart 中图片字段名。
    pub field_name: String,
    /// 单次请求总超时（秒）。
    pub timeout_secs: u64,
    /// 建立连接超时（秒）。
    pub connect_timeout_secs: u64,
    /// 最多尝试次数（含首次）。
    pub max_attempts: u8,
    /// 指数退避基准延迟（毫秒）。
    pub retry_base_delay_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/api/auth/profile/update/".to_string(),
            field_name: "profile_picture".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 8,
            max_attempts: 3,
            retry_base_delay_ms: 180,
        }
    }
}

/// 采集链路配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 原始图片允许的最大体积（字节）。
    pub max_raw_bytes: u64,
    /// 输出方图边长。
    pub output_size: u32,
    /// 输出 JPEG 质量（1~100）。
    pub jpeg_quality: u8,
    /// 摄像头定格帧的 JPEG 质量。
    pub camera_frame_quality: u8,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// 缩放滑杆步进。
    pub zoom_step: f32,
    /// 完整解码前按图片头校验的像素上限。
    pub max_decoded_pixels: u64,
    /// 预览底图的最长边；超过时先降采样再用于实时预览。
    pub preview_max_dimension: u32,
    pub resample: ResampleFilter,
    pub upload: UploadConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_raw_bytes: MAX_RAW_BYTES,
            output_size: DEFAULT_OUTPUT_SIZE,
            jpeg_quality: 92,
            camera_frame_quality: 95,
            min_zoom: MIN_ZOOM,
            max_zoom: MAX_ZOOM,
            zoom_step: 0.1,
            max_decoded_pixels: 40_000_000,
            preview_max_dimension: 1024,
            resample: ResampleFilter::CatmullRom,
            upload: UploadConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// 从 JSON 设置文件加载配置，缺省字段使用默认值。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use derma_capture::capture::CaptureConfig;
    ///
    /// let config = CaptureConfig::from_json_file("settings.json")?;
    /// assert!(config.output_size > 0);
    /// # Ok::<(), derma_capture::capture::ConfigError>(())
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!("⚙️ 已加载采集配置：{}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_raw_bytes == 0 || self.max_raw_bytes > MAX_RAW_BYTES {
            return Err(ConfigError::Invalid(format!(
                "max_raw_bytes 必须在 1~{} 之间",
                MAX_RAW_BYTES
            )));
        }
        if !(16..=4096).contains(&self.output_size) {
            return Err(ConfigError::Invalid("output_size 必须在 16~4096 之间".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) || !(1..=100).contains(&self.camera_frame_quality) {
            return Err(ConfigError::Invalid("JPEG 质量必须在 1~100 之间".to_string()));
        }
        // 只允许收紧缩放范围，不允许突破 [MIN_ZOOM, MAX_ZOOM]
        if !(self.min_zoom >= MIN_ZOOM && self.max_zoom <= MAX_ZOOM && self.min_zoom < self.max_zoom) {
            return Err(ConfigError::Invalid(format!(
                "缩放范围无效：[{}, {}]",
                self.min_zoom, self.max_zoom
            )));
        }
        if !(self.zoom_step >= 0.0 && self.zoom_step < self.max_zoom - self.min_zoom) {
            return Err(ConfigError::Invalid("zoom_step 超出缩放范围".to_string()));
        }
        if self.preview_max_dimension < self.output_size.min(256) {
            return Err(ConfigError::Invalid("preview_max_dimension 过小".to_string()));
        }
        if self.upload.max_attempts == 0 {
            return Err(ConfigError::Invalid("upload.max_attempts 至少为 1".to_string()));
        }
        Ok(())
    }

    /// 基于当前参数反推画质档位。
    pub fn quality_profile(&self) -> CropQualityProfile {
        match self.resample {
            ResampleFilter::Lanczos3 if self.jpeg_quality >= 95 => CropQualityProfile::Quality,
            ResampleFilter::Nearest | ResampleFilter::Bilinear => CropQualityProfile::Speed,
            _ => CropQualityProfile::Balanced,
        }
    }

    /// 应用画质档位。
    pub fn apply_quality_profile(&mut self, profile: CropQualityProfile) {
        match profile {
            CropQualityProfile::Quality => {
                self.resample = ResampleFilter::Lanczos3;
                self.jpeg_quality = 95;
            }
            CropQualityProfile::Balanced => {
                self.resample = ResampleFilter::CatmullRom;
                self.jpeg_quality = 92;
            }
            CropQualityProfile::Speed => {
                self.resample = ResampleFilter::Bilinear;
                self.jpeg_quality = 85;
            }
        }
    }
}

/// 裁剪输出画质档位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropQualityProfile {
    Quality,
    Balanced,
    Speed,
}

impl CropQualityProfile {
    pub fn parse(profile: &str) -> Result<Self, ConfigError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ConfigError::Invalid(format!(
                "未知画质档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}
