//! # 资料图片采集模块（capture）
//!
//! ## 设计思路
//!
//! 将“图片来源 → 校验 → 方形裁剪 → 编码 → 上传”按职责拆分为多个子模块，
//! 由 `pipeline` 的显式状态机统一编排，UI 只负责把用户动作转成方法调用。
//!
//! - `camera` / `file_input`：两种来源，分别产出 `RawImage`
//! - `validator`：类型与体积校验
//! - `geometry`：裁剪几何与钳制规则（纯计算）
//! - `crop`：预览渲染与最终提取
//! - `upload`：上传契约与 HTTP 适配器
//! - `pipeline`：会话状态机
//! - `service`：按界面管理流水线与可热更新的配置
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! UI 动作
//!    ↓
//! service.rs（按界面取得流水线，载入配置快照）
//!    ↓
//! pipeline.rs（状态切换 + 日志）
//!    ├─ camera.rs / file_input.rs（获取原始字节）
//!    ├─ validator.rs（MIME + 体积）
//!    ├─ geometry.rs + crop.rs（预览 / 提取 / JPEG 编码）
//!    └─ upload.rs（UploadAdapter）
//!    ↓
//! Success / Error(kind) / Cancelled
//! ```
//!
//! ## 分层职责建议
//!
//! - 阈值与画质策略变更优先改 `config.rs`
//! - 状态流转变更只改 `pipeline.rs`
//! - 后端协议变更只改 `upload.rs` 的适配器

mod camera;
mod config;
mod crop;
mod error;
mod file_input;
mod geometry;
mod pipeline;
mod service;
mod source;
mod upload;
mod validator;

#[cfg(test)]
mod test_support;

pub use camera::{CameraDevice, CameraReleaseHandle, CameraSession, Frame, VideoStream};
pub use config::{
    CaptureConfig, ConfigError, CropQualityProfile, ResampleFilter, UploadConfig, DEFAULT_OUTPUT_SIZE,
    MAX_RAW_BYTES, MAX_ZOOM, MIN_ZOOM,
};
pub use crop::{CropEngine, PreviewSource, OUTPUT_MIME_TYPE};
pub use error::{CaptureError, ErrorKind};
pub use file_input::{load_local_file, select_local_file, FilePicker, FixedPathPicker};
pub use geometry::{CropGeometry, CropRect, GeometryDelta, ZoomLimits};
pub use pipeline::{AbortHandle, CapturePipeline, CaptureSession, PipelineState, TransitionListener};
pub use service::{CaptureService, ProfileSurface, SurfaceSession};
pub use source::{EncodedImage, PreviewFrame, RawImage, SourceKind};
pub use upload::{
    redact_url_for_log, CredentialProvider, EnvToken, HttpProfileUploader, ProfileRepr, StaticToken, UploadAdapter,
    UploadRequest,
};
pub use validator::{is_image_mime_type, ImageValidator};
