//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 采集链路的每一个失败分支都必须带上明确的 `ErrorKind`，供 UI 渲染可读提示。
//! - `ErrorKind`：稳定的错误分类（可复制、可存入会话）
//! - `CaptureError`：携带细节文本的错误值，通过 `thiserror` 派生可读消息
//!
//! `InvalidTransition` 不属于分类体系：它表示“当前状态下不允许该操作”，
//! 永远不会改变状态，也不会写入会话。

use serde::Serialize;

/// 采集链路错误分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    NoFileSelected,
    UnsupportedType,
    TooLarge,
    DecodeFailed,
    UploadFailed,
}

impl ErrorKind {
    /// 前端使用的稳定错误码。
    pub fn code(self) -> &'static str {
        match self {
            Self::PermissionDenied => "E_PERMISSION_DENIED",
            Self::DeviceUnavailable => "E_DEVICE_UNAVAILABLE",
            Self::NoFileSelected => "E_NO_FILE_SELECTED",
            Self::UnsupportedType => "E_UNSUPPORTED_TYPE",
            Self::TooLarge => "E_TOO_LARGE",
            Self::DecodeFailed => "E_DECODE_FAILED",
            Self::UploadFailed => "E_UPLOAD_FAILED",
        }
    }

    /// 出错阶段，用于日志聚合与前端分区展示。
    pub fn stage(self) -> &'static str {
        match self {
            Self::PermissionDenied | Self::DeviceUnavailable | Self::NoFileSelected => "capture",
            Self::UnsupportedType | Self::TooLarge => "validate",
            Self::DecodeFailed => "crop",
            Self::UploadFailed => "upload",
        }
    }

    /// 面向用户的提示文案。
    pub fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => "无法访问摄像头：权限被拒绝",
            Self::DeviceUnavailable => "未检测到可用的摄像头",
            Self::NoFileSelected => "未选择图片文件",
            Self::UnsupportedType => "仅支持图片文件",
            Self::TooLarge => "图片不能超过 5 MB",
            Self::DecodeFailed => "图片已损坏或无法解析",
            Self::UploadFailed => "图片上传失败，请重试",
        }
    }

    /// 上传失败可在保留结果的前提下重试，其余错误需重新采集。
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::UploadFailed)
    }
}

/// 采集链路统一错误类型。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("摄像头权限被拒绝：{0}")]
    PermissionDenied(String),

    #[error("摄像头不可用：{0}")]
    DeviceUnavailable(String),

    #[error("未选择文件")]
    NoFileSelected,

    #[error("不支持的文件类型：{0}")]
    UnsupportedType(String),

    #[error("文件过大：{size} 字节（限制：{limit} 字节）")]
    TooLarge { size: u64, limit: u64 },

    #[error("图片解码失败：{0}")]
    DecodeFailed(String),

    #[error("上传失败：{0}")]
    UploadFailed(String),

    #[error("状态 {state} 下不允许执行 {action}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
}

impl CaptureError {
    /// 对应的错误分类；非法状态切换没有分类。
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
            Self::DeviceUnavailable(_) => Some(ErrorKind::DeviceUnavailable),
            Self::NoFileSelected => Some(ErrorKind::NoFileSelected),
            Self::UnsupportedType(_) => Some(ErrorKind::UnsupportedType),
            Self::TooLarge { .. } => Some(ErrorKind::TooLarge),
            Self::DecodeFailed(_) => Some(ErrorKind::DecodeFailed),
            Self::UploadFailed(_) => Some(ErrorKind::UploadFailed),
            Self::InvalidTransition { .. } => None,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().map(ErrorKind::code).unwrap_or("E_INVALID_TRANSITION")
    }

    pub fn stage(&self) -> &'static str {
        self.kind().map(ErrorKind::stage).unwrap_or("pipeline")
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(error: image::ImageError) -> Self {
        Self::DecodeFailed(error.to_string())
    }
}
