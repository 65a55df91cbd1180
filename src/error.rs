//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 库内部各阶段使用 `CaptureError`（带分类与阶段），配置加载使用 `ConfigError`；
//! 对嵌入方与命令行入口统一收敛为 `AppError`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息，`#[from]` 免去手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于直接回传给前端。

use serde::Serialize;

use crate::capture::{CaptureError, ConfigError, ErrorKind};

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 采集流水线错误（摄像头 / 校验 / 裁剪 / 上传）
    #[error("{0}")]
    Capture(#[from] CaptureError),

    /// 配置加载或校验失败
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// 流水线错误的分类；其它错误返回 `None`。
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Capture(err) => err.kind(),
            _ => None,
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
