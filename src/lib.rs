//! # 资料图片采集 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │        UI（患者资料 / 医生资料 / 账户设置）               │
//! │   打开摄像头 · 选择文件 · 拖拽/缩放 · 确认 · 移除         │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ 方法调用 (Result<T, CaptureError>)
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            核心 (Rust)                           │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  └─ capture                                              │
//! │      ├─ service        按界面管理流水线 + 热更新配置      │
//! │      ├─ pipeline       会话状态机                        │
//! │      ├─ camera         摄像头会话 (RAII 释放)            │
//! │      ├─ file_input     本地文件 + MIME 嗅探              │
//! │      ├─ crop           预览渲染 / 方形提取 / JPEG        │
//! │      └─ upload         UploadAdapter + HTTP 适配器       │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ PUT multipart (profile_picture)
//!   资料服务后端
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`capture`] | 采集、校验、裁剪、编码、上传的完整流水线 |

pub mod capture;
pub mod error;
