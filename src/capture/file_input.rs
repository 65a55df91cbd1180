//! # 本地文件来源
//!
//! ## 设计思路
//!
//! 文件选择器本身属于 UI 边界，用 `FilePicker` 抽象；本模块只负责把选中的文件变成 `RawImage`。
//!
//! ## 实现思路
//!
//! - 先读文件元数据拿到真实体积，再读取头部字节识别类型（`infer` 魔数优先，扩展名兜底）。
//! - 超过读取上限的文件只保留头部字节，交给校验器以 `TooLarge` 拒绝，不会读入完整内容。
//! - 用户关闭选择器、或选中的文件无法读取，都返回 `NoFileSelected`。

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::source::{RawImage, SourceKind};
use super::CaptureError;

const SNIFF_BYTES: u64 = 8 * 1024;
const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

/// 文件选择器（UI 边界）。返回 `None` 表示用户关闭了选择器。
pub trait FilePicker {
    fn pick(&self) -> Option<PathBuf>;
}

/// 已知路径的选择器，供命令行与嵌入方直接传入路径使用。
pub struct FixedPathPicker(pub Option<PathBuf>);

impl FilePicker for FixedPathPicker {
    fn pick(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// 打开选择器并加载用户选中的文件。
pub fn select_local_file(picker: &dyn FilePicker, max_read_bytes: u64) -> Result<RawImage, CaptureError> {
    let path = picker.pick().ok_or(CaptureError::NoFileSelected)?;
    load_local_file(&path, max_read_bytes)
}

/// 读取本地文件为 `RawImage`。
pub fn load_local_file(path: &Path, max_read_bytes: u64) -> Result<RawImage, CaptureError> {
    log::info!("📁 读取本地图片 - 路径: {}", path.display());

    let unreadable = |e: std::io::Error| {
        log::warn!("⚠️ 选中的文件无法读取：{} ({})", path.display(), e);
        CaptureError::NoFileSelected
    };

    let metadata = std::fs::metadata(path).map_err(unreadable)?;
    if !metadata.is_file() {
        log::warn!("⚠️ 选中的路径不是文件：{}", path.display());
        return Err(CaptureError::NoFileSelected);
    }
    let byte_size = metadata.len();

    let mut file = File::open(path).map_err(unreadable)?;
    let mut header = Vec::with_capacity(SNIFF_BYTES.min(byte_size) as usize);
    (&mut file)
        .take(SNIFF_BYTES)
        .read_to_end(&mut header)
        .map_err(unreadable)?;

    let mime_type = sniff_mime_type(&header, path);

    if byte_size > max_read_bytes {
        log::info!(
            "📁 文件超过读取上限，仅保留头部用于校验 - {:.2} MB",
            byte_size as f64 / 1024.0 / 1024.0
        );
        return Ok(RawImage::header_only(header, byte_size, mime_type, SourceKind::FileInput));
    }

    let mut bytes = header;
    file.read_to_end(&mut bytes).map_err(unreadable)?;

    Ok(RawImage::new(bytes, mime_type, SourceKind::FileInput))
}

/// 通过文件签名识别 MIME，识别不了时按扩展名推断。
fn sniff_mime_type(header: &[u8], path: &Path) -> String {
    if let Some(kind) = infer::get(header) {
        return kind.mime_type().to_string();
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        _ => UNKNOWN_MIME_TYPE,
    }
    .to_string()
}
