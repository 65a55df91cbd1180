//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入”和“流水线产物”解耦：
//! - `RawImage` 表示已获取但未解码的原始字节及元数据
//! - `PreviewFrame` 表示实时预览用的 RGBA 栅格（非破坏、可随时丢弃）
//! - `EncodedImage` 表示最终可传输的方图（Base64 + 稳定 MIME），生成后不可变

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::GenericImageView;

use super::CaptureError;

/// 原始图片来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    FileInput,
}

/// 采集阶段输出：未解码的原始图片。
#[derive(Debug, Clone)]
pub struct RawImage {
    /// 原始字节。超限文件只保留用于类型识别的头部字节。
    pub(crate) bytes: Bytes,
    /// 真实体积（字节），文件来源取自文件系统元数据。
    pub byte_size: u64,
    pub mime_type: String,
    pub source_kind: SourceKind,
    pub captured_at: DateTime<Utc>,
}

impl RawImage {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>, source_kind: SourceKind) -> Self {
        let bytes = bytes.into();
        Self {
            byte_size: bytes.len() as u64,
            bytes,
            mime_type: mime_type.into(),
            source_kind,
            captured_at: Utc::now(),
        }
    }

    /// 仅有元数据与头部字节的句柄（用于超限文件，避免读入完整内容）。
    pub(crate) fn header_only(
        header: impl Into<Bytes>,
        byte_size: u64,
        mime_type: impl Into<String>,
        source_kind: SourceKind,
    ) -> Self {
        Self {
            bytes: header.into(),
            byte_size,
            mime_type: mime_type.into(),
            source_kind,
            captured_at: Utc::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.bytes.len() as u64 == self.byte_size
    }
}

/// 实时预览帧（RGBA，`size * size * 4` 字节）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFrame {
    pub size: u32,
    pub rgba: Vec<u8>,
}

/// 最终输出：固定尺寸方图的可传输表示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: &'static str,
    base64: String,
    width: u32,
    height: u32,
}

impl EncodedImage {
    pub(crate) fn from_encoded_bytes(mime_type: &'static str, encoded: &[u8], width: u32, height: u32) -> Self {
        Self {
            mime_type,
            base64: general_purpose::STANDARD.encode(encoded),
            width,
            height,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `data:image/jpeg;base64,...` 形式，供前端直接预览。
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// 还原为编码后的字节（用于上传或落盘）。
    pub fn to_bytes(&self) -> Result<Vec<u8>, CaptureError> {
        general_purpose::STANDARD
            .decode(&self.base64)
            .map_err(|e| CaptureError::DecodeFailed(format!("Base64 解码失败：{}", e)))
    }

    /// 实际解码负载并返回其尺寸。
    pub fn decoded_dimensions(&self) -> Result<(u32, u32), CaptureError> {
        let bytes = self.to_bytes()?;
        let decoded = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CaptureError::DecodeFailed(e.to_string()))?
            .decode()?;
        Ok(decoded.dimensions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_image_size_tracks_bytes() {
        let raw = RawImage::new(vec![1_u8, 2, 3], "image/png", SourceKind::FileInput);
        assert_eq!(raw.byte_size, 3);
        assert!(raw.is_complete());

        let header = RawImage::header_only(vec![1_u8, 2], 6 * 1024 * 1024, "image/png", SourceKind::FileInput);
        assert!(!header.is_complete());
    }

    #[test]
    fn encoded_image_exposes_data_url() {
        let encoded = EncodedImage::from_encoded_bytes("image/jpeg", b"abc", 1, 1);
        assert_eq!(encoded.to_data_url(), "data:image/jpeg;base64,YWJj");
        assert_eq!(encoded.to_bytes().expect("decode failed"), b"abc");
    }
}
