//! # 裁剪引擎
//!
//! ## 设计思路
//!
//! 实时预览与最终提取刻意分离：
//! - 预览：进入裁剪时解码一次并降采样为底图，之后每次几何变化只在底图上做一次小尺寸重采样，
//!   是同步、无挂起的重绘路径。
//! - 提取：确认后才执行，完整解码原图 → 按几何截取正方形 → 缩放到固定边长 → JPEG 编码 → Base64。
//!   要么得到完整的 `EncodedImage`，要么整体失败。
//!
//! ## 实现思路
//!
//! 1. 读取图片头尺寸，按像素上限快速拒绝
//! 2. 完整解码
//! 3. `fast_image_resize` 带裁剪区域一次完成“截取 + 缩放”；失败时回退到 `image::imageops`
//! 4. 去掉 alpha 后按固定质量编码

use std::io::Cursor;
use std::time::Instant;

use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageBuffer, RgbImage, Rgba, RgbaImage};

use super::config::ResampleFilter;
use super::geometry::{CropGeometry, CropRect};
use super::source::{EncodedImage, PreviewFrame, RawImage};
use super::{CaptureConfig, CaptureError};

pub const OUTPUT_MIME_TYPE: &str = "image/jpeg";

/// 预览底图：降采样后的 RGBA 与原图尺寸。
#[derive(Debug, Clone)]
pub struct PreviewSource {
    base: RgbaImage,
    source_width: u32,
    source_height: u32,
}

impl PreviewSource {
    /// 原图尺寸（用于拖拽换算）。
    pub fn source_dimensions(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    fn scale(&self) -> f64 {
        self.base.width() as f64 / self.source_width.max(1) as f64
    }
}

#[derive(Debug, Clone)]
pub struct CropEngine {
    output_size: u32,
    jpeg_quality: u8,
    resample: ResampleFilter,
    max_decoded_pixels: u64,
    preview_max_dimension: u32,
}

impl CropEngine {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            output_size: config.output_size,
            jpeg_quality: config.jpeg_quality,
            resample: config.resample,
            max_decoded_pixels: config.max_decoded_pixels,
            preview_max_dimension: config.preview_max_dimension,
        }
    }

    pub fn output_size(&self) -> u32 {
        self.output_size
    }

    /// 解码原图并生成预览底图。
    pub fn prepare_preview(&self, raw: &RawImage) -> Result<PreviewSource, CaptureError> {
        let decoded = self.decode_checked(raw)?;
        let (source_width, source_height) = decoded.dimensions();

        let longest = source_width.max(source_height);
        let base = if longest > self.preview_max_dimension {
            let scale = self.preview_max_dimension as f64 / longest as f64;
            let width = ((source_width as f64 * scale).round() as u32).max(1);
            let height = ((source_height as f64 * scale).round() as u32).max(1);
            let full = CropRect {
                x: 0.0,
                y: 0.0,
                side: 0.0,
            };
            let rgba = decoded.to_rgba8();
            resize_region(&rgba, full, (width, height), ResampleFilter::Bilinear)?
        } else {
            decoded.to_rgba8()
        };

        log::debug!(
            "🖼️ 预览底图就绪 - 原图 {}x{} 底图 {}x{}",
            source_width,
            source_height,
            base.width(),
            base.height()
        );

        Ok(PreviewSource {
            base,
            source_width,
            source_height,
        })
    }

    /// 渲染当前几何对应的预览帧。输入相同则输出相同。
    pub fn render_preview(
        &self,
        source: &PreviewSource,
        geometry: &CropGeometry,
        size: u32,
    ) -> Result<PreviewFrame, CaptureError> {
        let size = size.max(1);
        let rect = geometry
            .source_rect(source.source_width, source.source_height)
            .scaled(source.scale());

        let frame = resize_region(&source.base, rect, (size, size), ResampleFilter::Bilinear)?;

        Ok(PreviewFrame {
            size,
            rgba: frame.into_raw(),
        })
    }

    /// 一次性提取：解码 → 截取 → 缩放到固定边长 → 编码。
    pub fn extract(&self, raw: &RawImage, geometry: &CropGeometry) -> Result<EncodedImage, CaptureError> {
        let start = Instant::now();

        let decoded = self.decode_checked(raw)?;
        let (width, height) = decoded.dimensions();
        let decode_elapsed = start.elapsed();

        let rect = geometry.source_rect(width, height);
        let rgba = decoded.to_rgba8();
        let cropped = resize_region(&rgba, rect, (self.output_size, self.output_size), self.resample)?;

        let rgb = DynamicImage::ImageRgba8(cropped).to_rgb8();
        let jpeg = encode_jpeg(&rgb, self.jpeg_quality)?;

        log::info!(
            "✂️ 裁剪完成 - 原图 {}x{} 区域 ({:.1}, {:.1}, {:.1}) 输出 {}x{} {} bytes decode={}ms total={}ms",
            width,
            height,
            rect.x,
            rect.y,
            rect.side,
            self.output_size,
            self.output_size,
            jpeg.len(),
            decode_elapsed.as_millis(),
            start.elapsed().as_millis()
        );

        Ok(EncodedImage::from_encoded_bytes(
            OUTPUT_MIME_TYPE,
            &jpeg,
            self.output_size,
            self.output_size,
        ))
    }

    fn decode_checked(&self, raw: &RawImage) -> Result<DynamicImage, CaptureError> {
        if !raw.is_complete() {
            return Err(CaptureError::DecodeFailed(format!(
                "原始字节不完整：{}/{} bytes",
                raw.bytes().len(),
                raw.byte_size
            )));
        }

        let reader = image::ImageReader::new(Cursor::new(raw.bytes()))
            .with_guessed_format()
            .map_err(|e| CaptureError::DecodeFailed(format!("无法识别图片格式：{}", e)))?;
        let (header_width, header_height) = reader
            .into_dimensions()
            .map_err(|e| CaptureError::DecodeFailed(format!("无法读取图片尺寸：{}", e)))?;
        self.check_pixel_limit(header_width, header_height)?;

        let decoded = image::load_from_memory(raw.bytes())?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(CaptureError::DecodeFailed("图片尺寸为 0".to_string()));
        }
        self.check_pixel_limit(width, height)?;

        Ok(decoded)
    }

    fn check_pixel_limit(&self, width: u32, height: u32) -> Result<(), CaptureError> {
        let pixels = (width as u64) * (height as u64);
        if pixels > self.max_decoded_pixels {
            return Err(CaptureError::DecodeFailed(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, self.max_decoded_pixels
            )));
        }
        Ok(())
    }
}

/// 以固定质量编码 JPEG。
pub(crate) fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        encoder
            .encode_image(rgb)
            .map_err(|e| CaptureError::DecodeFailed(format!("JPEG 编码失败：{}", e)))?;
    }
    Ok(buffer)
}

/// 截取 `rect` 并缩放到 `target`。`rect.side == 0` 表示整幅图。
fn resize_region(
    src: &RgbaImage,
    rect: CropRect,
    target: (u32, u32),
    filter: ResampleFilter,
) -> Result<RgbaImage, CaptureError> {
    match resize_with_fast_image_resize(src, rect, target, filter) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 裁剪缩放失败，回退 image::imageops：{}", err);
            Ok(resize_with_imageops(src, rect, target, filter))
        }
    }
}

fn resize_with_fast_image_resize(
    src: &RgbaImage,
    rect: CropRect,
    target: (u32, u32),
    filter: ResampleFilter,
) -> Result<RgbaImage, CaptureError> {
    let (src_width, src_height) = src.dimensions();
    let src_view = fr::images::ImageRef::new(src_width, src_height, src.as_raw(), fr::PixelType::U8x4)
        .map_err(|e| CaptureError::DecodeFailed(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target.0, target.1, fr::PixelType::U8x4);

    let mut options = fr::ResizeOptions::new().resize_alg(filter.to_fast_alg());
    if rect.side > 0.0 {
        // 极小源图下至少截取 1 像素
        let side = rect.side.max(1.0).min(src_width.min(src_height) as f64);
        let x = rect.x.clamp(0.0, src_width as f64 - side);
        let y = rect.y.clamp(0.0, src_height as f64 - side);
        options = options.crop(x, y, side, side);
    }

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|e| CaptureError::DecodeFailed(format!("fast_image_resize 执行失败：{}", e)))?;

    ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target.0, target.1, dst_image.into_vec())
        .ok_or_else(|| CaptureError::DecodeFailed("fast_image_resize 输出缓冲长度异常".to_string()))
}

fn resize_with_imageops(src: &RgbaImage, rect: CropRect, target: (u32, u32), filter: ResampleFilter) -> RgbaImage {
    let (width, height) = src.dimensions();
    let region = if rect.side > 0.0 {
        let (x, y, side) = rect.to_pixels(width, height);
        image::imageops::crop_imm(src, x, y, side, side).to_image()
    } else {
        src.clone()
    };
    image::imageops::resize(&region, target.0, target.1, filter.to_image_filter())
}
