// 该文件是 Zhunxing （准星） 项目的一部分。
// src/convert.rs - 颜色空间转换
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 将相机帧转换为正向的 RGB 图像。
//!
//! BGRA 帧直接重排字节并丢弃 alpha；YUV 4:2:0 帧按 2×2 最近邻取色度，
//! 使用标准系数做线性变换。几何信息有误时返回错误，绝不返回半成品图像。

use image::{ImageBuffer, RgbImage, imageops};
use thiserror::Error;

use crate::frame::{Frame, Orientation, PixelFormat, Plane};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConversionError {
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("平面数量不匹配: 期望 {expected}, 实际 {actual}")]
  PlaneCount { expected: usize, actual: usize },
  #[error("平面 {plane} 几何信息无效: {reason}")]
  PlaneGeometry { plane: usize, reason: String },
}

fn check_plane(
  index: usize,
  plane: &Plane,
  columns: usize,
  rows: usize,
) -> Result<(), ConversionError> {
  let invalid = |reason: String| ConversionError::PlaneGeometry {
    plane: index,
    reason,
  };

  if plane.bytes_per_pixel == 0 {
    return Err(invalid("像素跨度为 0".to_string()));
  }
  let overflow = || invalid("跨度超出可寻址范围".to_string());
  let row_span = (columns - 1)
    .checked_mul(plane.bytes_per_pixel)
    .and_then(|n| n.checked_add(1))
    .ok_or_else(overflow)?;
  if plane.bytes_per_row < row_span {
    return Err(invalid(format!(
      "行跨度 {} 小于一行所需的 {} 字节",
      plane.bytes_per_row, row_span
    )));
  }
  let required = (rows - 1)
    .checked_mul(plane.bytes_per_row)
    .and_then(|n| n.checked_add(row_span))
    .ok_or_else(overflow)?;
  if plane.bytes.len() < required {
    return Err(invalid(format!(
      "数据长度 {} 小于所需的 {} 字节",
      plane.bytes.len(),
      required
    )));
  }
  Ok(())
}

fn check_planes(frame: &Frame) -> Result<(), ConversionError> {
  if frame.width == 0 || frame.height == 0 {
    return Err(ConversionError::EmptyFrame {
      width: frame.width,
      height: frame.height,
    });
  }

  let expected = frame.format.plane_count();
  if frame.planes.len() != expected {
    return Err(ConversionError::PlaneCount {
      expected,
      actual: frame.planes.len(),
    });
  }

  let (w, h) = (frame.width as usize, frame.height as usize);
  match frame.format {
    PixelFormat::Bgra8888 => {
      let plane = &frame.planes[0];
      if plane.bytes_per_pixel < 4 {
        return Err(ConversionError::PlaneGeometry {
          plane: 0,
          reason: format!("BGRA 像素跨度 {} 小于 4", plane.bytes_per_pixel),
        });
      }
      check_plane(0, plane, w, h)?;
      // 最后一个像素需要完整的 3 个颜色字节，前面的检查已保证不会溢出
      let last = (h - 1) * plane.bytes_per_row + (w - 1) * plane.bytes_per_pixel + 3;
      if plane.bytes.len() < last {
        return Err(ConversionError::PlaneGeometry {
          plane: 0,
          reason: "最后一个像素不完整".to_string(),
        });
      }
    }
    PixelFormat::Yuv420 => {
      check_plane(0, &frame.planes[0], w, h)?;
      let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
      check_plane(1, &frame.planes[1], cw, ch)?;
      check_plane(2, &frame.planes[2], cw, ch)?;
    }
  }
  Ok(())
}

fn bgra_to_rgb(frame: &Frame) -> RgbImage {
  let plane = &frame.planes[0];
  ImageBuffer::from_fn(frame.width, frame.height, |x, y| {
    let idx = y as usize * plane.bytes_per_row + x as usize * plane.bytes_per_pixel;
    let px = &plane.bytes[idx..idx + 3];
    image::Rgb([px[2], px[1], px[0]])
  })
}

#[inline]
fn clamp_channel(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

/// 单像素 YUV 到 RGB 的变换，U、V 以 128 为中心
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;
  [
    clamp_channel(y + 1.402 * v),
    clamp_channel(y - 0.344 * u - 0.714 * v),
    clamp_channel(y + 1.772 * u),
  ]
}

fn yuv420_to_rgb(frame: &Frame) -> RgbImage {
  let (y_plane, u_plane, v_plane) = (&frame.planes[0], &frame.planes[1], &frame.planes[2]);
  ImageBuffer::from_fn(frame.width, frame.height, |x, y| {
    let (x, y) = (x as usize, y as usize);
    let y_idx = y * y_plane.bytes_per_row + x * y_plane.bytes_per_pixel;
    let u_idx = (y / 2) * u_plane.bytes_per_row + (x / 2) * u_plane.bytes_per_pixel;
    let v_idx = (y / 2) * v_plane.bytes_per_row + (x / 2) * v_plane.bytes_per_pixel;
    image::Rgb(yuv_to_rgb(
      y_plane.bytes[y_idx],
      u_plane.bytes[u_idx],
      v_plane.bytes[v_idx],
    ))
  })
}

/// 按设备方向旋转图像（顺时针）
pub fn rotate(image: RgbImage, orientation: Orientation) -> RgbImage {
  match orientation {
    Orientation::Deg0 => image,
    Orientation::Deg90 => imageops::rotate90(&image),
    Orientation::Deg180 => imageops::rotate180(&image),
    Orientation::Deg270 => imageops::rotate270(&image),
  }
}

/// 将相机帧转换为 RGB 图像，`orientation` 缺失时不做旋转
pub fn convert(frame: &Frame, orientation: Option<Orientation>) -> Result<RgbImage, ConversionError> {
  check_planes(frame)?;

  let image = match frame.format {
    PixelFormat::Bgra8888 => bgra_to_rgb(frame),
    PixelFormat::Yuv420 => yuv420_to_rgb(frame),
  };

  Ok(match orientation {
    Some(orientation) => rotate(image, orientation),
    None => image,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bgra_swaps_channels_and_drops_alpha() {
    let frame = Frame::bgra(2, 1, vec![10, 20, 30, 255, 1, 2, 3, 0]);
    let image = convert(&frame, None).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
    assert_eq!(image.get_pixel(1, 0).0, [3, 2, 1]);
  }

  #[test]
  fn bgra_honours_row_padding() {
    // 每行 12 字节，其中 4 字节为填充
    let mut data = vec![0u8; 24];
    data[12..16].copy_from_slice(&[7, 8, 9, 255]);
    let frame = Frame {
      planes: vec![Plane::new(data, 12, 4)],
      ..Frame::bgra(2, 2, Vec::new())
    };
    let image = convert(&frame, None).unwrap();
    assert_eq!(image.get_pixel(0, 1).0, [9, 8, 7]);
  }

  #[test]
  fn yuv_reference_colours() {
    assert_eq!(yuv_to_rgb(128, 128, 128), [128, 128, 128]);
    assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
    assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
    // 纯红附近：V 偏高
    let [r, g, b] = yuv_to_rgb(76, 85, 255);
    assert!(r > 240 && g < 10 && b < 10, "{:?}", (r, g, b));
  }

  #[test]
  fn yuv_upsamples_chroma_per_2x2_block() {
    let y = vec![100; 16];
    // 左上块偏红，其余中性
    let u = vec![128, 128, 128, 128];
    let v = vec![200, 128, 128, 128];
    let frame = Frame::i420(4, 4, y, u, v);
    let image = convert(&frame, None).unwrap();
    let tinted = image.get_pixel(1, 1).0;
    let neutral = image.get_pixel(2, 2).0;
    assert!(tinted[0] > neutral[0]);
    assert_eq!(image.get_pixel(0, 0), image.get_pixel(1, 1));
    assert_eq!(neutral, [100, 100, 100]);
  }

  #[test]
  fn yuv_supports_interleaved_chroma_stride() {
    // 半平面布局：U、V 的像素跨度为 2
    let y = vec![50; 4];
    let uv = vec![128, 200];
    let frame = Frame {
      width: 2,
      height: 2,
      format: PixelFormat::Yuv420,
      planes: vec![
        Plane::new(y, 2, 1),
        Plane::new(uv, 2, 2),
        Plane::new(vec![200, 128], 2, 2),
      ],
      index: 0,
      timestamp_ms: 0,
    };
    let image = convert(&frame, None).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, yuv_to_rgb(50, 128, 200));
  }

  #[test]
  fn rotation_swaps_dimensions() {
    let frame = Frame::bgra(3, 2, vec![0; 24]);
    let image = convert(&frame, Some(Orientation::Deg90)).unwrap();
    assert_eq!(image.dimensions(), (2, 3));
    let image = convert(&frame, Some(Orientation::Deg180)).unwrap();
    assert_eq!(image.dimensions(), (3, 2));
  }

  #[test]
  fn rotation_moves_top_left_pixel() {
    let mut data = vec![0; 24];
    data[0..4].copy_from_slice(&[0, 0, 255, 255]);
    let frame = Frame::bgra(3, 2, data);
    // 顺时针 90° 后左上角移到右上角
    let image = convert(&frame, Some(Orientation::Deg90)).unwrap();
    assert_eq!(image.get_pixel(1, 0).0, [255, 0, 0]);
  }

  #[test]
  fn rejects_short_plane() {
    let frame = Frame::bgra(4, 4, vec![0; 40]);
    assert!(matches!(
      convert(&frame, None),
      Err(ConversionError::PlaneGeometry { plane: 0, .. })
    ));
  }

  #[test]
  fn rejects_missing_chroma_plane() {
    let mut frame = Frame::i420(2, 2, vec![0; 4], vec![0; 1], vec![0; 1]);
    frame.planes.pop();
    assert_eq!(
      convert(&frame, None),
      Err(ConversionError::PlaneCount {
        expected: 3,
        actual: 2
      })
    );
  }

  #[test]
  fn rejects_zero_dimensions() {
    let frame = Frame::bgra(0, 4, Vec::new());
    assert!(matches!(
      convert(&frame, None),
      Err(ConversionError::EmptyFrame { .. })
    ));
  }

  #[test]
  fn rejects_zero_pixel_stride() {
    let frame = Frame {
      planes: vec![
        Plane::new(vec![0; 4], 2, 1),
        Plane::new(vec![0; 1], 1, 0),
        Plane::new(vec![0; 1], 1, 1),
      ],
      ..Frame::i420(2, 2, Vec::new(), Vec::new(), Vec::new())
    };
    assert!(convert(&frame, None).is_err());
  }

  #[test]
  fn rejects_strides_that_overflow() {
    let frame = Frame {
      planes: vec![Plane::new(vec![0; 64], usize::MAX / 2, 4)],
      ..Frame::bgra(2, 3, Vec::new())
    };
    assert!(matches!(
      convert(&frame, None),
      Err(ConversionError::PlaneGeometry { plane: 0, .. })
    ));

    let frame = Frame {
      planes: vec![
        Plane::new(vec![0; 16], 4, 1),
        Plane::new(vec![0; 4], usize::MAX, usize::MAX / 2),
        Plane::new(vec![0; 4], 2, 1),
      ],
      ..Frame::i420(4, 4, Vec::new(), Vec::new(), Vec::new())
    };
    assert!(matches!(
      convert(&frame, None),
      Err(ConversionError::PlaneGeometry { plane: 1, .. })
    ));
  }
}
