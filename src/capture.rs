// 该文件是 Zhunxing （准星） 项目的一部分。
// src/capture.rs - 拍摄与裁剪
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use image::{RgbImage, imageops};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  decode::{BoundingBox, Detection},
  storage::{CaptureStore, SavedAsset, StorageError},
};

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("裁剪区域为空: {width}x{height} @ ({x}, {y})")]
  EmptyRegion { x: u32, y: u32, width: u32, height: u32 },
  #[error("存储错误: {0}")]
  StorageError(#[from] StorageError),
}

/// 一次拍摄尝试的结果，随流水线更新通知界面
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CaptureOutcome {
  Saved(SavedAsset),
  Failed(String),
}

/// 一次性拍摄请求标志，可在任意线程设置
#[derive(Debug, Clone, Default)]
pub struct CaptureLatch {
  requested: Arc<AtomicBool>,
}

impl CaptureLatch {
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置请求，重复设置无副作用
  pub fn request(&self) {
    self.requested.store(true, Ordering::Release);
  }

  pub fn is_requested(&self) -> bool {
    self.requested.load(Ordering::Acquire)
  }

  /// 取走请求并清除标志，返回取走前是否已设置
  pub fn take(&self) -> bool {
    self.requested.swap(false, Ordering::AcqRel)
  }
}

/// 原图像素坐标下的裁剪区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// 将归一化边界框映射到 `width`x`height` 的像素坐标
///
/// 起点限制在 `[0, 尺寸]` 内，宽高限制在剩余范围内。
pub fn crop_region(bbox: &BoundingBox, width: u32, height: u32) -> CropRegion {
  let (w, h) = (width as f32, height as f32);
  // `f32::max` 丢弃 NaN，非有限坐标落到边界上
  let x = (bbox.left * w).max(0.0).min(w);
  let y = (bbox.top * h).max(0.0).min(h);
  let crop_w = (bbox.width * w).max(0.0).min(w - x);
  let crop_h = (bbox.height * h).max(0.0).min(h - y);

  CropRegion {
    x: x as u32,
    y: y as u32,
    width: crop_w as u32,
    height: crop_h as u32,
  }
}

/// 按检测框裁剪原图，空区域返回错误
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage, CaptureError> {
  let region = crop_region(bbox, image.width(), image.height());
  // 取整后仍可能越界一个像素
  let width = region.width.min(image.width().saturating_sub(region.x));
  let height = region.height.min(image.height().saturating_sub(region.y));
  if width == 0 || height == 0 {
    return Err(CaptureError::EmptyRegion {
      x: region.x,
      y: region.y,
      width,
      height,
    });
  }
  debug!(
    "裁剪区域: {}x{} @ ({}, {})",
    width, height, region.x, region.y
  );
  Ok(imageops::crop_imm(image, region.x, region.y, width, height).to_image())
}

/// 裁剪最佳检测结果并保存
pub fn capture_and_crop(
  image: &RgbImage,
  best: &Detection,
  store: &dyn CaptureStore,
) -> Result<SavedAsset, CaptureError> {
  let cropped = crop(image, &best.bbox)?;
  Ok(store.save(&cropped)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bbox(left: f32, top: f32, width: f32, height: f32) -> BoundingBox {
    BoundingBox {
      left,
      top,
      width,
      height,
    }
  }

  #[test]
  fn latch_is_idempotent_and_one_shot() {
    let latch = CaptureLatch::new();
    assert!(!latch.take());
    latch.request();
    latch.request();
    assert!(latch.is_requested());
    assert!(latch.take());
    assert!(!latch.is_requested());
    assert!(!latch.take());
  }

  #[test]
  fn maps_normalised_box_to_pixels() {
    let region = crop_region(&bbox(0.25, 0.5, 0.5, 0.25), 400, 200);
    assert_eq!(
      region,
      CropRegion {
        x: 100,
        y: 100,
        width: 200,
        height: 50
      }
    );
  }

  #[test]
  fn clamps_origin_and_extent() {
    let region = crop_region(&bbox(-0.1, 0.8, 0.5, 0.5), 100, 100);
    assert_eq!(region.x, 0);
    assert_eq!(region.y, 80);
    assert_eq!(region.width, 50);
    assert_eq!(region.height, 20);
  }

  #[test]
  fn crop_copies_region() {
    let image = RgbImage::from_fn(10, 10, |x, y| image::Rgb([x as u8, y as u8, 0]));
    let cropped = crop(&image, &bbox(0.2, 0.3, 0.5, 0.4)).unwrap();
    assert_eq!(cropped.dimensions(), (5, 4));
    assert_eq!(cropped.get_pixel(0, 0).0, [2, 3, 0]);
  }

  #[test]
  fn zero_width_box_fails() {
    let image = RgbImage::new(10, 10);
    assert!(matches!(
      crop(&image, &bbox(0.5, 0.5, 0.0, 0.4)),
      Err(CaptureError::EmptyRegion { .. })
    ));
    // 起点在右边缘之外
    assert!(crop(&image, &bbox(1.2, 0.0, 0.5, 0.5)).is_err());
  }

  #[test]
  fn non_finite_box_fails_without_panicking() {
    let image = RgbImage::new(10, 10);
    for bbox in [
      bbox(f32::NAN, 0.1, 0.5, 0.5),
      bbox(0.1, 0.1, f32::NAN, 0.5),
      bbox(0.1, f32::INFINITY, 0.5, 0.5),
      bbox(0.1, 0.1, 0.5, f32::NEG_INFINITY),
    ] {
      assert!(
        matches!(crop(&image, &bbox), Err(CaptureError::EmptyRegion { .. })),
        "{:?}",
        bbox
      );
    }
  }

  #[test]
  fn capture_saves_cropped_png() {
    let dir = tempfile::tempdir().unwrap();
    let store = crate::storage::DirectoryStore::new(dir.path());
    let image = RgbImage::from_pixel(20, 10, image::Rgb([9, 8, 7]));
    let best = Detection {
      bbox: bbox(0.5, 0.0, 0.5, 0.5),
      confidence: 0.9,
      class_id: 0,
      label: "card".to_string(),
    };
    let saved = capture_and_crop(&image, &best, &store).unwrap();
    let loaded = image::open(&saved.path).unwrap().to_rgb8();
    assert_eq!(loaded.dimensions(), (10, 5));
  }
}
