// 该文件是 Zhunxing （准星） 项目的一部分。
// src/input/read_image_file.rs - 图像文件回放输入
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

//! 把一张图像文件当作相机，重复输出同一帧。
//!
//! `image:///path/to/photo.jpg?repeat=30&orientation=90&format=i420`
//!
//! - `repeat`：输出帧数，默认 1，0 表示无限
//! - `orientation`：方向提示（度）
//! - `format`：`bgra`（默认）或 `i420`

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::{FrameSource, orientation_query, timestamp_ms};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, Orientation, PixelFormat},
  url_path, url_query,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(String),
}

pub struct ImageFileInput {
  template: Frame,
  /// 剩余帧数，`None` 表示无限
  remaining: Option<u64>,
  orientation: Option<Orientation>,
  next_index: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = url_path(url);
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    let format = match url_query::<String>(url, "format").as_deref() {
      None | Some("bgra") => PixelFormat::Bgra8888,
      Some("i420") => PixelFormat::Yuv420,
      Some(other) => return Err(ImageFileInputError::UnsupportedFormat(other.to_string())),
    };
    let repeat = url_query::<u64>(url, "repeat").unwrap_or(1);
    info!(
      "图像文件输入: {} ({}x{}, {:?}, 重复 {} 次)",
      path,
      image.width(),
      image.height(),
      format,
      repeat
    );

    Ok(
      Self::new(&image, format)
        .with_repeat(repeat)
        .with_orientation(orientation_query(url)),
    )
  }
}

impl ImageFileInput {
  pub fn new(image: &RgbImage, format: PixelFormat) -> Self {
    let template = match format {
      PixelFormat::Bgra8888 => rgb_to_bgra(image),
      PixelFormat::Yuv420 => rgb_to_i420(image),
    };
    Self {
      template,
      remaining: Some(1),
      orientation: None,
      next_index: 0,
    }
  }

  /// 0 表示无限重复
  pub fn with_repeat(mut self, repeat: u64) -> Self {
    self.remaining = (repeat > 0).then_some(repeat);
    self
  }

  pub fn with_orientation(mut self, orientation: Option<Orientation>) -> Self {
    self.orientation = orientation;
    self
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(remaining) = self.remaining.as_mut() {
      if *remaining == 0 {
        return None;
      }
      *remaining -= 1;
    }
    let index = self.next_index;
    self.next_index += 1;
    Some(
      self
        .template
        .clone()
        .with_index(index)
        .with_timestamp(timestamp_ms()),
    )
  }
}

impl FrameSource for ImageFileInput {
  fn resolution(&self) -> (u32, u32) {
    self.template.dimensions()
  }

  fn orientation(&self) -> Option<Orientation> {
    self.orientation
  }
}

fn rgb_to_bgra(image: &RgbImage) -> Frame {
  let data = image
    .pixels()
    .flat_map(|p| [p[2], p[1], p[0], u8::MAX])
    .collect();
  Frame::bgra(image.width(), image.height(), data)
}

/// BT.601 全范围，色度取每个 2x2 块左上角的像素
fn rgb_to_i420(image: &RgbImage) -> Frame {
  let (width, height) = image.dimensions();
  let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));

  let luma = |p: &image::Rgb<u8>| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
  let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;

  let y = image.pixels().map(|p| to_u8(luma(p))).collect();
  let mut u = Vec::with_capacity((cw * ch) as usize);
  let mut v = Vec::with_capacity((cw * ch) as usize);
  for cy in 0..ch {
    for cx in 0..cw {
      let p = image.get_pixel(cx * 2, cy * 2);
      let l = luma(p);
      u.push(to_u8(128.0 + (p[2] as f32 - l) / 1.772));
      v.push(to_u8(128.0 + (p[0] as f32 - l) / 1.402));
    }
  }
  Frame::i420(width, height, y, u, v)
}
