// 该文件是 Zhunxing （准星） 项目的一部分。
// src/preprocess.rs - 模型输入张量预处理
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

use image::{RgbImage, imageops};

const RGB_CHANNELS: usize = 3;

/// NHWC 排列的归一化输入张量，每个值位于 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTensor {
  data: Box<[f32]>,
  width: u32,
  height: u32,
}

impl PreparedTensor {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 还原为 u8 像素值，供整型输入的模型使用
  pub fn to_u8(&self) -> Vec<u8> {
    self
      .data
      .iter()
      .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
      .collect()
  }
}

/// 最近邻缩放到模型输入尺寸后除以 255
pub fn prepare(image: &RgbImage, input_width: u32, input_height: u32) -> PreparedTensor {
  let resized;
  let source = if image.dimensions() == (input_width, input_height) {
    image
  } else {
    resized = imageops::resize(
      image,
      input_width,
      input_height,
      imageops::FilterType::Nearest,
    );
    &resized
  };

  let data = source
    .as_raw()
    .iter()
    .map(|&v| v as f32 / 255.0)
    .collect::<Vec<f32>>()
    .into_boxed_slice();

  PreparedTensor {
    data,
    width: input_width,
    height: input_height,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn produces_fixed_length_in_unit_range() {
    let image = RgbImage::from_fn(37, 19, |x, y| Rgb([(x * 7) as u8, (y * 13) as u8, 255]));
    let tensor = prepare(&image, 16, 8);
    assert_eq!(tensor.len(), 3 * 16 * 8);
    assert!(tensor.as_nhwc().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn values_are_channel_interleaved() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
    let tensor = prepare(&image, 2, 2);
    assert_eq!(&tensor.as_nhwc()[..3], &[1.0, 0.0, 0.2]);
    assert_eq!(&tensor.as_nhwc()[3..6], &[1.0, 0.0, 0.2]);
  }

  #[test]
  fn nearest_neighbour_keeps_exact_colours() {
    let image = RgbImage::from_fn(4, 4, |x, _| {
      if x < 2 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
    });
    let tensor = prepare(&image, 2, 2);
    let values = tensor.as_nhwc();
    assert_eq!(&values[..3], &[1.0, 0.0, 0.0]);
    assert_eq!(&values[3..6], &[0.0, 0.0, 1.0]);
  }

  #[test]
  fn u8_round_trip_is_lossless() {
    let image = RgbImage::from_fn(3, 3, |x, y| Rgb([x as u8 * 40, y as u8 * 90, 7]));
    let tensor = prepare(&image, 3, 3);
    assert_eq!(tensor.to_u8(), image.into_raw());
  }
}
