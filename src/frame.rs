// 该文件是 Zhunxing （准星） 项目的一部分。
// src/frame.rs - 相机帧定义
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

use std::fmt;

/// 相机帧的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  /// 单平面 4 通道，内存顺序 B, G, R, A
  Bgra8888,
  /// 三平面 YUV 4:2:0（Y, U, V），色度平面宽高减半
  Yuv420,
}

impl PixelFormat {
  pub fn plane_count(&self) -> usize {
    match self {
      PixelFormat::Bgra8888 => 1,
      PixelFormat::Yuv420 => 3,
    }
  }
}

/// 图像平面
#[derive(Debug, Clone)]
pub struct Plane {
  pub bytes: Box<[u8]>,
  /// 每行字节数（行跨度）
  pub bytes_per_row: usize,
  /// 相邻像素间的字节数。交错 UV 布局为 2
  pub bytes_per_pixel: usize,
}

impl Plane {
  pub fn new(bytes: impl Into<Box<[u8]>>, bytes_per_row: usize, bytes_per_pixel: usize) -> Self {
    Self {
      bytes: bytes.into(),
      bytes_per_row,
      bytes_per_pixel,
    }
  }
}

/// 设备方向，决定转换后的旋转角度（顺时针）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Orientation {
  /// 由角度构造，接受负角度（-90 等价于 270）
  pub fn from_degrees(degrees: i32) -> Option<Self> {
    match degrees.rem_euclid(360) {
      0 => Some(Orientation::Deg0),
      90 => Some(Orientation::Deg90),
      180 => Some(Orientation::Deg180),
      270 => Some(Orientation::Deg270),
      _ => None,
    }
  }

  pub fn degrees(&self) -> u32 {
    match self {
      Orientation::Deg0 => 0,
      Orientation::Deg90 => 90,
      Orientation::Deg180 => 180,
      Orientation::Deg270 => 270,
    }
  }

  /// 旋转后宽高是否互换
  pub fn swaps_dimensions(&self) -> bool {
    matches!(self, Orientation::Deg90 | Orientation::Deg270)
  }
}

impl fmt::Display for Orientation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}°", self.degrees())
  }
}

/// 一帧相机数据
#[derive(Clone)]
pub struct Frame {
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
  pub planes: Vec<Plane>,
  /// 帧源内的序号
  pub index: u64,
  /// 采集时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl fmt::Debug for Frame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Frame")
      .field("width", &self.width)
      .field("height", &self.height)
      .field("format", &self.format)
      .field("planes", &self.planes.len())
      .field("index", &self.index)
      .field("timestamp_ms", &self.timestamp_ms)
      .finish()
  }
}

impl Frame {
  /// 紧密排列的 BGRA 帧
  pub fn bgra(width: u32, height: u32, data: Vec<u8>) -> Self {
    Self {
      width,
      height,
      format: PixelFormat::Bgra8888,
      planes: vec![Plane::new(data, width as usize * 4, 4)],
      index: 0,
      timestamp_ms: 0,
    }
  }

  /// 紧密排列的 I420 帧（Y, U, V 三个独立平面）
  pub fn i420(width: u32, height: u32, y: Vec<u8>, u: Vec<u8>, v: Vec<u8>) -> Self {
    let chroma_row = (width as usize).div_ceil(2);
    Self {
      width,
      height,
      format: PixelFormat::Yuv420,
      planes: vec![
        Plane::new(y, width as usize, 1),
        Plane::new(u, chroma_row, 1),
        Plane::new(v, chroma_row, 1),
      ],
      index: 0,
      timestamp_ms: 0,
    }
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
    self.timestamp_ms = timestamp_ms;
    self
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn orientation_accepts_negative_degrees() {
    assert_eq!(Orientation::from_degrees(-90), Some(Orientation::Deg270));
    assert_eq!(Orientation::from_degrees(450), Some(Orientation::Deg90));
    assert_eq!(Orientation::from_degrees(45), None);
    assert!(Orientation::Deg90.swaps_dimensions());
    assert!(!Orientation::Deg180.swaps_dimensions());
  }

  #[test]
  fn i420_constructor_lays_out_three_planes() {
    let frame = Frame::i420(5, 3, vec![0; 15], vec![0; 6], vec![0; 6]);
    assert_eq!(frame.planes.len(), 3);
    assert_eq!(frame.planes[1].bytes_per_row, 3);
    assert_eq!(frame.format.plane_count(), 3);
  }
}
