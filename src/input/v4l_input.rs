// 该文件是 Zhunxing （准星） 项目的一部分。
// src/input/v4l_input.rs - V4L2 相机输入
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

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use super::{FrameSource, orientation_query, timestamp_ms};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, Orientation, PixelFormat, Plane},
  url_path, url_query,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
}

/// V4L2 内存映射采集，支持 YU12 (I420) 与 AR24/XR24 (BGRA)
pub struct V4lInput {
  stream: Stream<'static>,
  format: PixelFormat,
  width: u32,
  height: u32,
  stride: usize,
  orientation: Option<Orientation>,
  next_index: u64,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemeMismatch);
    }

    // v4l:///dev/video0?width=1280&height=720
    let device_path = match url_path(url) {
      path if path.is_empty() || path == "/" => DEFAULT_DEVICE.to_string(),
      path => path,
    };
    let device = Device::with_path(&device_path)?;

    let mut requested = device.format()?;
    requested.width = url_query(url, "width").unwrap_or(DEFAULT_WIDTH);
    requested.height = url_query(url, "height").unwrap_or(DEFAULT_HEIGHT);
    requested.fourcc = FourCC::new(b"YU12");
    let actual = device.set_format(&requested)?;

    let format = match &actual.fourcc.repr {
      b"YU12" => PixelFormat::Yuv420,
      b"AR24" | b"XR24" => PixelFormat::Bgra8888,
      _ => return Err(V4lInputError::UnsupportedPixelFormat(actual.fourcc.to_string())),
    };
    info!(
      "V4L 设备 {}: {}x{} {} (行跨度 {})",
      device_path, actual.width, actual.height, actual.fourcc, actual.stride
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
    Ok(Self {
      stream,
      format,
      width: actual.width,
      height: actual.height,
      stride: actual.stride as usize,
      orientation: orientation_query(url),
      next_index: 0,
    })
  }
}

fn split_planes(format: PixelFormat, rows: usize, stride: usize, data: &[u8]) -> Option<Vec<Plane>> {
  match format {
    PixelFormat::Bgra8888 => {
      let bytes = data.get(..stride * rows)?;
      Some(vec![Plane::new(bytes, stride, 4)])
    }
    PixelFormat::Yuv420 => {
      let luma = stride * rows;
      let chroma_stride = stride.div_ceil(2);
      let chroma = chroma_stride * rows.div_ceil(2);
      let y = data.get(..luma)?;
      let u = data.get(luma..luma + chroma)?;
      let v = data.get(luma + chroma..luma + 2 * chroma)?;
      Some(vec![
        Plane::new(y, stride, 1),
        Plane::new(u, chroma_stride, 1),
        Plane::new(v, chroma_stride, 1),
      ])
    }
  }
}

impl Iterator for V4lInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let (data, meta) = match self.stream.next() {
      Ok(buffer) => buffer,
      Err(e) => {
        error!("采集失败: {}", e);
        return None;
      }
    };
    let used = (meta.bytesused as usize).min(data.len());
    let data = if used > 0 { &data[..used] } else { data };

    let Some(planes) = split_planes(self.format, self.height as usize, self.stride, data) else {
      warn!("缓冲区长度 {} 不足, 停止采集", data.len());
      return None;
    };

    let index = self.next_index;
    self.next_index += 1;
    Some(Frame {
      width: self.width,
      height: self.height,
      format: self.format,
      planes,
      index,
      timestamp_ms: timestamp_ms(),
    })
  }
}

impl FrameSource for V4lInput {
  fn resolution(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn orientation(&self) -> Option<Orientation> {
    self.orientation
  }
}
