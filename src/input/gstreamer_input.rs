// 该文件是 Zhunxing （准星） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 通过 appsink 拉取原始帧，不做颜色转换，直接以 I420 或 BGRA 平面交给流水线。
//!
//! ## URL 格式
//!
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30&format=I420`
//! - `gst://file/path/to/video.mp4?format=BGRA&orientation=90`
//!
//! `camera` 源另外接受 `io-mode` 与 `source-format`（相机端格式，默认 `YUY2`）。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::{FrameSource, orientation_query, timestamp_ms};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, Orientation, PixelFormat, Plane},
  url_path,
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0}")]
  UnsupportedFormat(String),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区长度不足: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 30;

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  orientation: Option<Orientation>,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };
    let item = GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query
        .get("source-format")
        .cloned()
        .unwrap_or_else(|| "YUY2".to_string()),
      width: parse("width", DEFAULT_WIDTH),
      height: parse("height", DEFAULT_HEIGHT),
      fps: parse("fps", DEFAULT_FPS),
    };
    Self {
      items: vec![item],
      orientation: None,
    }
  }

  fn build_file_pipeline(path: &str) -> Self {
    Self {
      items: vec![GStreamerInputBuilderItem::FileSource(path.to_string())],
      orientation: None,
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    );

    info!("GStreamer 管道: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      orientation: self.orientation,
      resolution: (0, 0),
      next_index: 0,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = url_path(url);
    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(&path, &query),
      Some("file") => Self::build_file_pipeline(&path),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    let format = query
      .get("format")
      .map(|f| f.to_ascii_uppercase())
      .unwrap_or_else(|| "I420".to_string());
    if format != "I420" && format != "BGRA" {
      return Err(GStreamerInputError::UnsupportedFormat(format));
    }
    builder
      .items
      .push(GStreamerInputBuilderItem::TargetFormat { format });
    builder.orientation = orientation_query(url);

    Ok(builder)
  }
}

/// GStreamer 视频输入，析构时停止管道
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  orientation: Option<Orientation>,
  /// 首帧到达前为 (0, 0)
  resolution: (u32, u32),
  next_index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      tracing::warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        error!("拉取帧失败: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    let mut frame = convert_sample_to_frame(sample)
      .map_err(|e| {
        error!("解析帧失败: {}", e);
        e
      })
      .ok()?;
    self.resolution = frame.dimensions();
    frame.index = self.next_index;
    frame.timestamp_ms = timestamp_ms();
    self.next_index += 1;
    Some(frame)
  }
}

impl FrameSource for GStreamerInput {
  fn resolution(&self) -> (u32, u32) {
    self.resolution
  }

  fn orientation(&self) -> Option<Orientation> {
    self.orientation
  }
}

fn copy_plane(
  data: &[u8],
  offset: usize,
  stride: usize,
  rows: usize,
  bytes_per_pixel: usize,
) -> Result<Plane, GStreamerInputError> {
  let expected = offset + stride * rows;
  let bytes = data
    .get(offset..expected)
    .ok_or(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    })?;
  Ok(Plane::new(bytes, stride, bytes_per_pixel))
}

fn convert_sample_to_frame(sample: gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width();
  let height = video_info.height();
  let rows = height as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e))
  })?;
  let data = map.as_slice();
  let strides = video_info.stride();
  let offsets = video_info.offset();

  let (format, planes) = match video_info.format() {
    gst_video::VideoFormat::Bgra => {
      let plane = copy_plane(data, offsets[0], strides[0] as usize, rows, 4)?;
      (PixelFormat::Bgra8888, vec![plane])
    }
    gst_video::VideoFormat::I420 => {
      let chroma_rows = rows.div_ceil(2);
      let planes = vec![
        copy_plane(data, offsets[0], strides[0] as usize, rows, 1)?,
        copy_plane(data, offsets[1], strides[1] as usize, chroma_rows, 1)?,
        copy_plane(data, offsets[2], strides[2] as usize, chroma_rows, 1)?,
      ];
      (PixelFormat::Yuv420, planes)
    }
    other => return Err(GStreamerInputError::UnsupportedFormat(format!("{:?}", other))),
  };

  Ok(Frame {
    width,
    height,
    format,
    planes,
    index: 0,
    timestamp_ms: 0,
  })
}
