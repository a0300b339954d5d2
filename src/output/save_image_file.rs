// 该文件是 Zhunxing （准星） 项目的一部分。
// src/output/save_image_file.rs - 预览图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::GuidanceThresholds,
  output::{Render, draw::Draw},
  pipeline::PipelineUpdate,
  url_path, url_query,
};

#[derive(Error, Debug)]
pub enum PreviewOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("记录序列化错误: {0}")]
  RecordError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把最近一帧的标注图写到固定文件，可选同时写出 JSON 记录
///
/// `image:///tmp/preview.png?record=true`
pub struct PreviewOutput {
  path: PathBuf,
  record: bool,
  draw: Draw,
}

impl FromUrlWithScheme for PreviewOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for PreviewOutput {
  type Error = PreviewOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(PreviewOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let required = GuidanceThresholds::default().required_stable_frames;
    Ok(Self::new(url_path(uri), required).with_record(url_query(uri, "record").unwrap_or(false)))
  }
}

impl PreviewOutput {
  pub fn new(path: impl Into<PathBuf>, required_stable_frames: u32) -> Self {
    Self {
      path: path.into(),
      record: false,
      draw: Draw::new(required_stable_frames),
    }
  }

  /// 进度条满格所需的稳定帧数
  pub fn with_required_stable_frames(mut self, required: u32) -> Self {
    self.draw = Draw::new(required);
    self
  }

  pub fn with_record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn record_path(&self) -> PathBuf {
    self.path.with_extension("json")
  }
}

impl Render for PreviewOutput {
  type Error = PreviewOutputError;

  fn render(&self, update: &PipelineUpdate) -> Result<(), Self::Error> {
    let Some(raster) = update.raster.as_ref() else {
      warn!("第 {} 帧没有可用图像, 跳过预览", update.frame_index);
      return Ok(());
    };

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut image = RgbImage::clone(raster);
    self.draw.draw_update(&mut image, update);
    image.save(&self.path)?;
    debug!("预览已更新: {}", self.path.display());

    if self.record {
      std::fs::write(self.record_path(), serde_json::to_string_pretty(update)?)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::guidance::GuidanceState;
  use std::{sync::Arc, time::Duration};

  #[test]
  fn writes_preview_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = PreviewOutput::new(dir.path().join("out/preview.png"), 5).with_record(true);
    let update = PipelineUpdate {
      frame_index: 7,
      detections: Vec::new(),
      guidance: GuidanceState::default(),
      capture: None,
      inference_time: Duration::from_millis(12),
      raster: Some(Arc::new(RgbImage::new(16, 12))),
    };
    output.render(&update).unwrap();

    let preview = image::open(output.path()).unwrap();
    assert_eq!((preview.width(), preview.height()), (16, 12));
    let record: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/preview.json")).unwrap())
        .unwrap();
    assert_eq!(record["frame_index"], 7);
    assert!(record.get("raster").is_none());
  }

  #[test]
  fn missing_raster_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let output = PreviewOutput::new(dir.path().join("preview.png"), 5);
    let update = PipelineUpdate {
      frame_index: 1,
      detections: Vec::new(),
      guidance: GuidanceState::default(),
      capture: None,
      inference_time: Duration::ZERO,
      raster: None,
    };
    output.render(&update).unwrap();
    assert!(!output.path().exists());
  }

  #[test]
  fn from_url_reads_options() {
    let url = Url::parse("image:///tmp/preview.png?record=true").unwrap();
    let output = PreviewOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), Path::new("/tmp/preview.png"));
    assert!(output.record);
  }
}
