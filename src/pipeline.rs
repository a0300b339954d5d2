// 该文件是 Zhunxing （准星） 项目的一部分。
// src/pipeline.rs - 单帧处理流水线
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

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
  capture::{CaptureLatch, CaptureOutcome, capture_and_crop},
  config::PipelineConfig,
  convert::convert,
  decode::{Detection, decode, sort_by_confidence, suppress_overlaps},
  frame::{Frame, Orientation},
  guidance::{GuidanceState, GuidanceTracker},
  model::Detector,
  preprocess::prepare,
  storage::CaptureStore,
};

/// 每个被处理的帧发布一次的结果
#[derive(Debug, Clone, Serialize)]
pub struct PipelineUpdate {
  pub frame_index: u64,
  /// 按置信度降序
  pub detections: Vec<Detection>,
  pub guidance: GuidanceState,
  pub capture: Option<CaptureOutcome>,
  pub inference_time: Duration,
  /// 转换后的原图，转换失败时为空
  #[serde(skip)]
  pub raster: Option<Arc<RgbImage>>,
}

impl PipelineUpdate {
  pub fn best(&self) -> Option<&Detection> {
    self.detections.first()
  }
}

/// 转换、预处理、推理、解码、引导与拍摄的同步组合
///
/// 任何一步失败都只会让本帧没有检测结果，流水线本身继续可用。
pub struct Pipeline {
  config: PipelineConfig,
  detector: Detector,
  tracker: GuidanceTracker,
  store: Box<dyn CaptureStore>,
}

impl Pipeline {
  pub fn new(config: PipelineConfig, detector: Detector, store: Box<dyn CaptureStore>) -> Self {
    let tracker = GuidanceTracker::new(config.guidance);
    Self {
      config,
      detector,
      tracker,
      store,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn detector(&self) -> &Detector {
    &self.detector
  }

  pub fn guidance(&self) -> GuidanceState {
    self.tracker.state()
  }

  pub fn store(&self) -> &dyn CaptureStore {
    self.store.as_ref()
  }

  fn detect(&mut self, raster: &RgbImage) -> Vec<Detection> {
    let tensor = prepare(raster, self.config.input_width, self.config.input_height);
    let raw = match self.detector.infer(&tensor) {
      Ok(Some(raw)) => raw,
      Ok(None) => return Vec::new(),
      Err(e) => {
        error!("推理失败: {}", e);
        return Vec::new();
      }
    };

    let mut detections = match decode(
      &raw,
      self.detector.labels(),
      self.config.confidence_threshold,
      self.config.num_classes,
    ) {
      Ok(detections) => detections,
      Err(e) => {
        error!("解码失败: {}", e);
        return Vec::new();
      }
    };

    sort_by_confidence(&mut detections);
    if let Some(iou) = self.config.nms_threshold {
      detections = suppress_overlaps(detections, iou);
    }
    detections
  }

  /// 处理一帧
  ///
  /// 拍摄请求仅在本帧有检测结果时被取走，取走后无论成败都已清除。
  pub fn process(
    &mut self,
    frame: Frame,
    orientation: Option<Orientation>,
    latch: &CaptureLatch,
  ) -> PipelineUpdate {
    let frame_index = frame.index;
    let start = Instant::now();

    let raster = match convert(&frame, orientation) {
      Ok(raster) => Some(raster),
      Err(e) => {
        warn!("第 {} 帧转换失败: {}", frame_index, e);
        None
      }
    };
    drop(frame);

    let detections = match raster.as_ref() {
      Some(raster) => self.detect(raster),
      None => Vec::new(),
    };
    let inference_time = start.elapsed();

    let guidance = self.tracker.update(detections.first());
    debug!(
      "第 {} 帧: {} 个检测结果, 引导: {}, 耗时 {:?}",
      frame_index,
      detections.len(),
      guidance.message,
      inference_time
    );

    let capture = match (raster.as_ref(), detections.first()) {
      (Some(raster), Some(best)) if latch.take() => {
        Some(match capture_and_crop(raster, best, self.store.as_ref()) {
          Ok(asset) => {
            info!("拍摄完成: {}", asset.path.display());
            CaptureOutcome::Saved(asset)
          }
          Err(e) => {
            error!("拍摄失败: {}", e);
            CaptureOutcome::Failed(e.to_string())
          }
        })
      }
      _ => None,
    };

    PipelineUpdate {
      frame_index,
      detections,
      guidance,
      capture,
      inference_time,
      raster: raster.map(Arc::new),
    }
  }
}
