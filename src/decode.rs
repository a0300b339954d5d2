// 该文件是 Zhunxing （准星） 项目的一部分。
// src/decode.rs - 检测结果解码
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

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Labels, RawOutput};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出属性数 {actual} 与 4 + {classes} 个类别不符")]
  PropertyMismatch { actual: usize, classes: usize },
}

/// 归一化到模型输入空间的边界框（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  /// 由中心点与宽高构造
  pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
    Self {
      left: x_center - width / 2.0,
      top: y_center - height / 2.0,
      width,
      height,
    }
  }

  pub fn right(&self) -> f32 {
    self.left + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.top + self.height
  }

  pub fn is_finite(&self) -> bool {
    [self.left, self.top, self.width, self.height]
      .iter()
      .all(|v| v.is_finite())
  }

  /// 占输入面积的比例
  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  pub fn iou(&self, other: &Self) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub bbox: BoundingBox,
  /// 激活后的最高类别分数
  pub confidence: f32,
  pub class_id: usize,
  pub label: String,
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 将 `[4 + classes, anchors]` 的原始输出解码为检测结果
///
/// 激活分数严格大于 `confidence_threshold` 的锚点才会输出，结果按锚点顺序排列，
/// 不做重叠抑制。
pub fn decode(
  raw: &RawOutput,
  labels: &Labels,
  confidence_threshold: f32,
  num_classes: usize,
) -> Result<Vec<Detection>, DecodeError> {
  if raw.properties() != 4 + num_classes {
    return Err(DecodeError::PropertyMismatch {
      actual: raw.properties(),
      classes: num_classes,
    });
  }

  let mut detections = Vec::new();
  for anchor in 0..raw.anchors() {
    let (score, class_id) = {
      let mut max_score = f32::MIN;
      let mut max_class = 0usize;
      for c in 0..num_classes {
        let score = sigmoid(raw.get(4 + c, anchor));
        if score > max_score {
          max_score = score;
          max_class = c;
        }
      }
      (max_score, max_class)
    };

    if score <= confidence_threshold {
      continue;
    }

    let bbox = BoundingBox::from_center(
      raw.get(0, anchor),
      raw.get(1, anchor),
      raw.get(2, anchor),
      raw.get(3, anchor),
    );
    if !bbox.is_finite() {
      warn!("锚点 {} 的边界框无效, 已跳过: {:?}", anchor, bbox);
      continue;
    }

    detections.push(Detection {
      bbox,
      confidence: score,
      class_id,
      label: labels.get(class_id).to_string(),
    });
  }

  debug!("解码得到 {} 个检测结果", detections.len());
  Ok(detections)
}

/// 按置信度降序排序
pub fn sort_by_confidence(detections: &mut [Detection]) {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// 按类别做贪心非极大值抑制，输入需已按置信度降序排列
pub fn suppress_overlaps(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    let overlapped = kept
      .iter()
      .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) >= iou_threshold);
    if !overlapped {
      kept.push(det);
    }
  }
  kept
}
