// 该文件是 Zhunxing （准星） 项目的一部分。
// src/guidance.rs - 拍摄引导状态机
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

//! 根据每帧的最佳检测结果统计连续稳定帧数，并给出提示语。
//!
//! 任意一项门限不满足都会把计数直接清零回到搜索状态。

use std::fmt;

use serde::Serialize;

use crate::{config::GuidanceThresholds, decode::Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuidancePhase {
  Searching,
  Centering,
  Stabilizing,
  Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuidanceMessage {
  /// 画面中没有目标
  PositionObject,
  /// 置信度不足
  HoldSteadyDetecting,
  MoveCloser,
  MoveBack,
  /// 面积可接受但不在最佳区间
  AdjustPosition,
  Stabilizing { count: u32, required: u32 },
  Ready,
}

impl GuidanceMessage {
  pub fn phase(&self) -> GuidancePhase {
    match self {
      GuidanceMessage::PositionObject => GuidancePhase::Searching,
      GuidanceMessage::HoldSteadyDetecting
      | GuidanceMessage::MoveCloser
      | GuidanceMessage::MoveBack
      | GuidanceMessage::AdjustPosition => GuidancePhase::Centering,
      GuidanceMessage::Stabilizing { .. } => GuidancePhase::Stabilizing,
      GuidanceMessage::Ready => GuidancePhase::Ready,
    }
  }
}

impl fmt::Display for GuidanceMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GuidanceMessage::PositionObject => write!(f, "Position object in frame"),
      GuidanceMessage::HoldSteadyDetecting => write!(f, "Hold steady, detecting"),
      GuidanceMessage::MoveCloser => write!(f, "Move closer"),
      GuidanceMessage::MoveBack => write!(f, "Move back"),
      GuidanceMessage::AdjustPosition => write!(f, "Adjust position"),
      GuidanceMessage::Stabilizing { count, required } => {
        write!(f, "Hold steady, {}/{}", count, required)
      }
      GuidanceMessage::Ready => write!(f, "Ready, capture now"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuidanceState {
  pub stable_frame_count: u32,
  pub message: GuidanceMessage,
  pub ready_to_capture: bool,
}

impl Default for GuidanceState {
  fn default() -> Self {
    Self::reset(GuidanceMessage::PositionObject)
  }
}

impl GuidanceState {
  fn reset(message: GuidanceMessage) -> Self {
    Self {
      stable_frame_count: 0,
      message,
      ready_to_capture: false,
    }
  }

  pub fn phase(&self) -> GuidancePhase {
    self.message.phase()
  }
}

/// 由上一帧的计数与当前最佳检测计算新的引导状态
pub fn evaluate(
  previous_count: u32,
  best: Option<&Detection>,
  thresholds: &GuidanceThresholds,
) -> GuidanceState {
  let Some(best) = best else {
    return GuidanceState::reset(GuidanceMessage::PositionObject);
  };

  let area = best.bbox.width * best.bbox.height;

  if best.confidence < thresholds.guide_threshold {
    GuidanceState::reset(GuidanceMessage::HoldSteadyDetecting)
  } else if area < thresholds.min_area {
    GuidanceState::reset(GuidanceMessage::MoveCloser)
  } else if area > thresholds.max_area {
    GuidanceState::reset(GuidanceMessage::MoveBack)
  } else if (thresholds.optimal_min_area..=thresholds.optimal_max_area).contains(&area) {
    let count = previous_count.saturating_add(1);
    let required = thresholds.required_stable_frames;
    if count >= required {
      GuidanceState {
        stable_frame_count: count,
        message: GuidanceMessage::Ready,
        ready_to_capture: true,
      }
    } else {
      GuidanceState {
        stable_frame_count: count,
        message: GuidanceMessage::Stabilizing { count, required },
        ready_to_capture: false,
      }
    }
  } else {
    GuidanceState::reset(GuidanceMessage::AdjustPosition)
  }
}

/// 持有跨帧计数的引导状态机，每个被处理的帧调用一次
#[derive(Debug, Clone)]
pub struct GuidanceTracker {
  thresholds: GuidanceThresholds,
  state: GuidanceState,
}

impl GuidanceTracker {
  pub fn new(thresholds: GuidanceThresholds) -> Self {
    Self {
      thresholds,
      state: GuidanceState::default(),
    }
  }

  /// `best` 为按置信度排序后的第一个检测结果
  pub fn update(&mut self, best: Option<&Detection>) -> GuidanceState {
    self.state = evaluate(self.state.stable_frame_count, best, &self.thresholds);
    self.state
  }

  pub fn state(&self) -> GuidanceState {
    self.state
  }

  pub fn thresholds(&self) -> &GuidanceThresholds {
    &self.thresholds
  }
}
