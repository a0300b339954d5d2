// 该文件是 Zhunxing （准星） 项目的一部分。
// src/config.rs - 流水线参数配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const DEFAULT_SKIP_INTERVAL: u64 = 3;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_NUM_CLASSES: usize = 1;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 引导状态机阈值，面积均为占模型输入面积的比例
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceThresholds {
  /// 引导所需的最低置信度
  pub guide_threshold: f32,
  pub min_area: f32,
  pub max_area: f32,
  pub optimal_min_area: f32,
  pub optimal_max_area: f32,
  /// 连续稳定帧数达到该值即可拍摄
  pub required_stable_frames: u32,
}

impl Default for GuidanceThresholds {
  fn default() -> Self {
    Self {
      guide_threshold: 0.6,
      min_area: 0.1,
      max_area: 0.85,
      optimal_min_area: 0.2,
      optimal_max_area: 0.7,
      required_stable_frames: 5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// 每 N 帧处理一帧
  pub skip_interval: u64,
  pub input_width: u32,
  pub input_height: u32,
  pub num_classes: usize,
  /// 解码阈值，激活分数必须严格大于该值
  pub confidence_threshold: f32,
  /// 重叠抑制的 IoU 阈值，`None` 表示不做抑制
  pub nms_threshold: Option<f32>,
  pub guidance: GuidanceThresholds,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      skip_interval: DEFAULT_SKIP_INTERVAL,
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      num_classes: DEFAULT_NUM_CLASSES,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: Some(DEFAULT_NMS_THRESHOLD),
      guidance: GuidanceThresholds::default(),
    }
  }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::Invalid(format!(
      "{} 必须位于 [0, 1] 区间, 实际为 {}",
      name, value
    )))
  }
}

impl PipelineConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
  }

  /// 每个锚点的属性数：4 个几何量加每类一个分数
  pub fn properties(&self) -> usize {
    4 + self.num_classes
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.skip_interval == 0 {
      return Err(ConfigError::Invalid("skip_interval 必须大于 0".to_string()));
    }
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::Invalid("模型输入尺寸不能为 0".to_string()));
    }
    if self.num_classes == 0 {
      return Err(ConfigError::Invalid("num_classes 必须大于 0".to_string()));
    }
    check_unit("confidence_threshold", self.confidence_threshold)?;
    if let Some(nms) = self.nms_threshold {
      check_unit("nms_threshold", nms)?;
    }

    let g = &self.guidance;
    check_unit("guide_threshold", g.guide_threshold)?;
    for (name, value) in [
      ("min_area", g.min_area),
      ("max_area", g.max_area),
      ("optimal_min_area", g.optimal_min_area),
      ("optimal_max_area", g.optimal_max_area),
    ] {
      check_unit(name, value)?;
    }
    if !(g.min_area <= g.optimal_min_area
      && g.optimal_min_area <= g.optimal_max_area
      && g.optimal_max_area <= g.max_area)
    {
      return Err(ConfigError::Invalid(format!(
        "面积阈值顺序错误: {} <= {} <= {} <= {} 不成立",
        g.min_area, g.optimal_min_area, g.optimal_max_area, g.max_area
      )));
    }
    if g.required_stable_frames == 0 {
      return Err(ConfigError::Invalid(
        "required_stable_frames 必须大于 0".to_string(),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    let config = PipelineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.properties(), 5);
  }

  #[test]
  fn rejects_zero_skip_interval() {
    let config = PipelineConfig {
      skip_interval: 0,
      ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn rejects_misordered_areas() {
    let mut config = PipelineConfig::default();
    config.guidance.optimal_min_area = 0.9;
    assert!(config.validate().is_err());
  }

  #[test]
  fn partial_json_falls_back_to_defaults() {
    let config: PipelineConfig =
      serde_json::from_str(r#"{"skip_interval": 5, "guidance": {"required_stable_frames": 8}}"#)
        .unwrap();
    assert_eq!(config.skip_interval, 5);
    assert_eq!(config.guidance.required_stable_frames, 8);
    assert_eq!(config.guidance.min_area, GuidanceThresholds::default().min_area);
    assert_eq!(config.input_width, 640);
  }

  #[test]
  fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"{"num_classes": 3, "nms_threshold": null}"#).unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(config.num_classes, 3);
    assert_eq!(config.nms_threshold, None);
  }
}
