// 该文件是 Zhunxing （准星） 项目的一部分。
// src/args.rs - 命令行公共参数
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

use std::path::PathBuf;

use clap::Args;
use tracing::info;
use url::Url;

use crate::{
  config::{ConfigError, PipelineConfig},
  model::Detector,
};

/// 模型与标签
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
  /// 模型地址，例如 rknn:///opt/model.rknn 或 fixture:///tmp/output.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,
}

impl ModelArgs {
  /// 加载失败时返回降级检测器
  pub fn load(&self, config: &PipelineConfig) -> Detector {
    Detector::load(&self.model, &self.labels, config)
  }
}

/// 流水线参数，命令行参数覆盖配置文件中的值
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 每 N 帧处理一帧
  #[arg(long, value_name = "N")]
  pub skip_interval: Option<u64>,

  /// 类别数量
  #[arg(long, value_name = "COUNT")]
  pub num_classes: Option<usize>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", conflicts_with = "no_nms")]
  pub nms_threshold: Option<f32>,

  /// 关闭重叠抑制
  #[arg(long)]
  pub no_nms: bool,

  /// 就绪所需的连续稳定帧数
  #[arg(long, value_name = "COUNT")]
  pub stable_frames: Option<u32>,
}

impl PipelineArgs {
  pub fn resolve(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };

    if let Some(n) = self.skip_interval {
      config.skip_interval = n;
    }
    if let Some(n) = self.num_classes {
      config.num_classes = n;
    }
    if let Some(t) = self.confidence {
      config.confidence_threshold = t;
    }
    if let Some(t) = self.nms_threshold {
      config.nms_threshold = Some(t);
    }
    if self.no_nms {
      config.nms_threshold = None;
    }
    if let Some(n) = self.stable_frames {
      config.guidance.required_stable_frames = n;
    }

    config.validate()?;
    info!("流水线配置: {:?}", config);
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flags_override_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"{"skip_interval": 5, "num_classes": 2}"#).unwrap();

    let args = PipelineArgs {
      config: Some(path),
      skip_interval: Some(2),
      no_nms: true,
      ..Default::default()
    };
    let config = args.resolve().unwrap();
    assert_eq!(config.skip_interval, 2);
    assert_eq!(config.num_classes, 2);
    assert_eq!(config.nms_threshold, None);
  }

  #[test]
  fn invalid_override_is_rejected() {
    let args = PipelineArgs {
      confidence: Some(1.5),
      ..Default::default()
    };
    assert!(matches!(args.resolve(), Err(ConfigError::Invalid(_))));
  }
}
