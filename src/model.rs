// 该文件是 Zhunxing （准星） 项目的一部分。
// src/model.rs - 推理引擎适配
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
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{config::PipelineConfig, preprocess::PreparedTensor};

mod fixture;
pub use self::fixture::FixtureEngine;

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::RknnEngine;

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxEngine;

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum AssetLoadError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的模型方案: {0}")]
  UnsupportedScheme(String),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("标签列表为空: {0}")]
  EmptyLabels(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShape {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("输出形状无效: {0}")]
  OutputShape(String),
  #[error("推理后端错误: {0}")]
  Backend(String),
}

/// `[properties, anchors]` 形状的原始模型输出，按属性行优先存放
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOutputRepr")]
pub struct RawOutput {
  properties: usize,
  anchors: usize,
  data: Box<[f32]>,
}

#[derive(Deserialize)]
struct RawOutputRepr {
  properties: usize,
  anchors: usize,
  data: Vec<f32>,
}

impl TryFrom<RawOutputRepr> for RawOutput {
  type Error = InferenceError;

  fn try_from(repr: RawOutputRepr) -> Result<Self, Self::Error> {
    RawOutput::new(repr.properties, repr.anchors, repr.data)
  }
}

impl RawOutput {
  pub fn new(properties: usize, anchors: usize, data: Vec<f32>) -> Result<Self, InferenceError> {
    if data.len() != properties * anchors {
      return Err(InferenceError::OutputShape(format!(
        "数据长度 {} 与形状 [{}, {}] 不符",
        data.len(),
        properties,
        anchors
      )));
    }
    Ok(Self {
      properties,
      anchors,
      data: data.into_boxed_slice(),
    })
  }

  pub fn properties(&self) -> usize {
    self.properties
  }

  pub fn anchors(&self) -> usize {
    self.anchors
  }

  #[inline]
  pub fn get(&self, property: usize, anchor: usize) -> f32 {
    self.data[property * self.anchors + anchor]
  }

  /// 某一属性在全部锚点上的取值
  pub fn row(&self, property: usize) -> &[f32] {
    &self.data[property * self.anchors..(property + 1) * self.anchors]
  }
}

/// 固定结构的检测网络，每次调用执行一次前向推理
///
/// 同一引擎不会被并发调用，由调度器的在途标志保证。
pub trait InferenceEngine: Send {
  /// 模型输入宽高
  fn input_size(&self) -> (u32, u32);

  /// 模型输出形状 `(properties, anchors)`
  fn output_shape(&self) -> (usize, usize);

  fn infer(&mut self, input: &PreparedTensor) -> Result<RawOutput, InferenceError>;
}

/// 校验张量尺寸与引擎输入一致
pub(crate) fn check_input(
  engine: &dyn InferenceEngine,
  input: &PreparedTensor,
) -> Result<(), InferenceError> {
  let expected = engine.input_size();
  let actual = (input.width(), input.height());
  if expected != actual {
    return Err(InferenceError::InputShape { expected, actual });
  }
  Ok(())
}

/// 按行分隔的类别标签
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn parse(text: &str) -> Self {
    let names = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(String::from)
      .collect();
    Self { names }
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AssetLoadError> {
    let path = path.as_ref();
    let labels = Self::parse(&std::fs::read_to_string(path)?);
    if labels.is_empty() {
      return Err(AssetLoadError::EmptyLabels(path.display().to_string()));
    }
    Ok(labels)
  }

  pub fn get(&self, class_id: usize) -> &str {
    self
      .names
      .get(class_id)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl<S: Into<String>> FromIterator<S> for Labels {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

/// 按 URL 方案加载推理引擎
///
/// - `fixture:///path/to/output.json`
/// - `rknn:///path/to/model.rknn`（需要 `rknpu` 特性）
/// - `onnx:///path/to/model.onnx`（需要 `onnx` 特性）
pub fn load_engine(
  url: &Url,
  config: &PipelineConfig,
) -> Result<Box<dyn InferenceEngine>, AssetLoadError> {
  use crate::{FromUrl, FromUrlWithScheme};

  let engine: Box<dyn InferenceEngine> = match url.scheme() {
    FixtureEngine::SCHEME => {
      Box::new(FixtureEngine::from_url(url)?.with_input_size(config.input_width, config.input_height))
    }
    #[cfg(feature = "rknpu")]
    RknnEngine::SCHEME => Box::new(RknnEngine::from_url(url)?),
    #[cfg(feature = "onnx")]
    OnnxEngine::SCHEME => Box::new(OnnxEngine::from_url(url)?),
    other => return Err(AssetLoadError::UnsupportedScheme(other.to_string())),
  };

  let (properties, anchors) = engine.output_shape();
  if properties != config.properties() {
    return Err(AssetLoadError::InvalidModel(format!(
      "输出属性数 {} 与配置的 4 + {} 个类别不符",
      properties, config.num_classes
    )));
  }
  if engine.input_size() != (config.input_width, config.input_height) {
    return Err(AssetLoadError::InvalidModel(format!(
      "模型输入 {:?} 与配置的 {}x{} 不符",
      engine.input_size(),
      config.input_width,
      config.input_height
    )));
  }
  info!(
    "推理引擎就绪: 输入 {:?}, 输出 [{}, {}]",
    engine.input_size(),
    properties,
    anchors
  );
  Ok(engine)
}

/// 推理引擎与标签的组合
///
/// 模型或标签加载失败时进入降级模式：每一帧都返回空结果，不会中断流水线。
pub struct Detector {
  engine: Option<Box<dyn InferenceEngine>>,
  labels: Labels,
}

impl Detector {
  pub fn new(engine: Box<dyn InferenceEngine>, labels: Labels) -> Self {
    Self {
      engine: Some(engine),
      labels,
    }
  }

  /// 降级模式检测器
  pub fn degraded() -> Self {
    Self {
      engine: None,
      labels: Labels::default(),
    }
  }

  /// 加载模型与标签，失败时记录错误并返回降级检测器
  pub fn load(model: &Url, labels: impl AsRef<Path>, config: &PipelineConfig) -> Self {
    info!("加载模型: {}", model);
    let engine = load_engine(model, config);
    let labels_path = labels.as_ref();
    info!("加载标签: {}", labels_path.display());
    let labels = Labels::from_file(labels_path);

    match (engine, labels) {
      (Ok(engine), Ok(labels)) => {
        if labels.len() != config.num_classes {
          warn!(
            "标签数量 {} 与类别数 {} 不一致",
            labels.len(),
            config.num_classes
          );
        }
        debug!("标签: {:?}", labels);
        Self::new(engine, labels)
      }
      (engine, labels) => {
        if let Err(e) = engine {
          error!("模型加载失败: {}", e);
        }
        if let Err(e) = labels {
          error!("标签加载失败: {}", e);
        }
        warn!("检测器进入降级模式，所有帧将不产生检测结果");
        Self::degraded()
      }
    }
  }

  pub fn is_degraded(&self) -> bool {
    self.engine.is_none()
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 降级模式下返回 `Ok(None)`
  pub fn infer(&mut self, input: &PreparedTensor) -> Result<Option<RawOutput>, InferenceError> {
    match self.engine.as_mut() {
      Some(engine) => engine.infer(input).map(Some),
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_output_rejects_wrong_length() {
    assert!(RawOutput::new(6, 2, vec![0.0; 11]).is_err());
    let raw = RawOutput::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(raw.get(1, 0), 4.0);
    assert_eq!(raw.row(0), &[1.0, 2.0, 3.0]);
  }

  #[test]
  fn raw_output_deserialize_validates_shape() {
    let ok: RawOutput =
      serde_json::from_str(r#"{"properties": 2, "anchors": 1, "data": [0.5, 0.25]}"#).unwrap();
    assert_eq!(ok.anchors(), 1);
    let bad = serde_json::from_str::<RawOutput>(r#"{"properties": 2, "anchors": 2, "data": [0.5]}"#);
    assert!(bad.is_err());
  }

  #[test]
  fn labels_skip_blank_lines_and_trim() {
    let labels = Labels::parse("card\r\n\n  receipt  \n");
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.get(0), "card");
    assert_eq!(labels.get(1), "receipt");
    assert_eq!(labels.get(7), "unknown");
  }

  #[test]
  fn missing_assets_degrade_instead_of_failing() {
    let url = Url::parse("fixture:///definitely/not/here.json").unwrap();
    let mut detector = Detector::load(&url, "/definitely/not/labels.txt", &PipelineConfig::default());
    assert!(detector.is_degraded());
    let tensor = crate::preprocess::prepare(&image::RgbImage::new(4, 4), 640, 640);
    assert!(detector.infer(&tensor).unwrap().is_none());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("tflite:///model.tflite").unwrap();
    assert!(matches!(
      load_engine(&url, &PipelineConfig::default()),
      Err(AssetLoadError::UnsupportedScheme(_))
    ));
  }
}
