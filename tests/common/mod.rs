// 该文件是 Zhunxing （准星） 项目的一部分。
// tests/common/mod.rs - 集成测试公共工具
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

#![allow(dead_code)]

use std::path::Path;
use std::sync::mpsc::{Receiver, Sender};

use url::Url;
use zhunxing::{
  config::PipelineConfig,
  frame::Frame,
  model::{InferenceEngine, InferenceError, RawOutput},
  preprocess::PreparedTensor,
};

pub const INPUT_SIZE: u32 = 8;

/// 单锚点、单类别，面积 0.36，置信度约 0.95
pub fn centered_output() -> RawOutput {
  RawOutput::new(5, 1, vec![0.5, 0.5, 0.6, 0.6, 3.0]).unwrap()
}

pub fn config(skip_interval: u64) -> PipelineConfig {
  let mut config = PipelineConfig {
    skip_interval,
    input_width: INPUT_SIZE,
    input_height: INPUT_SIZE,
    ..Default::default()
  };
  config.guidance.required_stable_frames = 2;
  config
}

pub fn frame(index: u64) -> Frame {
  Frame::bgra(32, 24, vec![180; 32 * 24 * 4]).with_index(index)
}

/// 把本地路径转换为指定方案的 URL
pub fn scheme_url(scheme: &str, path: &Path, query: Option<&str>) -> Url {
  let mut url = Url::from_file_path(path).unwrap();
  url.set_query(query);
  Url::parse(&url.as_str().replacen("file", scheme, 1)).unwrap()
}

/// 每次推理前等待放行信号的引擎
pub struct GatedEngine {
  pub output: RawOutput,
  pub started: Sender<()>,
  pub gate: Receiver<()>,
}

impl InferenceEngine for GatedEngine {
  fn input_size(&self) -> (u32, u32) {
    (INPUT_SIZE, INPUT_SIZE)
  }

  fn output_shape(&self) -> (usize, usize) {
    (self.output.properties(), self.output.anchors())
  }

  fn infer(&mut self, _input: &PreparedTensor) -> Result<RawOutput, InferenceError> {
    let _ = self.started.send(());
    self
      .gate
      .recv()
      .map_err(|e| InferenceError::Backend(e.to_string()))?;
    Ok(self.output.clone())
  }
}

/// 前 `panics` 次调用直接 panic 的引擎
pub struct FlakyEngine {
  pub output: RawOutput,
  pub panics: usize,
}

impl InferenceEngine for FlakyEngine {
  fn input_size(&self) -> (u32, u32) {
    (INPUT_SIZE, INPUT_SIZE)
  }

  fn output_shape(&self) -> (usize, usize) {
    (self.output.properties(), self.output.anchors())
  }

  fn infer(&mut self, _input: &PreparedTensor) -> Result<RawOutput, InferenceError> {
    if self.panics > 0 {
      self.panics -= 1;
      panic!("模拟推理后端崩溃");
    }
    Ok(self.output.clone())
  }
}

/// 总是返回错误的引擎
pub struct FailingEngine;

impl InferenceEngine for FailingEngine {
  fn input_size(&self) -> (u32, u32) {
    (INPUT_SIZE, INPUT_SIZE)
  }

  fn output_shape(&self) -> (usize, usize) {
    (5, 1)
  }

  fn infer(&mut self, _input: &PreparedTensor) -> Result<RawOutput, InferenceError> {
    Err(InferenceError::Backend("NPU 超时".to_string()))
  }
}
