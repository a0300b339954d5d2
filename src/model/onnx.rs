// 该文件是 Zhunxing （准星） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理引擎
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

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{AssetLoadError, InferenceEngine, InferenceError, RawOutput, check_input},
  preprocess::PreparedTensor,
  url_path, url_query,
};

const ONNX_DEFAULT_INPUT: u32 = 640;
const ONNX_DEFAULT_ANCHORS: usize = 8400;
const ONNX_DEFAULT_THREADS: usize = 4;

/// 基于 ONNX Runtime 的检测模型，输入为 `[1, H, W, 3]` 的 float32
///
/// URL 形如 `onnx:///path/model.onnx?width=640&height=640&threads=4`。
/// 输出形状取自模型声明的最后两维；动态维度时退回 `classes` 与 `anchors` 参数。
pub struct OnnxEngine {
  session: Session,
  input_size: (u32, u32),
  properties: usize,
  anchors: usize,
}

impl FromUrlWithScheme for OnnxEngine {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxEngine {
  type Error = AssetLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AssetLoadError::UnsupportedScheme(url.scheme().to_string()));
    }

    let model_path = url_path(url);
    let width = url_query(url, "width").unwrap_or(ONNX_DEFAULT_INPUT);
    let height = url_query(url, "height").unwrap_or(ONNX_DEFAULT_INPUT);
    let threads = url_query(url, "threads").unwrap_or(ONNX_DEFAULT_THREADS);

    info!("加载 ONNX 模型: {}", model_path);
    let invalid = |e: ort::Error| AssetLoadError::InvalidModel(e.to_string());
    let session = Session::builder()
      .map_err(invalid)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(invalid)?
      .with_intra_threads(threads)
      .map_err(invalid)?
      .commit_from_file(&model_path)
      .map_err(invalid)?;
    debug!("模型输入: {:?}", session.inputs);
    debug!("模型输出: {:?}", session.outputs);

    if session.inputs.len() != 1 || session.outputs.is_empty() {
      return Err(AssetLoadError::InvalidModel(format!(
        "预期 1 个输入和至少 1 个输出, 实际为 {}/{}",
        session.inputs.len(),
        session.outputs.len()
      )));
    }

    let declared = session.outputs[0]
      .output_type
      .tensor_shape()
      .map(|shape| shape.iter().copied().collect::<Vec<i64>>())
      .unwrap_or_default();
    let (properties, anchors) = match static_shape(&declared) {
      Some(shape) => shape,
      None => {
        let classes: usize = url_query(url, "classes").unwrap_or(1);
        let anchors = url_query(url, "anchors").unwrap_or(ONNX_DEFAULT_ANCHORS);
        warn!(
          "模型输出形状 {:?} 含动态维度, 使用 [{}, {}]",
          declared,
          4 + classes,
          anchors
        );
        (4 + classes, anchors)
      }
    };

    info!("模型加载完成: 输出 [{}, {}]", properties, anchors);
    Ok(Self {
      session,
      input_size: (width, height),
      properties,
      anchors,
    })
  }
}

/// 取 `[.., properties, anchors]` 的最后两维，维度未知时返回 `None`
fn static_shape(dims: &[i64]) -> Option<(usize, usize)> {
  match dims {
    [.., properties, anchors] if *properties > 0 && *anchors > 0 => {
      Some((*properties as usize, *anchors as usize))
    }
    _ => None,
  }
}

impl InferenceEngine for OnnxEngine {
  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> (usize, usize) {
    (self.properties, self.anchors)
  }

  fn infer(&mut self, input: &PreparedTensor) -> Result<RawOutput, InferenceError> {
    check_input(&*self, input)?;
    let backend = |e: ort::Error| InferenceError::Backend(e.to_string());

    let shape = [
      1usize,
      input.height() as usize,
      input.width() as usize,
      input.channels(),
    ];
    let tensor = Tensor::from_array((shape, input.as_nhwc().to_vec())).map_err(backend)?;
    let outputs = self.session.run(ort::inputs![tensor]).map_err(backend)?;
    let (dims, data) = outputs[0].try_extract_tensor::<f32>().map_err(backend)?;
    debug!("模型输出维度: {:?}", dims);

    RawOutput::new(self.properties, self.anchors, data.to_vec())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_shape_comes_from_last_two_dims() {
    assert_eq!(static_shape(&[1, 6, 8400]), Some((6, 8400)));
    assert_eq!(static_shape(&[5, 100]), Some((5, 100)));
    assert_eq!(static_shape(&[1, 6, -1]), None);
    assert_eq!(static_shape(&[8400]), None);
  }
}
