// 该文件是 Zhunxing （准星） 项目的一部分。
// src/model/rknn.rs - RKNPU 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{AssetLoadError, InferenceEngine, InferenceError, RawOutput, check_input},
  preprocess::PreparedTensor,
  url_path, url_query,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;
const RKNN_DEFAULT_INPUT: u32 = 640;

/// 在 Rockchip NPU 上运行的单输出检测模型
///
/// URL 形如 `rknn:///path/model.rknn?width=640&height=640&classes=1`，
/// 输入为 NHWC uint8，输出为 `[4 + classes, anchors]` 的 float32。
/// 锚点数由加载时一次空白推理的输出长度得到。
pub struct RknnEngine {
  context: Context,
  input_size: (u32, u32),
  properties: usize,
  anchors: usize,
}

impl FromUrlWithScheme for RknnEngine {
  const SCHEME: &'static str = "rknn";
}

fn invalid(msg: &str, e: rknpu::Error) -> AssetLoadError {
  AssetLoadError::InvalidModel(format!("{}: {}", msg, e))
}

impl FromUrl for RknnEngine {
  type Error = AssetLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AssetLoadError::UnsupportedScheme(url.scheme().to_string()));
    }

    let model_path = url_path(url);
    let width = url_query(url, "width").unwrap_or(RKNN_DEFAULT_INPUT);
    let height = url_query(url, "height").unwrap_or(RKNN_DEFAULT_INPUT);
    let classes: usize = url_query(url, "classes").unwrap_or(1);

    info!("加载模型文件: {}", model_path);
    let model_data = std::fs::read(&model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context =
      Context::new(&model_data, InitFlags::default()).map_err(|e| invalid("无法创建上下文", e))?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(AssetLoadError::InvalidModel(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }

    let properties = 4 + classes;
    let anchors = anchors_from_elements(warm_up(&context, width, height)?, properties)?;
    info!("模型加载完成: 输出 [{}, {}]", properties, anchors);

    Ok(Self {
      context,
      input_size: (width, height),
      properties,
      anchors,
    })
  }
}

fn anchors_from_elements(elements: usize, properties: usize) -> Result<usize, AssetLoadError> {
  if elements == 0 || properties == 0 || elements % properties != 0 {
    return Err(AssetLoadError::InvalidModel(format!(
      "输出元素数 {} 不能按 {} 个属性划分",
      elements, properties
    )));
  }
  Ok(elements / properties)
}

/// 以全零输入推理一次，返回输出张量的元素数
fn warm_up(context: &Context, width: u32, height: u32) -> Result<usize, AssetLoadError> {
  let blank = vec![0u8; width as usize * height as usize * 3];
  context
    .set_input(0, blank.as_slice(), TensorFormat::NHWC, TensorType::UInt8)
    .map_err(|e| invalid("预热输入失败", e))?;
  context.run().map_err(|e| invalid("预热推理失败", e))?;
  let output = context.get_outputs().map_err(|e| invalid("无法获取预热输出", e))?;
  let data = output.get_f32(0).map_err(|e| invalid("无法读取预热输出", e))?;
  debug!("预热输出元素数: {}", data.len());
  Ok(data.len())
}

impl InferenceEngine for RknnEngine {
  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> (usize, usize) {
    (self.properties, self.anchors)
  }

  fn infer(&mut self, input: &PreparedTensor) -> Result<RawOutput, InferenceError> {
    check_input(&*self, input)?;
    let backend = |e: rknpu::Error| InferenceError::Backend(e.to_string());

    // NPU 侧的量化模型直接接收 uint8 像素
    debug!("设置模型输入");
    let pixels = input.to_u8();
    self
      .context
      .set_input(0, pixels.as_slice(), TensorFormat::NHWC, TensorType::UInt8)
      .map_err(backend)?;

    debug!("执行模型推理");
    self.context.run().map_err(backend)?;

    debug!("获取模型输出");
    let output = self.context.get_outputs().map_err(backend)?;
    let data = output.get_f32(0).map_err(backend)?;

    RawOutput::new(self.properties, self.anchors, data.to_vec())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn anchors_follow_output_length() {
    assert_eq!(anchors_from_elements(5 * 8400, 5).unwrap(), 8400);
    assert!(matches!(
      anchors_from_elements(5 * 8400, 6),
      Err(AssetLoadError::InvalidModel(_))
    ));
    assert!(anchors_from_elements(0, 5).is_err());
  }
}
