// 该文件是 Zhunxing （准星） 项目的一部分。
// src/model/fixture.rs - 回放固定输出的推理引擎
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

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{AssetLoadError, InferenceEngine, InferenceError, RawOutput, check_input},
  preprocess::PreparedTensor,
  url_path,
};

/// 每帧都返回同一份预先录制的输出
///
/// 用于没有 NPU 的环境离线演示与调试：输出从 JSON 文件读取，
/// 格式为 `{"properties": P, "anchors": A, "data": [...]}`。
pub struct FixtureEngine {
  output: RawOutput,
  input_size: (u32, u32),
}

impl FromUrlWithScheme for FixtureEngine {
  const SCHEME: &'static str = "fixture";
}

impl FromUrl for FixtureEngine {
  type Error = AssetLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AssetLoadError::UnsupportedScheme(url.scheme().to_string()));
    }

    let path = url_path(url);
    info!("加载回放输出: {}", path);
    let text = std::fs::read_to_string(&path)?;
    let output: RawOutput = serde_json::from_str(&text)
      .map_err(|e| AssetLoadError::InvalidModel(format!("{}: {}", path, e)))?;
    debug!(
      "回放输出形状: [{}, {}]",
      output.properties(),
      output.anchors()
    );

    Ok(Self::new(output))
  }
}

impl FixtureEngine {
  pub fn new(output: RawOutput) -> Self {
    Self {
      output,
      input_size: (640, 640),
    }
  }

  pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = (width, height);
    self
  }
}

impl InferenceEngine for FixtureEngine {
  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> (usize, usize) {
    (self.output.properties(), self.output.anchors())
  }

  fn infer(&mut self, input: &PreparedTensor) -> Result<RawOutput, InferenceError> {
    check_input(&*self, input)?;
    Ok(self.output.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preprocess::prepare;

  #[test]
  fn loads_output_from_file_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one anchor.json");
    std::fs::write(
      &path,
      r#"{"properties": 6, "anchors": 1, "data": [0.5, 0.5, 0.4, 0.4, 2.0, -2.0]}"#,
    )
    .unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "fixture", 1)).unwrap();

    let mut engine = FixtureEngine::from_url(&url).unwrap().with_input_size(8, 8);
    assert_eq!(engine.output_shape(), (6, 1));
    let output = engine.infer(&prepare(&image::RgbImage::new(8, 8), 8, 8)).unwrap();
    assert_eq!(output.get(4, 0), 2.0);
  }

  #[test]
  fn rejects_mismatched_input() {
    let raw = RawOutput::new(5, 1, vec![0.0; 5]).unwrap();
    let mut engine = FixtureEngine::new(raw).with_input_size(8, 8);
    let tensor = prepare(&image::RgbImage::new(4, 4), 4, 4);
    assert!(matches!(
      engine.infer(&tensor),
      Err(InferenceError::InputShape { .. })
    ));
  }
}
