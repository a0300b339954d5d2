// 该文件是 Zhunxing （准星） 项目的一部分。
// src/bin/detect_oneshot.rs - 单帧检测
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use zhunxing::{
  FromUrl,
  args::{ModelArgs, PipelineArgs},
  input::InputWrapper,
  pipeline::Pipeline,
  storage::DirectoryStore,
  task::{OneShotTask, Task},
};

/// 准星：单帧检测并以 JSON 输出结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub model: ModelArgs,

  #[command(flatten)]
  pub pipeline: PipelineArgs,

  /// 输入来源，例如 image:///tmp/a.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 检测到目标时裁剪保存到该目录，例如 folder:///tmp/captures
  #[arg(long, value_name = "STORE")]
  pub capture: Option<Url>,

  /// 标注图像输出，例如 image:///tmp/annotated.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model.model);
  info!("输入来源: {}", args.input);

  let config = args.pipeline.resolve().context("配置无效")?;
  let detector = args.model.load(&config);
  let store = match &args.capture {
    Some(url) => DirectoryStore::from_url(url).context("无法打开存储目录")?,
    None => DirectoryStore::new(std::env::temp_dir().join("zhunxing")),
  };
  let input = InputWrapper::from_url(&args.input).context("无法打开输入")?;

  #[cfg(feature = "save_image_file")]
  let output = args
    .output
    .as_ref()
    .map(|url| {
      zhunxing::output::PreviewOutput::from_url(url)
        .map(|o| o.with_required_stable_frames(config.guidance.required_stable_frames))
    })
    .transpose()
    .context("无法创建图像输出")?;
  #[cfg(not(feature = "save_image_file"))]
  let output = {
    if args.output.is_some() {
      tracing::warn!("未启用 save_image_file 特性, 忽略图像输出");
    }
    zhunxing::output::NullOutput
  };

  let pipeline = Pipeline::new(config, detector, Box::new(store));
  let update = OneShotTask::default()
    .with_capture(args.capture.is_some())
    .run_task(input, pipeline, output)?;

  println!("{}", serde_json::to_string_pretty(&update)?);
  Ok(())
}
