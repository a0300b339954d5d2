// 该文件是 Zhunxing （准星） 项目的一部分。
// src/bin/list_captures.rs - 列出已保存的拍摄结果
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
  storage::{CaptureStore, DirectoryStore},
};

/// 准星：按时间从新到旧列出拍摄结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 拍摄结果目录，例如 folder:///tmp/captures
  #[arg(long, value_name = "STORE")]
  pub store: Url,

  /// 以 JSON 输出
  #[arg(long)]
  pub json: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let store = DirectoryStore::from_url(&args.store).context("无法打开存储目录")?;
  let assets = store.list().context("无法列出拍摄结果")?;
  info!("共 {} 个文件", assets.len());

  if args.json {
    println!("{}", serde_json::to_string_pretty(&assets)?);
  } else {
    for asset in &assets {
      println!(
        "{}  {}",
        asset.modified_local().format("%Y-%m-%d %H:%M:%S"),
        asset.path.display()
      );
    }
  }
  Ok(())
}
