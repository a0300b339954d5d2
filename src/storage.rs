// 该文件是 Zhunxing （准星） 项目的一部分。
// src/storage.rs - 拍摄结果存储
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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Local, Utc};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{FromUrl, FromUrlWithScheme, url_path};

const CAPTURE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 已保存的拍摄文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedAsset {
  pub path: PathBuf,
  pub modified: SystemTime,
}

impl SavedAsset {
  fn from_path(path: PathBuf) -> Result<Self, StorageError> {
    let modified = std::fs::metadata(&path)?.modified()?;
    Ok(Self { path, modified })
  }

  pub fn modified_local(&self) -> DateTime<Local> {
    DateTime::<Local>::from(self.modified)
  }
}

/// 拍摄结果的持久化接口
pub trait CaptureStore: Send {
  /// 以无损格式保存一张图像，文件名保证唯一
  fn save(&self, image: &RgbImage) -> Result<SavedAsset, StorageError>;

  /// 列出已保存的图像，按修改时间从新到旧
  fn list(&self) -> Result<Vec<SavedAsset>, StorageError>;
}

/// 以目录保存拍摄结果，文件名由时间戳与序号组成
pub struct DirectoryStore {
  directory: PathBuf,
  sequence: AtomicU16,
}

impl FromUrlWithScheme for DirectoryStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryStore {
  type Error = StorageError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch);
    }
    Ok(Self::new(url_path(uri)))
  }
}

impl DirectoryStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      sequence: AtomicU16::new(0),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn capture_id(&self) -> u16 {
    self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn capture_path(&self) -> PathBuf {
    let now = Utc::now();
    loop {
      let path = self.directory.join(format!(
        "capture-{}-{:04X}.png",
        now.format("%Y%m%d-%H%M%S-%3f"),
        self.capture_id()
      ));
      if !path.exists() {
        return path;
      }
      debug!("文件已存在, 重新生成: {}", path.display());
    }
  }
}

impl CaptureStore for DirectoryStore {
  fn save(&self, image: &RgbImage) -> Result<SavedAsset, StorageError> {
    if !self.directory.exists() {
      std::fs::create_dir_all(&self.directory)?;
    }

    let path = self.capture_path();
    image.save_with_format(&path, ImageFormat::Png)?;
    info!(
      "保存拍摄图像到文件: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    SavedAsset::from_path(path)
  }

  fn list(&self) -> Result<Vec<SavedAsset>, StorageError> {
    if !self.directory.exists() {
      return Ok(Vec::new());
    }

    let mut assets = Vec::new();
    for entry in std::fs::read_dir(&self.directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| CAPTURE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if !is_image || !path.is_file() {
        continue;
      }
      match SavedAsset::from_path(path) {
        Ok(asset) => assets.push(asset),
        Err(e) => warn!("无法读取文件信息: {}", e),
      }
    }

    assets.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(assets)
  }
}
