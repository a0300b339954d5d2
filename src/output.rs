// 该文件是 Zhunxing （准星） 项目的一部分。
// src/output.rs - 预览输出
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

use std::convert::Infallible;

use crate::pipeline::PipelineUpdate;

/// 处理结果的展示方式
pub trait Render {
  type Error;
  fn render(&self, update: &PipelineUpdate) -> Result<(), Self::Error>;
}

/// 不输出任何内容
pub struct NullOutput;

impl Render for NullOutput {
  type Error = Infallible;

  fn render(&self, _update: &PipelineUpdate) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<R: Render> Render for Option<R> {
  type Error = R::Error;

  fn render(&self, update: &PipelineUpdate) -> Result<(), Self::Error> {
    match self {
      Some(output) => output.render(update),
      None => Ok(()),
    }
  }
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{PreviewOutput, PreviewOutputError};
