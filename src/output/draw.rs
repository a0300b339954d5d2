// 该文件是 Zhunxing （准星） 项目的一部分。
// src/output/draw.rs - 检测结果与引导状态可视化
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
  rect::Rect,
};

use crate::{
  decode::BoundingBox,
  guidance::{GuidancePhase, GuidanceState},
  pipeline::PipelineUpdate,
};

const BEST_THICKNESS: i32 = 3;
const OTHER_THICKNESS: i32 = 1;
const OTHER_COLOR: [u8; 3] = [0, 0, 255];
const PROGRESS_HEIGHT: u32 = 6;
const PROGRESS_TRACK_COLOR: [u8; 3] = [40, 40, 40];

/// 引导阶段对应的边框颜色
pub fn phase_color(phase: GuidancePhase) -> Rgb<u8> {
  match phase {
    GuidancePhase::Searching => Rgb([128, 128, 128]),
    GuidancePhase::Centering => Rgb([255, 140, 0]),
    GuidancePhase::Stabilizing => Rgb([255, 215, 0]),
    GuidancePhase::Ready => Rgb([0, 200, 0]),
  }
}

/// 归一化边界框到像素矩形，宽或高为 0 时返回 `None`
fn to_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
  let (w, h) = (width as f32, height as f32);
  let x_min = (bbox.left * w).floor().clamp(0.0, w - 1.0) as i32;
  let y_min = (bbox.top * h).floor().clamp(0.0, h - 1.0) as i32;
  let x_max = (bbox.right() * w).ceil().clamp(0.0, w - 1.0) as i32;
  let y_max = (bbox.bottom() * h).ceil().clamp(0.0, h - 1.0) as i32;

  if x_min >= x_max || y_min >= y_max {
    return None;
  }
  Some(Rect::at(x_min, y_min).of_size((x_max - x_min) as u32, (y_max - y_min) as u32))
}

fn draw_thick_rect(image: &mut RgbImage, rect: Rect, thickness: i32, color: Rgb<u8>) {
  for t in 0..thickness {
    let (w, h) = (rect.width() as i32 - 2 * t, rect.height() as i32 - 2 * t);
    if w <= 0 || h <= 0 {
      break;
    }
    let inner = Rect::at(rect.left() + t, rect.top() + t).of_size(w as u32, h as u32);
    draw_hollow_rect_mut(image, inner, color);
  }
}

/// 底部的稳定进度条
fn draw_progress(image: &mut RgbImage, guidance: &GuidanceState, required: u32) {
  let (width, height) = image.dimensions();
  if height <= PROGRESS_HEIGHT || required == 0 {
    return;
  }
  let top = (height - PROGRESS_HEIGHT) as i32;
  draw_filled_rect_mut(
    image,
    Rect::at(0, top).of_size(width, PROGRESS_HEIGHT),
    Rgb(PROGRESS_TRACK_COLOR),
  );

  let ratio = (guidance.stable_frame_count.min(required) as f32) / required as f32;
  let filled = (width as f32 * ratio).round() as u32;
  if filled > 0 {
    draw_filled_rect_mut(
      image,
      Rect::at(0, top).of_size(filled, PROGRESS_HEIGHT),
      phase_color(guidance.phase()),
    );
  }
}

/// 在原图上绘制检测结果与引导状态
///
/// 最佳检测框使用当前阶段的颜色加粗绘制，其余检测框细线绘制。
pub struct Draw {
  required_stable_frames: u32,
}

impl Draw {
  pub fn new(required_stable_frames: u32) -> Self {
    Self {
      required_stable_frames,
    }
  }

  pub fn draw_update(&self, image: &mut RgbImage, update: &PipelineUpdate) {
    let (width, height) = image.dimensions();
    let color = phase_color(update.guidance.phase());

    for (i, detection) in update.detections.iter().enumerate().rev() {
      let Some(rect) = to_rect(&detection.bbox, width, height) else {
        continue;
      };
      if i == 0 {
        draw_thick_rect(image, rect, BEST_THICKNESS, color);
      } else {
        draw_thick_rect(image, rect, OTHER_THICKNESS, Rgb(OTHER_COLOR));
      }
    }

    draw_progress(image, &update.guidance, self.required_stable_frames);
  }
}
