// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/model/motion.rs - 背景差分运动检测
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 FallSense Contributors

use std::convert::Infallible;

use image::{GrayImage, Luma};
use imageproc::{
  distance_transform::Norm,
  filter::gaussian_blur_f32,
  morphology::{close, open},
  region_labelling::{Connectivity, connected_components},
};
use tracing::debug;

use crate::{
  frame::Frame,
  model::{Detection, Model, MotionContour},
};

// 初始方差与方差上下限（灰度值平方）
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
const BLUR_SIGMA: f32 = 1.1;
// 5x5 结构元素
const MORPH_RADIUS: u8 = 2;
// 小于该像素数的连通域直接丢弃
const NOISE_FLOOR: u32 = 16;

/// 逐像素的滑动均值/方差背景模型
///
/// 学习率为 `1 / history`，像素与背景的差值平方超过 `var_threshold * 方差` 时判为前景。
#[derive(Debug, Clone)]
pub struct BackgroundSubtractor {
  mean: Vec<f32>,
  var: Vec<f32>,
  width: u32,
  height: u32,
  alpha: f32,
  var_threshold: f32,
}

impl BackgroundSubtractor {
  pub fn new(initial_frame: &GrayImage, history: u32, var_threshold: f32) -> Self {
    let (width, height) = initial_frame.dimensions();
    let mean: Vec<f32> = initial_frame.as_raw().iter().map(|&p| p as f32).collect();
    let var = vec![VAR_INIT; mean.len()];

    Self {
      mean,
      var,
      width,
      height,
      alpha: 1.0 / history.max(1) as f32,
      var_threshold,
    }
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  /// 更新背景并返回前景掩码（前景 255，背景 0）
  pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
    let alpha = self.alpha;
    let var_threshold = self.var_threshold;
    let mask: Vec<u8> = frame
      .as_raw()
      .iter()
      .zip(self.mean.iter_mut().zip(self.var.iter_mut()))
      .map(|(&pixel, (mean, var))| {
        let diff = pixel as f32 - *mean;
        let dist = diff * diff;
        let foreground = dist > var_threshold * *var;

        *mean += alpha * diff;
        if !foreground {
          *var = (*var + alpha * (dist - *var)).clamp(VAR_MIN, VAR_MAX);
        }

        if foreground { 255 } else { 0 }
      })
      .collect();

    GrayImage::from_raw(self.width, self.height, mask).unwrap_or_else(|| GrayImage::new(self.width, self.height))
  }
}

/// 运动检测模型：背景差分 + 形态学去噪 + 连通域外接框
pub struct MotionModel {
  background: Option<BackgroundSubtractor>,
  history: u32,
  var_threshold: f32,
}

impl MotionModel {
  pub fn new(history: u32, var_threshold: f32) -> Self {
    Self {
      background: None,
      history,
      var_threshold,
    }
  }

  fn foreground(&mut self, gray: &GrayImage) -> Option<GrayImage> {
    match self.background.as_mut() {
      Some(bg) if bg.dimensions() == gray.dimensions() => Some(bg.apply(gray)),
      _ => {
        // 首帧或分辨率变化（例如重连后）时重建背景
        debug!("初始化背景模型: {}x{}", gray.width(), gray.height());
        self.background = Some(BackgroundSubtractor::new(
          gray,
          self.history,
          self.var_threshold,
        ));
        None
      }
    }
  }
}

impl Model for MotionModel {
  type Input = Frame;
  type Output = Detection;
  type Error = Infallible;

  fn infer(&mut self, input: &Frame) -> Result<Option<Detection>, Self::Error> {
    let gray = gaussian_blur_f32(&input.to_gray(), BLUR_SIGMA);
    let Some(mask) = self.foreground(&gray) else {
      return Ok(None);
    };

    let mask = open(&mask, Norm::LInf, MORPH_RADIUS);
    let mask = close(&mask, Norm::LInf, MORPH_RADIUS);
    let contours = find_contours(&mask);

    if contours.is_empty() {
      Ok(None)
    } else {
      Ok(Some(Detection::Motion(contours)))
    }
  }
}

#[derive(Clone, Copy)]
struct Extent {
  x_min: u32,
  y_min: u32,
  x_max: u32,
  y_max: u32,
  pixels: u32,
}

/// 对二值掩码做 8 邻域连通域标记，返回每个连通域的外接框
pub fn find_contours(mask: &GrayImage) -> Vec<MotionContour> {
  let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
  let mut extents: Vec<Option<Extent>> = Vec::new();

  for (x, y, label) in labels.enumerate_pixels() {
    let id = label[0] as usize;
    if id == 0 {
      continue;
    }
    if extents.len() < id {
      extents.resize(id, None);
    }
    let slot = &mut extents[id - 1];
    match slot {
      Some(e) => {
        e.x_min = e.x_min.min(x);
        e.y_min = e.y_min.min(y);
        e.x_max = e.x_max.max(x);
        e.y_max = e.y_max.max(y);
        e.pixels += 1;
      }
      None => {
        *slot = Some(Extent {
          x_min: x,
          y_min: y,
          x_max: x,
          y_max: y,
          pixels: 1,
        });
      }
    }
  }

  extents
    .into_iter()
    .flatten()
    .filter(|e| e.pixels >= NOISE_FLOOR)
    .map(|e| MotionContour {
      x: e.x_min,
      y: e.y_min,
      width: e.x_max - e.x_min + 1,
      height: e.y_max - e.y_min + 1,
      area: e.pixels,
    })
    .collect()
}
