// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use std::sync::Arc;

use image::{GrayImage, RgbImage};

const RGB_CHANNELS: usize = 3;

/// 一帧视频图像
///
/// 像素数据通过 `Arc` 共享，帧本身不可变；告警时只需克隆引用即可得到快照。
#[derive(Debug, Clone)]
pub struct Frame {
  image: Arc<RgbImage>,
  /// 帧序号（从 0 开始）
  pub index: u64,
  /// 采集时间（秒）
  pub timestamp: f64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp: f64) -> Self {
    Self {
      image: Arc::new(image),
      index,
      timestamp,
    }
  }

  /// 由紧密排列的 RGB 数据构造帧，长度不匹配时返回 `None`
  pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, index: u64, timestamp: f64) -> Option<Self> {
    if data.len() != RGB_CHANNELS * width as usize * height as usize {
      return None;
    }
    RgbImage::from_raw(width, height, data).map(|image| Self::new(image, index, timestamp))
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 告警使用的不可变快照
  pub fn snapshot(&self) -> Arc<RgbImage> {
    Arc::clone(&self.image)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn to_gray(&self) -> GrayImage {
    image::imageops::grayscale(self.image.as_ref())
  }
}

/// 当前墙钟时间（秒），用于实时视频源的帧时间戳
pub fn wall_clock_seconds() -> f64 {
  chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_rgb_rejects_wrong_length() {
    assert!(Frame::from_rgb(4, 4, vec![0; 10], 0, 0.0).is_none());
    let frame = Frame::from_rgb(4, 2, vec![0; 24], 3, 1.5).unwrap();
    assert_eq!(frame.width(), 4);
    assert_eq!(frame.height(), 2);
    assert_eq!(frame.index, 3);
  }

  #[test]
  fn snapshot_shares_pixels() {
    let frame = Frame::new(RgbImage::new(2, 2), 0, 0.0);
    let snap = frame.snapshot();
    assert!(std::ptr::eq(snap.as_ref(), frame.image()));
  }
}
