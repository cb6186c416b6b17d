// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/output/snapshot.rs - 告警截图保存
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

use std::{
  io::Write,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::info;

use crate::output::create_timestamped;

pub const SCREENSHOT_PREFIX: &str = "fall_screenshot";

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("JPEG 质量 {0} 超出范围 [1, 100]")]
  InvalidQuality(u8),
}

/// 按指定质量把图像编码为 JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, SnapshotError> {
  if !(1..=100).contains(&quality) {
    return Err(SnapshotError::InvalidQuality(quality));
  }
  let mut buffer = Vec::new();
  image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))?;
  Ok(buffer)
}

/// 把告警帧保存为带时间戳的 JPEG 文件
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
  directory: PathBuf,
  quality: u8,
}

impl SnapshotWriter {
  pub fn new(directory: impl AsRef<Path>, quality: u8) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      quality,
    }
  }

  pub fn save(&self, image: &RgbImage, at: DateTime<Local>) -> Result<PathBuf, SnapshotError> {
    let data = encode_jpeg(image, self.quality)?;

    std::fs::create_dir_all(&self.directory)?;
    let (path, mut file) = create_timestamped(&self.directory, SCREENSHOT_PREFIX, "jpg", at)?;
    file.write_all(&data)?;

    info!("保存截图: {}", path.display());
    Ok(path)
  }
}
