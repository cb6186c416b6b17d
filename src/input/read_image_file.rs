// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/input/read_image_file.rs - 图像序列回放输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{InputError, ReadError, VideoSource},
};

const DEFAULT_FPS: f64 = 10.0;
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 按文件名顺序回放目录中的图像，用于离线评估
///
/// URL 形如 `folder:///path/to/frames?fps=10`，时间戳为 `序号 / fps`。
pub struct ImageFolderInput {
  directory: PathBuf,
  fps: f64,
  files: Vec<PathBuf>,
  cursor: usize,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .filter(|fps| *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);

    Ok(Self::new(url.path(), fps))
  }
}

impl ImageFolderInput {
  pub fn new(directory: impl AsRef<Path>, fps: f64) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      fps,
      files: Vec::new(),
      cursor: 0,
    }
  }

  fn is_image(path: &Path) -> bool {
    path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
      .unwrap_or(false)
  }
}

impl VideoSource for ImageFolderInput {
  fn open(&mut self) -> Result<(), InputError> {
    // 回放源重新打开时从断点继续，不回到开头
    if !self.files.is_empty() {
      return Ok(());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(&self.directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|p| Self::is_image(p))
      .collect();
    files.sort();

    if files.is_empty() {
      return Err(InputError::ConnectFailed(self.describe()));
    }

    info!("回放 {} 帧图像 @ {} fps", files.len(), self.fps);
    self.files = files;
    Ok(())
  }

  fn read(&mut self) -> Result<Frame, ReadError> {
    let path = self.files.get(self.cursor).ok_or(ReadError::EndOfStream)?;
    let index = self.cursor as u64;
    self.cursor += 1;

    let image = ImageReader::open(path)
      .map_err(|e| ReadError::Failed(format!("{}: {}", path.display(), e)))?
      .decode()
      .map_err(|e| ReadError::Failed(format!("{}: {}", path.display(), e)))?
      .to_rgb8();

    Ok(Frame::new(image, index, index as f64 / self.fps))
  }

  fn release(&mut self) {}

  fn describe(&self) -> String {
    self.directory.display().to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn replays_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.png", "notes.txt"] {
      let path = dir.path().join(name);
      if name.ends_with(".png") {
        RgbImage::new(4, 3).save(&path).unwrap();
      } else {
        std::fs::write(&path, "x").unwrap();
      }
    }

    let mut input = ImageFolderInput::new(dir.path(), 5.0);
    input.open().unwrap();
    let first = input.read().unwrap();
    let second = input.read().unwrap();
    assert_eq!(first.index, 0);
    assert_eq!(second.timestamp, 0.2);
    assert_eq!((first.width(), first.height()), (4, 3));
    assert_eq!(input.read().unwrap_err(), ReadError::EndOfStream);
  }

  #[test]
  fn empty_directory_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = ImageFolderInput::new(dir.path(), 5.0);
    assert!(matches!(input.open(), Err(InputError::ConnectFailed(_))));
  }

  #[test]
  fn fps_comes_from_query() {
    let url = Url::parse("folder:///tmp/frames?fps=25").unwrap();
    let input = ImageFolderInput::from_url(&url).unwrap();
    assert_eq!(input.fps, 25.0);
    assert_eq!(input.describe(), "/tmp/frames");
  }
}
