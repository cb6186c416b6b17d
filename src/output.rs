// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/output.rs - 告警产物输出与画面显示
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
  fs::{File, OpenOptions},
  io::{self, ErrorKind},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

pub mod draw;

mod recorder;
pub use self::recorder::{DEFAULT_RECORD_FPS, Recorder, RecorderError};

mod snapshot;
pub use self::snapshot::{SnapshotError, SnapshotWriter, encode_jpeg};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display::{GStreamerDisplay, GStreamerDisplayError};

/// 按秒级时间戳创建新文件，例如 `fall_screenshot_20260101_120000.jpg`
///
/// 同一秒内重名时追加序号。文件以 `create_new` 方式原子创建，
/// 多个后台任务同时落盘也不会拿到同一个文件名。
pub fn create_timestamped(
  directory: &Path,
  prefix: &str,
  extension: &str,
  at: DateTime<Local>,
) -> io::Result<(PathBuf, File)> {
  let stem = format!("{}_{}", prefix, at.format("%Y%m%d_%H%M%S"));
  let mut n = 0u32;
  loop {
    let path = match n {
      0 => directory.join(format!("{}.{}", stem, extension)),
      n => directory.join(format!("{}_{}.{}", stem, n, extension)),
    };
    match OpenOptions::new().write(true).create_new(true).open(&path) {
      Ok(file) => return Ok((path, file)),
      Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn names_are_second_granular_and_unique() {
    let dir = tempfile::tempdir().unwrap();
    let at = Local.with_ymd_and_hms(2026, 3, 1, 8, 5, 9).unwrap();

    let (first, _) = create_timestamped(dir.path(), "fall_screenshot", "jpg", at).unwrap();
    assert_eq!(
      first.file_name().unwrap(),
      "fall_screenshot_20260301_080509.jpg"
    );

    let (second, _) = create_timestamped(dir.path(), "fall_screenshot", "jpg", at).unwrap();
    assert_eq!(
      second.file_name().unwrap(),
      "fall_screenshot_20260301_080509_1.jpg"
    );
  }

  #[test]
  fn concurrent_writers_never_share_a_name() {
    let dir = tempfile::tempdir().unwrap();
    let at = Local.with_ymd_and_hms(2026, 3, 1, 8, 5, 9).unwrap();

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let dir = dir.path().to_path_buf();
        std::thread::spawn(move || create_timestamped(&dir, "fall_screenshot", "jpg", at).unwrap().0)
      })
      .collect();
    let mut paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 8);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 8);
  }

  #[test]
  fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let at = Local.with_ymd_and_hms(2026, 3, 1, 8, 5, 9).unwrap();
    assert!(create_timestamped(&dir.path().join("missing"), "fall_event", "mp4", at).is_err());
  }
}
