// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/alert/sound.rs - 本地提示音
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

use std::process::{Command, Stdio};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoundError {
  #[error("无法执行 {program}: {source}")]
  Spawn {
    program: String,
    source: std::io::Error,
  },
  #[error("{program} 退出状态异常: {status}")]
  Status {
    program: String,
    status: std::process::ExitStatus,
  },
}

/// 通过系统播放器播放提示音
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSound {
  program: String,
  args: Vec<String>,
}

impl Default for AlertSound {
  fn default() -> Self {
    if cfg!(target_os = "macos") {
      Self::command("afplay", ["/System/Library/Sounds/Sosumi.aiff"])
    } else {
      Self::command(
        "aplay",
        ["-q", "/usr/share/sounds/sound-icons/glass-breaking-2.wav"],
      )
    }
  }
}

impl AlertSound {
  pub fn command<I, S>(program: &str, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      program: program.to_string(),
      args: args.into_iter().map(Into::into).collect(),
    }
  }

  /// 阻塞直到播放结束，应在后台线程调用
  pub fn play(&self) -> Result<(), SoundError> {
    let status = Command::new(&self.program)
      .args(&self.args)
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .map_err(|source| SoundError::Spawn {
        program: self.program.clone(),
        source,
      })?;

    if !status.success() {
      return Err(SoundError::Status {
        program: self.program.clone(),
        status,
      });
    }
    Ok(())
  }
}
