// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/model/landmark_file.rs - 从 JSON Lines 文件读取关键点推理结果
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

//! 姿态/手部/人脸推理由外部模型完成，结果按帧序号写入 JSON Lines 文件：
//!
//! ```text
//! {"frame": 0, "pose": [{"x": 0.5, "y": 0.3, "z": 0.0, "visibility": 0.9}, ...]}
//! {"frame": 1, "hands": [[{"x": 0.4, "y": 0.6}, ...]]}
//! {"frame": 2, "faces": [{"x": 0.4, "y": 0.2, "w": 0.1, "h": 0.12, "score": 0.8}]}
//! ```
//!
//! 缺失的帧视为没有检测到目标。

use std::{
  collections::HashMap,
  fs::File,
  io::{BufRead, BufReader, Read},
  path::Path,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
  frame::Frame,
  model::{
    Detection, FaceBox, FaceBoxSet, HAND_LANDMARK_COUNT, HandLandmarkSet, Landmark, Model,
    ModelError, PoseLandmarkSet,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkKind {
  Pose,
  Hand,
  Face,
}

#[derive(Debug, Deserialize)]
struct LandmarkRecord {
  frame: u64,
  #[serde(default)]
  pose: Option<Vec<Landmark>>,
  #[serde(default)]
  hands: Option<Vec<Vec<Landmark>>>,
  #[serde(default)]
  faces: Option<Vec<FaceBox>>,
}

pub struct LandmarkFileModel {
  kind: LandmarkKind,
  records: HashMap<u64, LandmarkRecord>,
}

impl LandmarkFileModel {
  pub fn open(path: impl AsRef<Path>, kind: LandmarkKind) -> Result<Self, ModelError> {
    let path = path.as_ref();
    info!("读取关键点文件: {}", path.display());
    let model = Self::from_reader(File::open(path)?, kind)?;
    info!("共 {} 帧关键点记录", model.records.len());
    Ok(model)
  }

  pub fn from_reader<R: Read>(reader: R, kind: LandmarkKind) -> Result<Self, ModelError> {
    let mut records = HashMap::new();
    for (line_no, line) in BufReader::new(reader).lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let record: LandmarkRecord =
        serde_json::from_str(&line).map_err(|source| ModelError::LandmarkRecord {
          line: line_no + 1,
          source,
        })?;
      records.insert(record.frame, record);
    }
    Ok(Self { kind, records })
  }
}

impl Model for LandmarkFileModel {
  type Input = Frame;
  type Output = Detection;
  type Error = ModelError;

  fn infer(&mut self, input: &Frame) -> Result<Option<Detection>, Self::Error> {
    let Some(record) = self.records.get(&input.index) else {
      return Ok(None);
    };

    let detection = match self.kind {
      LandmarkKind::Pose => match &record.pose {
        Some(points) if !points.is_empty() => {
          Some(Detection::Pose(PoseLandmarkSet::new(points.clone())?))
        }
        _ => None,
      },
      LandmarkKind::Hand => {
        let hands: Vec<Box<[Landmark]>> = record
          .hands
          .iter()
          .flatten()
          .filter(|hand| {
            let ok = hand.len() == HAND_LANDMARK_COUNT;
            if !ok {
              warn!("第 {} 帧手部关键点数量异常: {}", input.index, hand.len());
            }
            ok
          })
          .map(|hand| hand.clone().into_boxed_slice())
          .collect();
        (!hands.is_empty()).then(|| Detection::Hand(HandLandmarkSet { hands }))
      }
      LandmarkKind::Face => match &record.faces {
        Some(faces) if !faces.is_empty() => Some(Detection::Face(FaceBoxSet {
          faces: faces.clone(),
        })),
        _ => None,
      },
    };

    Ok(detection)
  }
}
