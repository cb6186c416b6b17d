// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/model.rs - 检测模型与检测结果
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

use serde::Deserialize;
use thiserror::Error;

/// 推理模型
///
/// 对一帧图像推理，返回 `Ok(None)` 表示画面中没有目标，这不是错误。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Option<Self::Output>, Self::Error>;
}

/// 运动轮廓：外接矩形（像素）与面积
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionContour {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
  pub area: u32,
}

/// 单个关键点，坐标归一化到 [0, 1]，y 轴向下
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Landmark {
  pub x: f32,
  pub y: f32,
  #[serde(default)]
  pub z: f32,
  #[serde(default = "full_visibility")]
  pub visibility: f32,
}

fn full_visibility() -> f32 {
  1.0
}

/// 人体姿态关键点编号（33 点拓扑）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosePoint {
  LeftShoulder = 11,
  RightShoulder = 12,
  LeftHip = 23,
  RightHip = 24,
}

pub const POSE_LANDMARK_COUNT: usize = 33;
pub const HAND_LANDMARK_COUNT: usize = 21;

/// 一个人体的全部姿态关键点
#[derive(Debug, Clone, PartialEq)]
pub struct PoseLandmarkSet {
  points: Box<[Landmark]>,
}

impl PoseLandmarkSet {
  pub fn new(points: Vec<Landmark>) -> Result<Self, ModelError> {
    if points.len() != POSE_LANDMARK_COUNT {
      return Err(ModelError::LandmarkCount {
        expected: POSE_LANDMARK_COUNT,
        actual: points.len(),
      });
    }
    Ok(Self {
      points: points.into_boxed_slice(),
    })
  }

  pub fn get(&self, point: PosePoint) -> Landmark {
    self.points[point as usize]
  }

  pub fn points(&self) -> &[Landmark] {
    &self.points
  }
}

/// 手部关键点，每只手 21 个点
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarkSet {
  pub hands: Vec<Box<[Landmark]>>,
}

/// 人脸框，归一化坐标
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FaceBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  #[serde(default = "full_visibility")]
  pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBoxSet {
  pub faces: Vec<FaceBox>,
}

/// 单帧检测结果
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
  Motion(Vec<MotionContour>),
  Pose(PoseLandmarkSet),
  Hand(HandLandmarkSet),
  Face(FaceBoxSet),
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("关键点数量错误: 期望 {expected}, 实际 {actual}")]
  LandmarkCount { expected: usize, actual: usize },
  #[error("关键点文件错误: {0}")]
  LandmarkFile(#[from] std::io::Error),
  #[error("关键点记录解析错误 (第 {line} 行): {source}")]
  LandmarkRecord {
    line: usize,
    source: serde_json::Error,
  },
}

pub mod landmark_file;
pub mod motion;

pub use self::landmark_file::{LandmarkFileModel, LandmarkKind};
pub use self::motion::{BackgroundSubtractor, MotionModel};
