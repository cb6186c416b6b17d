// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/feature.rs - 几何特征提取
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

use tracing::trace;

use crate::{
  model::{Detection, FaceBox, Landmark, MotionContour, PoseLandmarkSet, PosePoint},
  smoother::{Axis, SignalSmoother},
};

/// 单帧单目标的几何特征
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSample {
  /// 外接框宽高比，高度为 0 时为 0
  pub aspect_ratio: f32,
  /// 外接框面积（运动轮廓为像素，其余为归一化面积）
  pub area: f32,
  /// 竖直位置，1 表示位于画面顶部
  pub vertical_position: f32,
  /// 肩部与髋部的竖直距离；非姿态模式下为目标的归一化高度
  pub shoulder_hip_ratio: f32,
  pub timestamp: f64,
}

impl FeatureSample {
  /// 归一化的肩部高度（y 轴向下）
  pub fn shoulder_y(&self) -> f32 {
    1.0 - self.vertical_position
  }
}

/// 宽高比，高度为 0 时返回 0
pub fn aspect_ratio(width: f32, height: f32) -> f32 {
  if height > 0.0 { width / height } else { 0.0 }
}

/// 特征提取策略
pub trait FeatureExtractor {
  /// 返回 `None` 表示本帧没有可跟踪的目标
  fn extract(
    &mut self,
    detection: &Detection,
    frame_size: (u32, u32),
    timestamp: f64,
  ) -> Option<FeatureSample>;

  /// 跟踪丢失后清理内部状态
  fn reset(&mut self) {}
}

/// 运动轮廓特征：取面积超过阈值的最大轮廓作为主体
#[derive(Debug, Clone)]
pub struct ContourFeatures {
  min_area: u32,
}

impl ContourFeatures {
  pub fn new(min_area: u32) -> Self {
    Self { min_area }
  }

  /// 面积超过阈值的轮廓
  pub fn significant<'a>(&self, contours: &'a [MotionContour]) -> impl Iterator<Item = &'a MotionContour> {
    let min_area = self.min_area;
    contours.iter().filter(move |c| c.area > min_area)
  }
}

impl FeatureExtractor for ContourFeatures {
  fn extract(
    &mut self,
    detection: &Detection,
    (_, frame_height): (u32, u32),
    timestamp: f64,
  ) -> Option<FeatureSample> {
    let Detection::Motion(contours) = detection else {
      return None;
    };
    let subject = self.significant(contours).max_by_key(|c| c.area)?;

    let width = subject.width as f32;
    let height = subject.height as f32;
    let frame_height = frame_height.max(1) as f32;
    let center_y = subject.y as f32 + height / 2.0;

    Some(FeatureSample {
      aspect_ratio: aspect_ratio(width, height),
      area: width * height,
      vertical_position: 1.0 - center_y / frame_height,
      shoulder_hip_ratio: height / frame_height,
      timestamp,
    })
  }
}

const POSE_TORSO: [PosePoint; 4] = [
  PosePoint::LeftShoulder,
  PosePoint::RightShoulder,
  PosePoint::LeftHip,
  PosePoint::RightHip,
];

/// 关键点特征：先平滑再计算肩髋几何关系
#[derive(Debug, Clone)]
pub struct LandmarkFeatures {
  smoother: SignalSmoother,
  min_visibility: f32,
}

impl LandmarkFeatures {
  pub fn new(smoother: SignalSmoother, min_visibility: f32) -> Self {
    Self {
      smoother,
      min_visibility,
    }
  }

  fn pose(&mut self, set: &PoseLandmarkSet, timestamp: f64) -> Option<FeatureSample> {
    let [ls, rs, lh, rh] =
      POSE_TORSO.map(|p| self.smoother.filter_landmark(p as usize, set.get(p), timestamp));

    if [ls, rs, lh, rh]
      .iter()
      .any(|l| l.visibility < self.min_visibility)
    {
      trace!("躯干关键点置信度不足");
      return None;
    }

    let shoulder_y = (ls.y + rs.y) / 2.0;
    let hip_y = (lh.y + rh.y) / 2.0;
    let (x_min, x_max) = min_max([ls.x, rs.x, lh.x, rh.x]);
    let (y_min, y_max) = min_max([ls.y, rs.y, lh.y, rh.y]);

    Some(FeatureSample {
      aspect_ratio: aspect_ratio(x_max - x_min, y_max - y_min),
      area: (x_max - x_min) * (y_max - y_min),
      vertical_position: 1.0 - shoulder_y,
      shoulder_hip_ratio: (shoulder_y - hip_y).abs(),
      timestamp,
    })
  }

  fn hand(&mut self, hand: &[Landmark], timestamp: f64) -> Option<FeatureSample> {
    let points: Vec<Landmark> = hand
      .iter()
      .enumerate()
      .map(|(i, &l)| self.smoother.filter_landmark(i, l, timestamp))
      .collect();
    if points.is_empty() {
      return None;
    }

    let mean_y = points.iter().map(|l| l.y).sum::<f32>() / points.len() as f32;
    let (x_min, x_max) = points
      .iter()
      .fold((f32::MAX, f32::MIN), |(lo, hi), l| (lo.min(l.x), hi.max(l.x)));
    let (y_min, y_max) = points
      .iter()
      .fold((f32::MAX, f32::MIN), |(lo, hi), l| (lo.min(l.y), hi.max(l.y)));

    Some(FeatureSample {
      aspect_ratio: aspect_ratio(x_max - x_min, y_max - y_min),
      area: (x_max - x_min) * (y_max - y_min),
      vertical_position: 1.0 - mean_y,
      shoulder_hip_ratio: y_max - y_min,
      timestamp,
    })
  }

  fn face(&mut self, face: &FaceBox, timestamp: f64) -> FeatureSample {
    // 点 0 为框的左上角，点 1 为框的尺寸
    let mut s = |id: usize, axis: Axis, v: f32| self.smoother.filter(id, axis, v as f64, timestamp) as f32;
    let y = s(0, Axis::Y, face.y);
    let w = s(1, Axis::X, face.w);
    let h = s(1, Axis::Y, face.h);

    FeatureSample {
      aspect_ratio: aspect_ratio(w, h),
      area: w * h,
      vertical_position: 1.0 - (y + h / 2.0),
      shoulder_hip_ratio: h,
      timestamp,
    }
  }
}

fn min_max(values: [f32; 4]) -> (f32, f32) {
  values
    .iter()
    .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

impl FeatureExtractor for LandmarkFeatures {
  fn extract(
    &mut self,
    detection: &Detection,
    _frame_size: (u32, u32),
    timestamp: f64,
  ) -> Option<FeatureSample> {
    match detection {
      Detection::Pose(set) => self.pose(set, timestamp),
      Detection::Hand(set) => {
        let hand = set.hands.first()?;
        self.hand(hand, timestamp)
      }
      Detection::Face(set) => {
        let face = set
          .faces
          .iter()
          .max_by(|a, b| (a.w * a.h).total_cmp(&(b.w * b.h)))?;
        Some(self.face(face, timestamp))
      }
      Detection::Motion(_) => None,
    }
  }

  fn reset(&mut self) {
    self.smoother.reset();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{FaceBoxSet, POSE_LANDMARK_COUNT};

  fn pose(shoulder_y: f32, hip_y: f32) -> Detection {
    let mut points = vec![Landmark::default(); POSE_LANDMARK_COUNT];
    for (p, y, x) in [
      (PosePoint::LeftShoulder, shoulder_y, 0.4),
      (PosePoint::RightShoulder, shoulder_y, 0.6),
      (PosePoint::LeftHip, hip_y, 0.42),
      (PosePoint::RightHip, hip_y, 0.58),
    ] {
      points[p as usize] = Landmark {
        x,
        y,
        z: 0.0,
        visibility: 0.9,
      };
    }
    Detection::Pose(PoseLandmarkSet::new(points).unwrap())
  }

  #[test]
  fn zero_height_aspect_ratio_is_zero() {
    assert_eq!(aspect_ratio(12.0, 0.0), 0.0);
    assert_eq!(aspect_ratio(0.0, 0.0), 0.0);
    assert_eq!(aspect_ratio(3.0, 2.0), 1.5);
  }

  #[test]
  fn contour_strategy_filters_by_area_and_picks_largest() {
    let mut features = ContourFeatures::new(5000);
    let contours = vec![
      MotionContour {
        x: 0,
        y: 0,
        width: 10,
        height: 10,
        area: 100,
      },
      MotionContour {
        x: 100,
        y: 200,
        width: 200,
        height: 100,
        area: 18000,
      },
      MotionContour {
        x: 0,
        y: 0,
        width: 60,
        height: 120,
        area: 7000,
      },
    ];
    let sample = features
      .extract(&Detection::Motion(contours), (640, 480), 1.0)
      .unwrap();
    assert_eq!(sample.aspect_ratio, 2.0);
    assert_eq!(sample.area, 20000.0);
    assert!((sample.vertical_position - (1.0 - 250.0 / 480.0)).abs() < 1e-6);
  }

  #[test]
  fn contour_strategy_without_significant_motion_is_lost() {
    let mut features = ContourFeatures::new(5000);
    let contours = vec![MotionContour {
      x: 0,
      y: 0,
      width: 50,
      height: 0,
      area: 4999,
    }];
    assert!(
      features
        .extract(&Detection::Motion(contours), (640, 480), 0.0)
        .is_none()
    );
  }

  #[test]
  fn contour_with_zero_height_has_zero_ratio() {
    let mut features = ContourFeatures::new(0);
    let contours = vec![MotionContour {
      x: 0,
      y: 0,
      width: 50,
      height: 0,
      area: 10,
    }];
    let sample = features
      .extract(&Detection::Motion(contours), (640, 480), 0.0)
      .unwrap();
    assert_eq!(sample.aspect_ratio, 0.0);
  }

  #[test]
  fn pose_strategy_computes_torso_geometry() {
    let mut features = LandmarkFeatures::new(SignalSmoother::default(), 0.5);
    let sample = features.extract(&pose(0.3, 0.6), (640, 480), 0.0).unwrap();
    assert!((sample.shoulder_y() - 0.3).abs() < 1e-6);
    assert!((sample.vertical_position - 0.7).abs() < 1e-6);
    assert!((sample.shoulder_hip_ratio - 0.3).abs() < 1e-6);
  }

  #[test]
  fn pose_with_hidden_torso_is_lost() {
    let mut features = LandmarkFeatures::new(SignalSmoother::default(), 0.95);
    assert!(features.extract(&pose(0.3, 0.6), (640, 480), 0.0).is_none());
  }

  #[test]
  fn face_strategy_uses_largest_box() {
    let mut features = LandmarkFeatures::new(SignalSmoother::default(), 0.5);
    let faces = Detection::Face(FaceBoxSet {
      faces: vec![
        FaceBox {
          x: 0.1,
          y: 0.1,
          w: 0.05,
          h: 0.05,
          score: 1.0,
        },
        FaceBox {
          x: 0.4,
          y: 0.2,
          w: 0.2,
          h: 0.2,
          score: 1.0,
        },
      ],
    });
    let sample = features.extract(&faces, (640, 480), 0.0).unwrap();
    assert!((sample.vertical_position - 0.7).abs() < 1e-6);
    assert!((sample.aspect_ratio - 1.0).abs() < 1e-6);
  }
}
