// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/smoother.rs - 速度自适应低通滤波
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

//! 对每个关键点的每个坐标轴独立做一阶低通滤波，截止频率随速度自适应：
//! 运动越快截止频率越高（延迟小），静止时截止频率低（抖动小）。

use std::{collections::HashMap, f64::consts::PI};

use crate::model::Landmark;

const DEFAULT_MIN_CUTOFF: f64 = 1.0;
const DEFAULT_SPEED_COEFFICIENT: f64 = 0.007;
const DEFAULT_DERIVATIVE_CUTOFF: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
  X,
  Y,
  Z,
  Visibility,
}

/// 单个 (关键点, 轴) 的滤波状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedLandmark {
  pub last_value: f64,
  pub last_derivative: f64,
  pub last_update_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
  pub min_cutoff: f64,
  pub speed_coefficient: f64,
  pub derivative_cutoff: f64,
}

impl Default for FilterParams {
  fn default() -> Self {
    Self {
      min_cutoff: DEFAULT_MIN_CUTOFF,
      speed_coefficient: DEFAULT_SPEED_COEFFICIENT,
      derivative_cutoff: DEFAULT_DERIVATIVE_CUTOFF,
    }
  }
}

fn smoothing_factor(cutoff: f64, dt: f64) -> f64 {
  1.0 / (1.0 + 1.0 / (2.0 * PI * cutoff * dt))
}

impl SmoothedLandmark {
  fn seed(value: f64, timestamp: f64) -> Self {
    Self {
      last_value: value,
      last_derivative: 0.0,
      last_update_time: timestamp,
    }
  }

  fn step(&mut self, raw: f64, timestamp: f64, params: &FilterParams) -> f64 {
    let dt = timestamp - self.last_update_time;
    // 时间戳重复或倒退时保持上一次的输出
    if dt <= 0.0 || !dt.is_finite() {
      return self.last_value;
    }

    let derivative = (raw - self.last_value) / dt;
    let d_alpha = smoothing_factor(params.derivative_cutoff, dt);
    let derivative = d_alpha * derivative + (1.0 - d_alpha) * self.last_derivative;

    let cutoff = params.min_cutoff + params.speed_coefficient * derivative.abs();
    let alpha = smoothing_factor(cutoff, dt);
    let value = alpha * raw + (1.0 - alpha) * self.last_value;

    self.last_value = value;
    self.last_derivative = derivative;
    self.last_update_time = timestamp;
    value
  }
}

/// 关键点平滑器，为每个 (点, 轴) 维护一份持久状态
#[derive(Debug, Clone, Default)]
pub struct SignalSmoother {
  params: FilterParams,
  states: HashMap<(usize, Axis), SmoothedLandmark>,
}

impl SignalSmoother {
  pub fn new(params: FilterParams) -> Self {
    Self {
      params,
      states: HashMap::new(),
    }
  }

  /// 首次调用原样返回输入并建立状态
  pub fn filter(&mut self, point_id: usize, axis: Axis, raw: f64, timestamp: f64) -> f64 {
    match self.states.get_mut(&(point_id, axis)) {
      Some(state) => state.step(raw, timestamp, &self.params),
      None => {
        self
          .states
          .insert((point_id, axis), SmoothedLandmark::seed(raw, timestamp));
        raw
      }
    }
  }

  /// 平滑一个关键点的全部四个分量
  pub fn filter_landmark(&mut self, point_id: usize, raw: Landmark, timestamp: f64) -> Landmark {
    Landmark {
      x: self.filter(point_id, Axis::X, raw.x as f64, timestamp) as f32,
      y: self.filter(point_id, Axis::Y, raw.y as f64, timestamp) as f32,
      z: self.filter(point_id, Axis::Z, raw.z as f64, timestamp) as f32,
      visibility: self.filter(point_id, Axis::Visibility, raw.visibility as f64, timestamp) as f32,
    }
  }

  pub fn state(&self, point_id: usize, axis: Axis) -> Option<&SmoothedLandmark> {
    self.states.get(&(point_id, axis))
  }

  pub fn reset(&mut self) {
    self.states.clear();
  }
}
