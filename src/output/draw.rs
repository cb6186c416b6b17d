// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/output/draw.rs - 检测结果与状态叠加显示
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

use ab_glyph::{FontArc, PxScale};
use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
  },
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::model::{Detection, Landmark, PosePoint};

const UPRIGHT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FALL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const STATUS_BAR_HEIGHT: u32 = 20;
const STATUS_FONT_SIZE: f32 = 16.0;
const STATUS_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const RECORDING_BORDER: i32 = 6;
const LANDMARK_RADIUS: i32 = 3;

/// 系统中常见的无衬线字体，未指定 `--font` 时依次尝试
const SYSTEM_FONTS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  Invalid(PathBuf),
}

/// 状态条文字使用的字体
#[derive(Clone)]
pub struct OverlayFont(FontArc);

impl OverlayFont {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, FontError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| FontError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    FontArc::try_from_vec(data)
      .map(OverlayFont)
      .map_err(|_| FontError::Invalid(path.to_path_buf()))
  }

  /// 在常见系统路径中查找可用字体
  pub fn discover() -> Option<Self> {
    SYSTEM_FONTS.iter().find_map(|path| match Self::load(path) {
      Ok(font) => {
        debug!("使用系统字体: {}", path);
        Some(font)
      }
      Err(_) => None,
    })
  }
}

/// 告警后保持“检测到跌倒”状态的时长（秒）
pub const FALL_BANNER_SECONDS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Monitoring,
  FallDetected,
  Recording,
}

impl Status {
  pub fn resolve(now: f64, last_alert: Option<f64>, recording: bool) -> Self {
    if recording {
      Status::Recording
    } else if last_alert.is_some_and(|t| now - t < FALL_BANNER_SECONDS) {
      Status::FallDetected
    } else {
      Status::Monitoring
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Status::Monitoring => "MONITORING",
      Status::FallDetected => "FALL DETECTED",
      Status::Recording => "RECORDING",
    }
  }

  pub fn color(self) -> Rgb<u8> {
    match self {
      Status::Monitoring => UPRIGHT_COLOR,
      Status::FallDetected => Rgb([255, 165, 0]),
      Status::Recording => FALL_COLOR,
    }
  }
}

/// 一帧的叠加信息
pub struct Overlay<'a> {
  pub status: Status,
  pub detection: Option<&'a Detection>,
  /// 本帧是否判定为跌倒，决定检测框颜色
  pub fall: bool,
  /// 面积不超过该值的运动轮廓不绘制
  pub min_area: u32,
  /// 状态条文字：状态、时间与帧率；没有字体时只画色条
  pub caption: Option<Caption<'a>>,
}

pub struct Caption<'a> {
  pub font: &'a OverlayFont,
  pub time: DateTime<Local>,
  pub fps: f64,
}

impl Caption<'_> {
  pub fn text(&self, status: Status) -> String {
    format!(
      "{}  {}  {:.1} FPS",
      status.label(),
      self.time.format("%Y-%m-%d %H:%M:%S"),
      self.fps
    )
  }
}

fn to_pixel(image: &RgbImage, point: &Landmark) -> (f32, f32) {
  (
    (point.x * image.width() as f32).clamp(0.0, image.width() as f32 - 1.0),
    (point.y * image.height() as f32).clamp(0.0, image.height() as f32 - 1.0),
  )
}

// 在图像上绘制一个矩形边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
fn draw_bbox(image: &mut RgbImage, bbox: [i32; 4], color: Rgb<u8>) {
  let (w, h) = (image.width() as i32, image.height() as i32);
  if w == 0 || h == 0 {
    return;
  }

  let x_min = bbox[0].clamp(0, w - 1);
  let y_min = bbox[1].clamp(0, h - 1);
  let x_max = bbox[2].clamp(0, w - 1);
  let y_max = bbox[3].clamp(0, h - 1);

  for t in 0..BOX_THICKNESS {
    let width = x_max - x_min - 2 * t;
    let height = y_max - y_min - 2 * t;
    if width <= 0 || height <= 0 {
      break;
    }
    let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
    draw_hollow_rect_mut(image, rect, color);
  }
}

fn draw_border(image: &mut RgbImage, color: Rgb<u8>) {
  let (w, h) = (image.width(), image.height());
  let t = (RECORDING_BORDER as u32).min(w / 2).min(h / 2);
  if t == 0 {
    return;
  }
  draw_filled_rect_mut(image, Rect::at(0, 0).of_size(w, t), color);
  draw_filled_rect_mut(image, Rect::at(0, (h - t) as i32).of_size(w, t), color);
  draw_filled_rect_mut(image, Rect::at(0, 0).of_size(t, h), color);
  draw_filled_rect_mut(image, Rect::at((w - t) as i32, 0).of_size(t, h), color);
}

fn draw_landmarks(image: &mut RgbImage, points: &[Landmark]) {
  for point in points {
    let (x, y) = to_pixel(image, point);
    draw_filled_circle_mut(image, (x as i32, y as i32), LANDMARK_RADIUS, LANDMARK_COLOR);
  }
}

fn draw_detection(image: &mut RgbImage, detection: &Detection, color: Rgb<u8>, min_area: u32) {
  match detection {
    Detection::Motion(contours) => {
      for c in contours.iter().filter(|c| c.area > min_area) {
        let bbox = [
          c.x as i32,
          c.y as i32,
          (c.x + c.width) as i32,
          (c.y + c.height) as i32,
        ];
        draw_bbox(image, bbox, color);
      }
    }
    Detection::Pose(pose) => {
      draw_landmarks(image, pose.points());
      // 躯干：两肩中点到两髋中点
      let mid = |a: Landmark, b: Landmark| Landmark {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
        ..a
      };
      let shoulder = mid(pose.get(PosePoint::LeftShoulder), pose.get(PosePoint::RightShoulder));
      let hip = mid(pose.get(PosePoint::LeftHip), pose.get(PosePoint::RightHip));
      let (from, to) = (to_pixel(image, &shoulder), to_pixel(image, &hip));
      draw_line_segment_mut(image, from, to, color);
    }
    Detection::Hand(hands) => {
      for hand in &hands.hands {
        draw_landmarks(image, hand);
      }
    }
    Detection::Face(faces) => {
      let (w, h) = (image.width() as f32, image.height() as f32);
      for face in &faces.faces {
        let bbox = [
          (face.x * w).floor() as i32,
          (face.y * h).floor() as i32,
          ((face.x + face.w) * w).ceil() as i32,
          ((face.y + face.h) * h).ceil() as i32,
        ];
        draw_bbox(image, bbox, color);
      }
    }
  }
}

/// 在图像上叠加状态条、检测结果，录像时加红色边框
pub fn draw_overlay(image: &mut RgbImage, overlay: &Overlay) {
  if image.width() == 0 || image.height() == 0 {
    return;
  }

  if let Some(detection) = overlay.detection {
    let color = if overlay.fall { FALL_COLOR } else { UPRIGHT_COLOR };
    draw_detection(image, detection, color, overlay.min_area);
  }

  if overlay.status == Status::Recording {
    draw_border(image, FALL_COLOR);
  }

  let bar = STATUS_BAR_HEIGHT.min(image.height());
  draw_filled_rect_mut(
    image,
    Rect::at(0, 0).of_size(image.width(), bar),
    overlay.status.color(),
  );

  if let Some(caption) = &overlay.caption {
    draw_text_mut(
      image,
      TEXT_COLOR,
      STATUS_TEXT_PADDING,
      STATUS_TEXT_PADDING,
      PxScale::from(STATUS_FONT_SIZE),
      &caption.font.0,
      &caption.text(overlay.status),
    );
  }
}

/// 返回叠加后的新图像，原图不变
pub fn annotate(image: &RgbImage, overlay: &Overlay) -> RgbImage {
  let mut annotated = image.clone();
  draw_overlay(&mut annotated, overlay);
  annotated
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::MotionContour;
  use chrono::TimeZone;

  fn overlay(detection: Option<&Detection>, status: Status, fall: bool) -> Overlay<'_> {
    Overlay {
      status,
      detection,
      fall,
      min_area: 100,
      caption: None,
    }
  }

  #[test]
  fn status_follows_alert_and_recording() {
    assert_eq!(Status::resolve(10.0, None, false), Status::Monitoring);
    assert_eq!(Status::resolve(10.0, Some(8.0), false), Status::FallDetected);
    assert_eq!(Status::resolve(10.0, Some(4.0), false), Status::Monitoring);
    assert_eq!(Status::resolve(10.0, Some(9.0), true), Status::Recording);
  }

  #[test]
  fn fall_boxes_are_red_and_small_contours_skipped() {
    let image = RgbImage::new(100, 100);
    let detection = Detection::Motion(vec![
      MotionContour {
        x: 20,
        y: 40,
        width: 50,
        height: 30,
        area: 1500,
      },
      MotionContour {
        x: 80,
        y: 80,
        width: 5,
        height: 5,
        area: 25,
      },
    ]);
    let out = annotate(&image, &overlay(Some(&detection), Status::Monitoring, true));

    assert_eq!(*out.get_pixel(20, 50), FALL_COLOR);
    assert_eq!(*out.get_pixel(45, 55), Rgb([0, 0, 0]));
    assert_eq!(*out.get_pixel(80, 82), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(20, 50), Rgb([0, 0, 0]));
  }

  #[test]
  fn recording_draws_border_and_status_bar() {
    let image = RgbImage::new(64, 48);
    let out = annotate(&image, &overlay(None, Status::Recording, false));
    assert_eq!(*out.get_pixel(0, 30), FALL_COLOR);
    assert_eq!(*out.get_pixel(63, 47), FALL_COLOR);
    assert_eq!(*out.get_pixel(32, 5), Status::Recording.color());
    assert_eq!(*out.get_pixel(32, 30), Rgb([0, 0, 0]));
  }

  #[test]
  fn caption_shows_status_time_and_fps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.ttf");
    assert!(matches!(OverlayFont::load(&path), Err(FontError::Io { .. })));
    let junk = dir.path().join("junk.ttf");
    std::fs::write(&junk, b"not a font").unwrap();
    assert!(matches!(OverlayFont::load(&junk), Err(FontError::Invalid(_))));

    // 没有可用系统字体的环境只验证加载错误
    let Some(font) = OverlayFont::discover() else {
      return;
    };
    let time = Local.with_ymd_and_hms(2026, 3, 1, 8, 5, 9).unwrap();
    let caption = Caption {
      font: &font,
      time,
      fps: 24.96,
    };
    assert_eq!(
      caption.text(Status::FallDetected),
      "FALL DETECTED  2026-03-01 08:05:09  25.0 FPS"
    );

    let image = RgbImage::new(320, 48);
    let mut with_caption = overlay(None, Status::Monitoring, false);
    with_caption.caption = Some(caption);
    let out = annotate(&image, &with_caption);
    let text_pixels = (0..320)
      .flat_map(|x| (0..STATUS_BAR_HEIGHT).map(move |y| (x, y)))
      .filter(|&(x, y)| *out.get_pixel(x, y) != Status::Monitoring.color())
      .count();
    assert!(text_pixels > 0);
  }
}
