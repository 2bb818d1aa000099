// 该文件是 Chejian （车检） 项目的一部分。
// src/region.rs - 区域几何：面积、绘制顺序与栅格化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point as PixelPoint;
use imageproc::rect::Rect;
use thiserror::Error;

use crate::detection::{BBox, Detection, Geometry, Point};

pub const MASK_ON: Luma<u8> = Luma([255]);

/// 多边形至少需要的顶点数
pub const MIN_POLYGON_POINTS: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum RegionError {
  #[error("多边形坐标非有限值")]
  NonFiniteCoordinate,
  #[error("多边形去重后仅剩 {0} 个顶点")]
  DegeneratePolygon(usize),
}

/// 区域面积：多边形用鞋带公式，否则用外接框
pub fn region_area(detection: &Detection) -> f32 {
  match &detection.geometry {
    Geometry::Polygon { points, .. } if points.len() >= MIN_POLYGON_POINTS => polygon_area(points),
    geometry => geometry.bbox().area(),
  }
}

pub fn polygon_area(points: &[Point]) -> f32 {
  let n = points.len();
  let twice = (0..n)
    .map(|i| {
      let (a, b) = (points[i], points[(i + 1) % n]);
      a.x * b.y - b.x * a.y
    })
    .sum::<f32>();
  twice.abs() / 2.0
}

/// 绘制顺序：面积从大到小，面积相同按原始下标
///
/// 区域渲染、标签放置与掩码导出共用此顺序。
pub fn paint_order(regions: &[Detection]) -> Vec<usize> {
  let areas = regions.iter().map(region_area).collect::<Vec<_>>();
  let mut order = (0..regions.len()).collect::<Vec<_>>();
  order.sort_by(|&a, &b| areas[b].total_cmp(&areas[a]));
  order
}

/// 浮点坐标转像素坐标，限制在 `[-(w+h), 2(w+h)]` 内
///
/// 远超画布的坐标在后续整数运算中会溢出；限制后画布内的绘制结果不变。
pub fn to_pixel(value: f32, width: u32, height: u32) -> i32 {
  let limit = (width as f32) + (height as f32);
  value.clamp(-limit, 2.0 * limit) as i32
}

/// 将多边形顶点转为像素坐标，去掉连续重复点与闭合点
fn to_pixel_polygon(points: &[Point], width: u32, height: u32) -> Result<Vec<PixelPoint<i32>>, RegionError> {
  if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
    return Err(RegionError::NonFiniteCoordinate);
  }

  let mut poly: Vec<PixelPoint<i32>> = Vec::with_capacity(points.len());
  for p in points {
    let pixel = PixelPoint::new(to_pixel(p.x, width, height), to_pixel(p.y, width, height));
    if poly.last() != Some(&pixel) {
      poly.push(pixel);
    }
  }
  while poly.len() > 1 && poly.first() == poly.last() {
    poly.pop();
  }

  if poly.len() < MIN_POLYGON_POINTS {
    return Err(RegionError::DegeneratePolygon(poly.len()));
  }
  Ok(poly)
}

/// 填充多边形得到二值掩码（0/255）
pub fn rasterize_polygon(points: &[Point], width: u32, height: u32) -> Result<GrayImage, RegionError> {
  let poly = to_pixel_polygon(points, width, height)?;
  let mut mask = GrayImage::new(width, height);
  draw_polygon_mut(&mut mask, &poly, MASK_ON);
  Ok(mask)
}

/// 填充外接框得到二值掩码
pub fn rasterize_box(bbox: &BBox, width: u32, height: u32) -> GrayImage {
  let mut mask = GrayImage::new(width, height);
  let x1 = to_pixel(bbox.x1.floor(), width, height);
  let y1 = to_pixel(bbox.y1.floor(), width, height);
  let x2 = to_pixel(bbox.x2.ceil(), width, height);
  let y2 = to_pixel(bbox.y2.ceil(), width, height);
  if x2 > x1 && y2 > y1 {
    let rect = Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32);
    draw_filled_rect_mut(&mut mask, rect, MASK_ON);
  }
  mask
}

/// 区域栅格化：有多边形填充多边形，退化多边形或只有框时填充框
pub fn rasterize_region(detection: &Detection, width: u32, height: u32) -> GrayImage {
  match &detection.geometry {
    Geometry::Polygon { points, bbox } => {
      rasterize_polygon(points, width, height).unwrap_or_else(|_| rasterize_box(bbox, width, height))
    }
    Geometry::Box(bbox) => rasterize_box(bbox, width, height),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::SourceTag;

  fn boxed(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection {
      class_name: "B".to_string(),
      confidence: 0.9,
      geometry: Geometry::Box(BBox::new(x1, y1, x2, y2)),
      source_model: "main".to_string(),
      source: SourceTag::Parts,
    }
  }

  #[test]
  fn order_is_largest_first_with_stable_ties() {
    let regions = vec![
      boxed(0.0, 0.0, 10.0, 10.0),
      boxed(0.0, 0.0, 20.0, 20.0),
      boxed(5.0, 5.0, 15.0, 15.0),
      boxed(0.0, 0.0, 2.0, 2.0),
    ];
    assert_eq!(paint_order(&regions), vec![1, 0, 2, 3]);
  }

  #[test]
  fn polygon_area_uses_shoelace() {
    let square = [
      Point { x: 0.0, y: 0.0 },
      Point { x: 4.0, y: 0.0 },
      Point { x: 4.0, y: 4.0 },
      Point { x: 0.0, y: 4.0 },
    ];
    assert_eq!(polygon_area(&square), 16.0);
  }

  #[test]
  fn closed_polygon_rasterizes_without_duplicate_endpoint() {
    let triangle = [
      Point { x: 1.0, y: 1.0 },
      Point { x: 8.0, y: 1.0 },
      Point { x: 1.0, y: 8.0 },
      Point { x: 1.0, y: 1.0 },
    ];
    let mask = rasterize_polygon(&triangle, 10, 10).expect("三角形应可栅格化");
    assert_eq!(mask.get_pixel(2, 2)[0], 255);
    assert_eq!(mask.get_pixel(9, 9)[0], 0);
    assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
  }

  #[test]
  fn degenerate_polygon_is_rejected() {
    let line = [
      Point { x: 1.0, y: 1.0 },
      Point { x: 1.0, y: 1.0 },
      Point { x: 5.0, y: 5.0 },
    ];
    assert_eq!(
      rasterize_polygon(&line, 10, 10),
      Err(RegionError::DegeneratePolygon(2))
    );
    let nan = [
      Point { x: f32::NAN, y: 1.0 },
      Point { x: 2.0, y: 1.0 },
      Point { x: 5.0, y: 5.0 },
    ];
    assert_eq!(
      rasterize_polygon(&nan, 10, 10),
      Err(RegionError::NonFiniteCoordinate)
    );
  }

  #[test]
  fn far_out_coordinates_are_clamped() {
    assert_eq!(to_pixel(3.0e9, 10, 10), 40);
    assert_eq!(to_pixel(-3.0e9, 10, 10), -20);
    assert_eq!(to_pixel(7.9, 10, 10), 7);

    let triangle = [
      Point { x: 0.0, y: 0.0 },
      Point { x: 3.0e9, y: 0.0 },
      Point { x: 0.0, y: 3.0e9 },
    ];
    let mask = rasterize_polygon(&triangle, 10, 10).expect("远端顶点应被限制");
    assert_eq!(mask.get_pixel(2, 2)[0], 255);
    assert_eq!(mask.get_pixel(9, 9)[0], 255);

    let wide = rasterize_box(&BBox::new(-3.0e9, 2.0, 3.0e9, 4.0), 10, 10);
    assert_eq!(wide.get_pixel(0, 3)[0], 255);
    assert_eq!(wide.get_pixel(9, 3)[0], 255);
    assert_eq!(wide.get_pixel(5, 6)[0], 0);
  }

  #[test]
  fn box_rasterization_is_clipped_to_canvas() {
    let mask = rasterize_box(&BBox::new(-5.0, -5.0, 3.0, 3.0), 6, 6);
    assert_eq!(mask.get_pixel(0, 0)[0], 255);
    assert_eq!(mask.get_pixel(2, 2)[0], 255);
    assert_eq!(mask.get_pixel(3, 3)[0], 0);
  }
}
