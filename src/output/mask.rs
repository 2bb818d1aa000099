// 该文件是 Chejian （车检） 项目的一部分。
// src/output/mask.rs - 单区域掩码导出与选择性合成
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

use image::{GrayImage, Rgb, RgbImage, Rgba, RgbaImage};
use tracing::{info, warn};

use crate::color::ColorTable;
use crate::detection::{BBox, Detection, Geometry};
use crate::region::{MIN_POLYGON_POINTS, rasterize_polygon};

/// 合成时彩色掩码的叠加权重
pub const COLORED_WEIGHT: f32 = 0.7;
/// 合成时二值掩码高亮的混合权重
pub const BINARY_WEIGHT: f32 = 0.3;
/// 纯掩码合成时的叠加权重
pub const MASK_WEIGHT: f32 = 0.8;

const HIGHLIGHT: Rgb<u8> = Rgb([255, 0, 0]);

/// 一个区域的独立掩码
#[derive(Debug, Clone)]
pub struct MaskArtifact {
  /// 区域在融合结果中的下标
  pub region_id: usize,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BBox,
  pub color: Rgb<u8>,
  pub binary: GrayImage,
  pub colored: RgbImage,
  pub transparent: RgbaImage,
}

#[derive(Debug, Default)]
pub struct MaskBatch {
  pub artifacts: Vec<MaskArtifact>,
  /// 顶点不足或坐标无效而跳过的区域数
  pub skipped: usize,
}

/// 为每个多边形区域生成二值、彩色与透明掩码
///
/// 顶点少于 3 的区域（含只有框的区域）不生成掩码；单个区域失败只记录日志。
pub fn build_region_masks(
  regions: &[Detection],
  order: &[usize],
  width: u32,
  height: u32,
  colors: &ColorTable,
) -> MaskBatch {
  let mut batch = MaskBatch::default();

  for &index in order {
    let region = &regions[index];
    let points = match &region.geometry {
      Geometry::Polygon { points, .. } if points.len() >= MIN_POLYGON_POINTS => points,
      _ => {
        batch.skipped += 1;
        continue;
      }
    };

    let binary = match rasterize_polygon(points, width, height) {
      Ok(binary) => binary,
      Err(e) => {
        warn!("区域 {} ({}) 掩码生成失败，已跳过: {}", index, region.class_name, e);
        batch.skipped += 1;
        continue;
      }
    };

    let color = colors.color_or_fallback(&region.class_name);
    let colored = colorize(&binary, color);
    let transparent = with_alpha(&colored, &binary);

    batch.artifacts.push(MaskArtifact {
      region_id: index,
      class_name: region.class_name.clone(),
      confidence: region.confidence,
      bbox: region.bbox(),
      color,
      binary,
      colored,
      transparent,
    });
  }

  info!(
    "生成 {} 个区域掩码，跳过 {} 个",
    batch.artifacts.len(),
    batch.skipped
  );
  batch
}

fn colorize(binary: &GrayImage, color: Rgb<u8>) -> RgbImage {
  RgbImage::from_fn(binary.width(), binary.height(), |x, y| {
    if binary.get_pixel(x, y)[0] != 0 {
      color
    } else {
      Rgb([0, 0, 0])
    }
  })
}

/// 透明通道直接取二值掩码
fn with_alpha(colored: &RgbImage, binary: &GrayImage) -> RgbaImage {
  RgbaImage::from_fn(colored.width(), colored.height(), |x, y| {
    let Rgb([r, g, b]) = *colored.get_pixel(x, y);
    Rgba([r, g, b, binary.get_pixel(x, y)[0]])
  })
}

fn saturate(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

/// 选择性合成使用的图层
pub enum CompositeLayer {
  Colored(RgbImage),
  Binary(GrayImage),
}

impl CompositeLayer {
  fn dimensions(&self) -> (u32, u32) {
    match self {
      CompositeLayer::Colored(image) => image.dimensions(),
      CompositeLayer::Binary(image) => image.dimensions(),
    }
  }
}

/// 在原图上叠加选中的区域掩码
///
/// 彩色掩码按 0.7 权重叠加；二值掩码将覆盖像素标红后与当前结果按 0.7/0.3 混合。
/// 尺寸与原图不一致的图层被跳过。
pub fn composite_image(original: &RgbImage, layers: &[CompositeLayer]) -> RgbImage {
  let mut composite = original.clone();

  for layer in layers {
    if layer.dimensions() != composite.dimensions() {
      warn!(
        "掩码尺寸 {:?} 与原图 {:?} 不一致，已跳过",
        layer.dimensions(),
        composite.dimensions()
      );
      continue;
    }

    match layer {
      CompositeLayer::Colored(mask) => {
        for (pixel, m) in composite.pixels_mut().zip(mask.pixels()) {
          for c in 0..3 {
            pixel[c] = saturate(pixel[c] as f32 + COLORED_WEIGHT * m[c] as f32);
          }
        }
      }
      CompositeLayer::Binary(mask) => {
        for (pixel, m) in composite.pixels_mut().zip(mask.pixels()) {
          if m[0] > 128 {
            for c in 0..3 {
              let blended =
                (1.0 - BINARY_WEIGHT) * pixel[c] as f32 + BINARY_WEIGHT * HIGHLIGHT[c] as f32;
              pixel[c] = saturate(blended);
            }
          }
        }
      }
    }
  }

  composite
}

/// 黑色背景上累加选中的彩色掩码
pub fn composite_mask(width: u32, height: u32, layers: &[RgbImage]) -> RgbImage {
  let mut composite = RgbImage::new(width, height);

  for layer in layers {
    if layer.dimensions() != (width, height) {
      warn!("掩码尺寸 {:?} 不一致，已跳过", layer.dimensions());
      continue;
    }
    for (pixel, m) in composite.pixels_mut().zip(layer.pixels()) {
      for c in 0..3 {
        pixel[c] = saturate(pixel[c] as f32 + MASK_WEIGHT * m[c] as f32);
      }
    }
  }

  composite
}
