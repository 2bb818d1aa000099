// 该文件是 Chejian （车检） 项目的一部分。
// src/output/draw.rs - 检测区域可视化
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

use image::{GrayImage, Rgb, RgbImage};
use tracing::debug;

use crate::config::LabelConfig;
use crate::detection::Detection;
use crate::output::RenderContext;
use crate::output::label::{FontError, LabelFont, Placement, place_labels};
use crate::region::{paint_order, rasterize_region};

/// 将掩码覆盖的像素填为指定颜色
fn fill_mask(canvas: &mut RgbImage, mask: &GrayImage, color: Rgb<u8>) {
  for (pixel, m) in canvas.pixels_mut().zip(mask.pixels()) {
    if m[0] != 0 {
      *pixel = color;
    }
  }
}

/// 等权混合（各 0.5）
fn blend_half(scratch: &mut RgbImage, base: &RgbImage) {
  for (s, b) in scratch.pixels_mut().zip(base.pixels()) {
    for c in 0..3 {
      s[c] = ((s[c] as u16 + b[c] as u16 + 1) / 2) as u8;
    }
  }
}

fn paint_regions(canvas: &mut RgbImage, regions: &[Detection], order: &[usize], ctx: &mut RenderContext) {
  let (width, height) = canvas.dimensions();
  for &index in order {
    let region = &regions[index];
    let color = ctx.colors.color_for(&region.class_name, index);
    let mask = rasterize_region(region, width, height);
    fill_mask(canvas, &mask, color);
  }
}

/// 按面积从大到小在副本上填充区域，再与原图等权混合
pub fn render_regions(base: &RgbImage, regions: &[Detection], order: &[usize], ctx: &mut RenderContext) -> RgbImage {
  let mut scratch = base.clone();
  paint_regions(&mut scratch, regions, order, ctx);
  blend_half(&mut scratch, base);
  scratch
}

/// 黑色背景上的纯掩码图
pub fn render_mask_image(
  width: u32,
  height: u32,
  regions: &[Detection],
  order: &[usize],
  ctx: &mut RenderContext,
) -> RgbImage {
  let mut canvas = RgbImage::new(width, height);
  paint_regions(&mut canvas, regions, order, ctx);
  canvas
}

/// 一次渲染的全部图像结果
pub struct Rendered {
  pub overlay: RgbImage,
  pub mask: RgbImage,
  /// 与区域下标对应
  pub placements: Vec<Option<Placement>>,
  pub order: Vec<usize>,
}

pub struct Draw {
  font: LabelFont,
}

impl Draw {
  pub fn new(config: &LabelConfig) -> Result<Self, FontError> {
    Ok(Self {
      font: LabelFont::load(config)?,
    })
  }

  pub fn with_font(font: LabelFont) -> Self {
    Self { font }
  }

  /// 叠加图：区域着色、混合，再放置标签
  pub fn render(&self, base: &RgbImage, regions: &[Detection], ctx: &mut RenderContext) -> Rendered {
    let order = paint_order(regions);
    debug!("渲染 {} 个区域", regions.len());

    let mut overlay = render_regions(base, regions, &order, ctx);
    let placements = place_labels(&mut overlay, regions, &order, ctx, &self.font);
    let mask = render_mask_image(base.width(), base.height(), regions, &order, ctx);

    Rendered {
      overlay,
      mask,
      placements,
      order,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::color::RESERVED_COLOR;
  use crate::detection::{BBox, Geometry, SourceTag};

  fn boxed(class: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection {
      class_name: class.to_string(),
      confidence: 0.9,
      geometry: Geometry::Box(BBox::new(x1, y1, x2, y2)),
      source_model: "main".to_string(),
      source: SourceTag::Parts,
    }
  }

  #[test]
  fn smaller_region_paints_over_larger() {
    let regions = vec![boxed("HOOD", 2.0, 2.0, 4.0, 4.0), boxed("TIRE", 0.0, 0.0, 8.0, 8.0)];
    let order = paint_order(&regions);
    let mut ctx = RenderContext::new("TIRE");
    let mask = render_mask_image(10, 10, &regions, &order, &mut ctx);

    let hood = ctx.colors.get("HOOD").unwrap();
    assert_eq!(mask.get_pixel(3, 3), &hood);
    assert_eq!(mask.get_pixel(6, 6), &RESERVED_COLOR);
    assert_eq!(mask.get_pixel(9, 9), &Rgb([0, 0, 0]));
  }

  #[test]
  fn overlay_is_equal_blend() {
    let base = RgbImage::from_pixel(6, 6, Rgb([100, 50, 0]));
    let regions = vec![boxed("TIRE", 0.0, 0.0, 3.0, 3.0)];
    let order = paint_order(&regions);
    let mut ctx = RenderContext::new("TIRE");
    let overlay = render_regions(&base, &regions, &order, &mut ctx);

    assert_eq!(overlay.get_pixel(1, 1), &Rgb([178, 25, 0]));
    assert_eq!(overlay.get_pixel(5, 5), &Rgb([100, 50, 0]));
  }

  #[test]
  fn empty_detection_set_leaves_image_untouched() {
    let base = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
    let draw = Draw::with_font(LabelFont::embedded(16.0).unwrap());
    let mut ctx = RenderContext::default();
    let rendered = draw.render(&base, &[], &mut ctx);
    assert_eq!(rendered.overlay, base);
    assert!(rendered.placements.is_empty());
    assert!(ctx.colors.is_empty());
  }

  #[test]
  fn far_out_region_renders_without_panic() {
    let base = RgbImage::from_pixel(64, 48, Rgb([9, 9, 9]));
    let regions = vec![boxed("HOOD", 3.0e9, 10.0, 3.0e9 + 5.0, 20.0)];
    let draw = Draw::with_font(LabelFont::embedded(16.0).unwrap());
    let mut ctx = RenderContext::new("TIRE");

    let rendered = draw.render(&base, &regions, &mut ctx);
    let rect = rendered.placements[0].unwrap().rect;
    assert!(rect.x1 >= 0 && rect.x2 <= 64);
    // 区域完全在画布外，掩码图保持全黑
    assert!(rendered.mask.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }
}
