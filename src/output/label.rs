// 该文件是 Chejian （车检） 项目的一部分。
// src/output/label.rs - 互不重叠的标签放置
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LabelConfig;
use crate::detection::Detection;
use crate::output::RenderContext;
use crate::region::to_pixel;

/// 标签相对锚点上移的距离
pub const LABEL_RISE: i32 = 25;
/// 标签背景比文字宽出的像素
pub const LABEL_PADDING: i32 = 10;
/// 重叠判定的外扩边距
pub const LABEL_MARGIN: i32 = 5;
/// 文字相对背景左上角的缩进
pub const TEXT_INSET: i32 = 5;

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum FontError {
  #[error("内置字体解析失败: {0}")]
  Embedded(#[from] ab_glyph::InvalidFont),
}

/// 图像像素坐标下的标签矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LabelBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl LabelBox {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn expand(&self, margin: i32) -> Self {
    Self {
      x1: self.x1 - margin,
      y1: self.y1 - margin,
      x2: self.x2 + margin,
      y2: self.y2 + margin,
    }
  }

  /// 分离轴判定：完全在左、右、上、下任一侧即不相交
  pub fn intersects(&self, other: &LabelBox) -> bool {
    !(self.x2 <= other.x1 || self.x1 >= other.x2 || self.y2 <= other.y1 || self.y1 >= other.y2)
  }

  pub fn translate(&self, dx: i32, dy: i32) -> Self {
    Self {
      x1: self.x1 + dx,
      y1: self.y1 + dy,
      x2: self.x2 + dx,
      y2: self.y2 + dy,
    }
  }
}

/// 候选矩形外扩边距后与已占区域不相交即可接受
pub fn overlaps_any(candidate: &LabelBox, occupied: &[LabelBox]) -> bool {
  let grown = candidate.expand(LABEL_MARGIN);
  occupied.iter().any(|placed| grown.intersects(placed))
}

/// 以锚点 (x1, y1) 生成标签矩形并平移回图像内部（不缩小）
pub fn bounds_adjust(x1: i32, y1: i32, text_width: i32, text_height: i32, width: i32, height: i32) -> LabelBox {
  let mut x1 = x1;
  let mut x2 = x1.saturating_add(text_width).saturating_add(LABEL_PADDING);
  let mut y2 = y1;
  let mut y1 = y1.saturating_sub(LABEL_RISE);

  if x1 < 0 {
    x1 = 0;
    x2 = text_width + LABEL_PADDING;
  }
  if x2 > width {
    x1 = width - text_width - LABEL_PADDING;
    x2 = width;
  }
  if y1 < 0 {
    y1 = LABEL_RISE;
    y2 = y1 + text_height;
  }
  if y2 > height {
    y1 = height - text_height;
    y2 = height;
  }

  LabelBox { x1, y1, x2, y2 }
}

/// 标签最终采用的位置来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Strategy {
  /// 锚点正上方
  Base,
  Vertical { dy: i32 },
  Horizontal { dx: i32 },
  Diagonal { dx: i32, dy: i32 },
  /// 全部候选均重叠，退回基础位置
  Fallback,
}

impl Strategy {
  fn offset(&self) -> (i32, i32) {
    match *self {
      Strategy::Vertical { dy } => (0, dy),
      Strategy::Horizontal { dx } => (dx, 0),
      Strategy::Diagonal { dx, dy } => (dx, dy),
      Strategy::Base | Strategy::Fallback => (0, 0),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
  pub rect: LabelBox,
  pub strategy: Strategy,
}

impl Placement {
  pub fn is_fallback(&self) -> bool {
    self.strategy == Strategy::Fallback
  }
}

/// 固定顺序的 18 个候选偏移：6 个竖直、4 个水平、8 个斜向
pub fn candidate_offsets(text_width: i32) -> [Strategy; 18] {
  let half = text_width / 2 + 10;
  let wide = text_width + 20;
  [
    Strategy::Vertical { dy: 30 },
    Strategy::Vertical { dy: 60 },
    Strategy::Vertical { dy: 90 },
    Strategy::Vertical { dy: -30 },
    Strategy::Vertical { dy: -60 },
    Strategy::Vertical { dy: -90 },
    Strategy::Horizontal { dx: text_width + 15 },
    Strategy::Horizontal { dx: -(text_width + 15) },
    Strategy::Horizontal { dx: text_width + 45 },
    Strategy::Horizontal { dx: -(text_width + 45) },
    Strategy::Diagonal { dx: half, dy: -40 },
    Strategy::Diagonal { dx: half, dy: 40 },
    Strategy::Diagonal { dx: -half, dy: -40 },
    Strategy::Diagonal { dx: -half, dy: 40 },
    Strategy::Diagonal { dx: wide, dy: -20 },
    Strategy::Diagonal { dx: -wide, dy: -20 },
    Strategy::Diagonal { dx: wide, dy: 20 },
    Strategy::Diagonal { dx: -wide, dy: 20 },
  ]
}

/// 在已占区域之间为一个标签寻找位置
///
/// 先试基础位置；重叠时按固定顺序尝试候选偏移（作用于未平移的锚点，
/// 再做边界调整）；全部失败则接受基础位置的重叠。
pub fn find_label_position(
  anchor: (i32, i32),
  text_size: (i32, i32),
  occupied: &[LabelBox],
  image_size: (i32, i32),
) -> Placement {
  let (x1, y1) = anchor;
  let (tw, th) = text_size;
  let (width, height) = image_size;

  let base = bounds_adjust(x1, y1, tw, th, width, height);
  if !overlaps_any(&base, occupied) {
    return Placement {
      rect: base,
      strategy: Strategy::Base,
    };
  }

  for strategy in candidate_offsets(tw) {
    let (dx, dy) = strategy.offset();
    let rect = bounds_adjust(x1.saturating_add(dx), y1.saturating_add(dy), tw, th, width, height);
    if !overlaps_any(&rect, occupied) {
      return Placement { rect, strategy };
    }
  }

  Placement {
    rect: base,
    strategy: Strategy::Fallback,
  }
}

/// 标签字体：优先使用配置的 TTF，否则使用内置字体
pub struct LabelFont {
  font: FontArc,
  scale: PxScale,
}

impl LabelFont {
  pub fn load(config: &LabelConfig) -> Result<Self, FontError> {
    if let Some(path) = &config.font {
      match Self::read_font(path) {
        Some(font) => {
          info!("使用标签字体: {}", path.display());
          return Ok(Self {
            font,
            scale: PxScale::from(config.font_size),
          });
        }
        None => warn!("字体 {} 不可用，改用内置字体", path.display()),
      }
    }
    Self::embedded(config.font_size)
  }

  pub fn embedded(font_size: f32) -> Result<Self, FontError> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    Ok(Self {
      font: FontArc::try_from_slice(font_data)?,
      scale: PxScale::from(font_size),
    })
  }

  fn read_font(path: &Path) -> Option<FontArc> {
    let data = std::fs::read(path)
      .map_err(|e| debug!("读取字体 {} 失败: {}", path.display(), e))
      .ok()?;
    FontArc::try_from_vec(data)
      .map_err(|e| debug!("解析字体 {} 失败: {}", path.display(), e))
      .ok()
  }

  /// 文字宽高（像素）
  pub fn measure(&self, text: &str) -> (i32, i32) {
    let (w, h) = text_size(self.scale, &self.font, text);
    (w as i32, h as i32)
  }

  fn draw(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
    draw_text_mut(image, TEXT_COLOR, x, y, self.scale, &self.font, text);
  }
}

/// 按绘制顺序放置并绘制全部标签，返回与 `regions` 下标对应的放置结果
pub fn place_labels(
  image: &mut RgbImage,
  regions: &[Detection],
  order: &[usize],
  ctx: &mut RenderContext,
  font: &LabelFont,
) -> Vec<Option<Placement>> {
  let image_size = (image.width() as i32, image.height() as i32);
  let mut placements = vec![None; regions.len()];

  for &index in order {
    let region = &regions[index];
    let bbox = region.bbox();
    let label = region.class_name.as_str();
    let color = ctx.colors.color_or_fallback(label);

    let text = font.measure(label);
    let anchor = (
      to_pixel(bbox.x1, image.width(), image.height()),
      to_pixel(bbox.y1, image.width(), image.height()),
    );
    let placement = find_label_position(
      anchor,
      text,
      &ctx.occupied,
      image_size,
    );
    if placement.is_fallback() {
      warn!("标签 '{}' (区域 {}) 找不到空闲位置，接受重叠", label, index);
    } else {
      debug!("标签 '{}' (区域 {}) 位置: {:?}", label, index, placement.strategy);
    }

    ctx.occupied.push(placement.rect);
    draw_label(image, &placement.rect, color, label, font);
    placements[index] = Some(placement);
  }

  placements
}

fn draw_label(image: &mut RgbImage, rect: &LabelBox, color: Rgb<u8>, text: &str, font: &LabelFont) {
  // 含两端像素
  let width = rect.x2 - rect.x1 + 1;
  let height = rect.y2 - rect.y1 + 1;
  if width > 0 && height > 0 {
    let background = Rect::at(rect.x1, rect.y1).of_size(width as u32, height as u32);
    draw_filled_rect_mut(image, background, color);
  }
  font.draw(image, rect.x1 + TEXT_INSET, rect.y1 + TEXT_INSET, text);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::{BBox, Geometry, SourceTag};
  use crate::region::paint_order;

  const IMAGE: (i32, i32) = (640, 480);

  #[test]
  fn second_label_at_same_anchor_moves_down_thirty() {
    let mut occupied = Vec::new();
    let first = find_label_position((100, 100), (40, 12), &occupied, IMAGE);
    assert_eq!(first.strategy, Strategy::Base);
    assert_eq!(first.rect, LabelBox::new(100, 75, 150, 100));
    occupied.push(first.rect);

    let second = find_label_position((100, 100), (40, 12), &occupied, IMAGE);
    assert_eq!(second.strategy, Strategy::Vertical { dy: 30 });
    assert_eq!(second.rect, first.rect.translate(0, 30));
  }

  #[test]
  fn rectangle_is_shifted_not_shrunk_at_edges() {
    let left = bounds_adjust(-20, 100, 40, 12, 640, 480);
    assert_eq!(left, LabelBox::new(0, 75, 50, 100));

    let right = bounds_adjust(620, 100, 40, 12, 640, 480);
    assert_eq!(right, LabelBox::new(590, 75, 640, 100));

    let top = bounds_adjust(10, 10, 40, 12, 640, 480);
    assert_eq!(top, LabelBox::new(10, 25, 60, 37));

    let bottom = bounds_adjust(10, 500, 40, 12, 640, 480);
    assert_eq!(bottom, LabelBox::new(10, 468, 60, 480));
  }

  #[test]
  fn candidate_order_is_fixed() {
    let candidates = candidate_offsets(40);
    assert_eq!(candidates.len(), 18);
    assert_eq!(candidates[0], Strategy::Vertical { dy: 30 });
    assert_eq!(candidates[6], Strategy::Horizontal { dx: 55 });
    assert_eq!(candidates[9], Strategy::Horizontal { dx: -85 });
    assert_eq!(candidates[10], Strategy::Diagonal { dx: 30, dy: -40 });
    assert_eq!(candidates[17], Strategy::Diagonal { dx: -60, dy: 20 });
  }

  #[test]
  fn crowded_image_falls_back_to_base() {
    // 整幅图已被占满
    let occupied = vec![LabelBox::new(0, 0, 200, 200)];
    let placement = find_label_position((50, 50), (40, 12), &occupied, (200, 200));
    assert!(placement.is_fallback());
    assert_eq!(placement.rect, bounds_adjust(50, 50, 40, 12, 200, 200));
  }

  #[test]
  fn placements_do_not_overlap_unless_fallback() {
    let mut occupied: Vec<LabelBox> = Vec::new();
    let mut placements = Vec::new();
    for i in 0..12 {
      let anchor = (100 + (i % 3) * 10, 120 + (i / 3) * 8);
      let placement = find_label_position(anchor, (60, 12), &occupied, IMAGE);
      occupied.push(placement.rect);
      placements.push(placement);
    }

    for (i, a) in placements.iter().enumerate() {
      for b in placements.iter().skip(i + 1) {
        let separated = !a.rect.expand(LABEL_MARGIN).intersects(&b.rect);
        let later_fallback = b.is_fallback();
        assert!(separated || later_fallback, "{:?} vs {:?}", a, b);
      }
    }
  }

  #[test]
  fn placement_is_deterministic() {
    let run = || {
      let mut occupied = Vec::new();
      (0..6)
        .map(|i| {
          let p = find_label_position((300, 200 + i), (50, 12), &occupied, IMAGE);
          occupied.push(p.rect);
          p
        })
        .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
  }

  fn region(class: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection {
      class_name: class.to_string(),
      confidence: 0.8,
      geometry: Geometry::Box(BBox::new(x1, y1, x2, y2)),
      source_model: "main".to_string(),
      source: SourceTag::Parts,
    }
  }

  #[test]
  fn labels_are_drawn_largest_region_first() {
    let regions = vec![
      region("HOOD", 100.0, 100.0, 150.0, 150.0),
      region("BUMPER", 100.0, 100.0, 300.0, 300.0),
    ];
    let order = paint_order(&regions);
    let mut ctx = RenderContext::new("TIRE");
    ctx.assign_colors(&regions, &order);
    let mut image = RgbImage::new(640, 480);
    let font = LabelFont::embedded(16.0).unwrap();

    let placements = place_labels(&mut image, &regions, &order, &mut ctx, &font);
    let bumper = placements[1].unwrap();
    let hood = placements[0].unwrap();
    assert_eq!(bumper.strategy, Strategy::Base);
    assert_ne!(hood.strategy, Strategy::Base);
    assert_eq!(ctx.occupied, vec![bumper.rect, hood.rect]);

    let color = ctx.colors.get("BUMPER").unwrap();
    assert_eq!(image.get_pixel(bumper.rect.x1 as u32 + 1, bumper.rect.y1 as u32 + 1), &color);
  }

  #[test]
  fn class_name_is_drawn_in_white() {
    let regions = vec![region("HOOD", 10.0, 60.0, 60.0, 100.0)];
    let order = paint_order(&regions);
    let mut ctx = RenderContext::new("TIRE");
    ctx.assign_colors(&regions, &order);
    let mut image = RgbImage::new(200, 150);
    let font = LabelFont::embedded(16.0).unwrap();

    let placement = place_labels(&mut image, &regions, &order, &mut ctx, &font)[0].unwrap();
    let rect = placement.rect;
    let background = ctx.colors.get("HOOD").unwrap();
    assert_eq!(image.get_pixel(rect.x1 as u32, rect.y1 as u32), &background);

    // 文字像素向白色混合，每个通道都不低于背景
    let text_pixels = (rect.x1..rect.x2)
      .flat_map(|x| (rect.y1..rect.y2).map(move |y| (x as u32, y as u32)))
      .map(|(x, y)| image.get_pixel(x, y))
      .filter(|p| *p != &background)
      .collect::<Vec<_>>();
    assert!(!text_pixels.is_empty(), "标签内没有文字像素: {:?}", rect);
    assert!(text_pixels.iter().all(|p| (0..3).all(|c| p[c] >= background[c])));
  }

  #[test]
  fn far_out_anchor_stays_inside_image() {
    let regions = vec![region("B", 3.0e9, 10.0, 3.0e9 + 5.0, 20.0)];
    let order = paint_order(&regions);
    let mut ctx = RenderContext::new("TIRE");
    let mut image = RgbImage::new(64, 48);
    let font = LabelFont::embedded(16.0).unwrap();

    let placement = place_labels(&mut image, &regions, &order, &mut ctx, &font)[0].unwrap();
    assert_eq!(placement.strategy, Strategy::Base);
    assert_eq!(placement.rect.x2, 64);
    assert!(placement.rect.x1 >= 0);
    assert_eq!(placement.rect.y1, LABEL_RISE);

    let extreme = bounds_adjust(i32::MAX, i32::MIN, 40, 12, 640, 480);
    assert_eq!(extreme, LabelBox::new(590, 25, 640, 37));
  }
}
