// 该文件是 Chejian （车检） 项目的一部分。
// src/color.rs - 类别颜色分配
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

use std::collections::HashMap;

use image::Rgb;
use tracing::debug;

/// 保留类别（轮胎）的固定颜色：纯红
pub const RESERVED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 默认保留类别名称
pub const DEFAULT_RESERVED_LABEL: &str = "TIRE";

/// 固定调色板，按索引循环取色
pub const PALETTE: [Rgb<u8>; 21] = [
  Rgb([0xA3, 0x51, 0xFB]),
  Rgb([0xFF, 0x40, 0x40]),
  Rgb([0xFF, 0xA1, 0xA0]),
  Rgb([0xFF, 0x76, 0x33]),
  Rgb([0xFF, 0xB6, 0x33]),
  Rgb([0xD1, 0xD4, 0x35]),
  Rgb([0x4C, 0xFB, 0x12]),
  Rgb([0x94, 0xCF, 0x1A]),
  Rgb([0x40, 0xDE, 0x8A]),
  Rgb([0x1B, 0x96, 0x40]),
  Rgb([0x00, 0xD6, 0xC1]),
  Rgb([0x2E, 0x9C, 0xAA]),
  Rgb([0x00, 0xC4, 0xFF]),
  Rgb([0x36, 0x47, 0x97]),
  Rgb([0x66, 0x75, 0xFF]),
  Rgb([0x00, 0x19, 0xEF]),
  Rgb([0x86, 0x3A, 0xFF]),
  Rgb([0x53, 0x00, 0x87]),
  Rgb([0xCD, 0x3A, 0xFF]),
  Rgb([0xFF, 0x97, 0xFF]),
  Rgb([0xFF, 0x39, 0xC9]),
];

/// 类别到颜色的映射表，首次分配即固定
#[derive(Debug, Clone)]
pub struct ColorTable {
  colors: HashMap<String, Rgb<u8>>,
  reserved_label: String,
}

impl Default for ColorTable {
  fn default() -> Self {
    Self::new(DEFAULT_RESERVED_LABEL)
  }
}

impl ColorTable {
  pub fn new(reserved_label: &str) -> Self {
    Self {
      colors: HashMap::new(),
      reserved_label: reserved_label.to_string(),
    }
  }

  /// 获取类别颜色；未分配时按 `occurrence_index` 从调色板取色并记录
  pub fn color_for(&mut self, label: &str, occurrence_index: usize) -> Rgb<u8> {
    if let Some(color) = self.colors.get(label) {
      return *color;
    }

    let color = if label == self.reserved_label {
      debug!("为保留类别 {} 分配固定颜色", label);
      RESERVED_COLOR
    } else {
      let color = PALETTE[occurrence_index % PALETTE.len()];
      debug!("为类别 {} 分配调色板颜色 #{}", label, occurrence_index);
      color
    };

    self.colors.insert(label.to_string(), color);
    color
  }

  /// 仅查询，不分配
  pub fn get(&self, label: &str) -> Option<Rgb<u8>> {
    self.colors.get(label).copied()
  }

  /// 查询颜色，未分配时返回基于名称哈希的颜色（不写入表）
  pub fn color_or_fallback(&self, label: &str) -> Rgb<u8> {
    self.get(label).unwrap_or_else(|| fallback_color(label))
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}

/// 32 位 FNV-1a，跨进程稳定
pub fn stable_hash(text: &str) -> u32 {
  const OFFSET_BASIS: u32 = 0x811C_9DC5;
  const PRIME: u32 = 0x0100_0193;

  text.bytes().fold(OFFSET_BASIS, |hash, byte| {
    (hash ^ byte as u32).wrapping_mul(PRIME)
  })
}

/// 未登记类别的后备颜色：色相取哈希模 360，饱和度 0.7，亮度 0.8
pub fn fallback_color(label: &str) -> Rgb<u8> {
  let hue = (stable_hash(label) % 360) as f32;
  hsv_to_rgb(hue, 0.7, 0.8)
}

/// HSV 转 RGB
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// `#rrggbb` 格式
pub fn to_hex(color: Rgb<u8>) -> String {
  format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn assignment_is_idempotent() {
    let mut table = ColorTable::default();
    let first = table.color_for("HOOD", 3);
    let second = table.color_for("HOOD", 11);
    assert_eq!(first, second);
    assert_eq!(first, PALETTE[3]);
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn reserved_label_is_always_red() {
    for index in [0, 1, 7, 20, 500] {
      let mut table = ColorTable::default();
      assert_eq!(table.color_for("TIRE", index), RESERVED_COLOR);
    }
  }

  #[test]
  fn reserved_label_does_not_shift_palette() {
    let mut table = ColorTable::default();
    table.color_for("TIRE", 0);
    assert_eq!(table.color_for("ROOF", 1), PALETTE[1]);
  }

  #[test]
  fn palette_index_wraps() {
    let mut table = ColorTable::default();
    assert_eq!(table.color_for("BUMPER", PALETTE.len() + 2), PALETTE[2]);
  }

  #[test]
  fn fallback_color_is_stable_and_not_stored() {
    let table = ColorTable::default();
    let a = table.color_or_fallback("DENT");
    let b = table.color_or_fallback("DENT");
    assert_eq!(a, b);
    assert_eq!(a, fallback_color("DENT"));
    assert!(table.is_empty());
  }

  #[test]
  fn fnv_matches_reference_values() {
    assert_eq!(stable_hash(""), 0x811C_9DC5);
    assert_eq!(stable_hash("a"), 0xE40C_292C);
  }

  #[test]
  fn hex_formatting() {
    assert_eq!(to_hex(Rgb([255, 0, 16])), "#ff0010");
  }
}
