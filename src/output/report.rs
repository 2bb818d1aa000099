// 该文件是 Chejian （车检） 项目的一部分。
// src/output/report.rs - 按来源分组的文本报表
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

use std::fmt::Write as _;

use serde::Serialize;

use crate::detection::{BBox, Detection, SourceTag};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
  pub id: usize,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BBox,
  pub source: SourceTag,
}

/// 单张图像的报表，分为 PARTS 与 DAMAGE 两节
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
  pub image_name: String,
  pub rows: Vec<ReportRow>,
}

impl Report {
  pub fn from_detections(image_name: &str, detections: &[Detection]) -> Self {
    let rows = detections
      .iter()
      .enumerate()
      .map(|(id, det)| ReportRow {
        id,
        class_name: det.class_name.clone(),
        confidence: det.confidence,
        bbox: det.bbox(),
        source: det.source,
      })
      .collect();
    Self {
      image_name: image_name.to_string(),
      rows,
    }
  }

  pub fn section(&self, source: SourceTag) -> impl Iterator<Item = &ReportRow> {
    self.rows.iter().filter(move |row| row.source == source)
  }

  pub fn to_text(&self) -> String {
    let mut text = String::new();
    for (title, source) in [("PARTS", SourceTag::Parts), ("DAMAGE", SourceTag::Damage)] {
      let _ = writeln!(text, "== {} - {} ==", self.image_name, title);
      let _ = writeln!(text, "id, class, confidence, x1, y1, x2, y2");
      let mut empty = true;
      for row in self.section(source) {
        empty = false;
        let _ = writeln!(
          text,
          "{}, {}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          row.id, row.class_name, row.confidence, row.bbox.x1, row.bbox.y1, row.bbox.x2, row.bbox.y2
        );
      }
      if empty {
        let _ = writeln!(text, "(none)");
      }
      text.push('\n');
    }
    text
  }
}
