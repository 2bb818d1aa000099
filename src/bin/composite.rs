// 该文件是 Chejian （车检） 项目的一部分。
// src/bin/composite.rs - 选择性重新合成已保存的区域掩码
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use chejian::{
  FromUrl,
  output::{
    ArtifactStore, StoreError,
    mask::{CompositeLayer, composite_image, composite_mask},
  },
};

/// 将选中的区域掩码重新叠加到原图或黑色背景上
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 产物根目录，例如 folder:///var/lib/chejian
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 分析时生成的请求编号
  #[arg(long, value_name = "ID")]
  pub request: String,
  /// 要显示的区域编号，未指定时使用全部区域
  #[arg(long, value_name = "ID", value_delimiter = ',')]
  pub regions: Vec<usize>,
  /// 使用二值掩码（红色高亮）代替彩色掩码
  #[arg(long)]
  pub binary: bool,
  /// 只合成掩码，不叠加原图
  #[arg(long)]
  pub mask_only: bool,
  /// 结果保存路径，默认保存在请求目录下
  #[arg(long, value_name = "FILE")]
  pub save: Option<PathBuf>,
}

fn skip_missing<T>(result: Result<T, StoreError>, region_id: usize) -> Result<Option<T>, StoreError> {
  match result {
    Ok(value) => Ok(Some(value)),
    Err(StoreError::NotFound(path)) => {
      warn!("区域 {} 的掩码不存在: {}", region_id, path.display());
      Ok(None)
    }
    Err(e) => Err(e),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let store = ArtifactStore::from_url(&args.output)?;

  let regions = if args.regions.is_empty() {
    store.region_ids(&args.request)?
  } else {
    args.regions.clone()
  };
  info!("请求 {}: 合成 {} 个区域", args.request, regions.len());

  let original = store.load_original(&args.request)?;
  let (image, default_name) = if args.mask_only {
    let mut layers = Vec::with_capacity(regions.len());
    for &id in &regions {
      if let Some(mask) = skip_missing(store.load_colored_mask(&args.request, id), id)? {
        layers.push(mask);
      }
    }
    (
      composite_mask(original.width(), original.height(), &layers),
      "composite_mask.png",
    )
  } else {
    let mut layers = Vec::with_capacity(regions.len());
    for &id in &regions {
      let layer = if args.binary {
        skip_missing(store.load_binary_mask(&args.request, id), id)?.map(CompositeLayer::Binary)
      } else {
        skip_missing(store.load_colored_mask(&args.request, id), id)?.map(CompositeLayer::Colored)
      };
      layers.extend(layer);
    }
    (composite_image(&original, &layers), "composite.jpg")
  };

  let path = match args.save {
    Some(path) => path,
    None => store.request_dir(&args.request)?.join(default_name),
  };
  image.save(&path)?;
  info!("合成结果已保存: {}", path.display());
  println!("{}", path.display());

  Ok(())
}
