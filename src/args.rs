// 该文件是 Chejian （车检） 项目的一部分。
// src/args.rs - 项目参数配置
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

use chejian::config::Mode;
use clap::Parser;
use url::Url;

/// Chejian 车身部件与损伤分析
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像，可重复指定
  /// 支持格式:
  /// - image:///path/to/car.jpg
  /// - /path/to/car.jpg
  #[arg(long, value_name = "SOURCE", required = true)]
  pub input: Vec<String>,

  /// 产物根目录，例如 folder:///var/lib/chejian
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 分析模式
  #[arg(long, value_enum, default_value_t = Mode::Full)]
  pub mode: Mode,

  /// JSON 配置文件，未指定时使用内置配置
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 标签字体文件（TTF）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 不导出单区域掩码
  #[arg(long)]
  pub no_masks: bool,
}
