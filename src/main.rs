// 该文件是 Chejian （车检） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use chejian::{
  FromUrl,
  config::PipelineConfig,
  input::open_input,
  model::ModelRegistry,
  output::{ArtifactStore, draw::Draw},
  task::AnalyzeTask,
};

#[cfg(feature = "roboflow")]
fn build_registry(config: &PipelineConfig) -> ModelRegistry {
  let config = config.clone();
  ModelRegistry::new(move || config.build_models())
}

#[cfg(not(feature = "roboflow"))]
fn build_registry(_config: &PipelineConfig) -> ModelRegistry {
  ModelRegistry::new(|| {
    Err(chejian::model::ModelError::InitFailed(
      "未启用 roboflow 特性，没有可用的远程模型".to_string(),
    ))
  })
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入来源: {:?}", args.input);
  info!("输出路径: {}", args.output);
  info!("分析模式: {}", args.mode);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::load(path)?,
    None => PipelineConfig::default(),
  };
  if args.no_masks {
    config.export_masks = false;
  }
  if let Some(font) = args.font {
    config.label.font = Some(font);
  }

  let store = ArtifactStore::from_url(&args.output)?;
  let draw = Draw::new(&config.label)?;

  // 后台预热模型，首个请求到达时等待同一初始化
  let registry = Arc::new(build_registry(&config));
  let warm_up = registry.warm_up();

  let task = AnalyzeTask::new(config, registry, store, draw);

  let mut failures = 0usize;
  for source in &args.input {
    let input = match open_input(source) {
      Ok(input) => input,
      Err(e) => {
        error!("无法读取输入 {}: {}", source, e);
        failures += 1;
        continue;
      }
    };

    match task.run(&input, args.mode).await {
      Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
      Err(e) => {
        error!("处理 {} 失败: {}", source, e);
        failures += 1;
      }
    }
  }

  warm_up.await?;

  if failures > 0 {
    anyhow::bail!("{} 个输入处理失败", failures);
  }
  info!("处理完成!");
  Ok(())
}
