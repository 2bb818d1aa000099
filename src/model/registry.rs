// 该文件是 Chejian （车检） 项目的一部分。
// src/model/registry.rs - 进程级模型句柄注册表
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

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::model::{ModelError, ModelSet};

type Builder = dyn Fn() -> Result<ModelSet, ModelError> + Send + Sync;

/// 模型句柄只初始化一次；初始化期间到达的请求等待同一把锁
pub struct ModelRegistry {
  builder: Box<Builder>,
  models: Mutex<Option<Arc<ModelSet>>>,
}

impl ModelRegistry {
  pub fn new<F>(builder: F) -> Self
  where
    F: Fn() -> Result<ModelSet, ModelError> + Send + Sync + 'static,
  {
    Self {
      builder: Box::new(builder),
      models: Mutex::new(None),
    }
  }

  /// 获取模型句柄，未初始化时就地初始化
  pub async fn get(&self) -> Result<Arc<ModelSet>, ModelError> {
    let mut guard = self.models.lock().await;
    if let Some(models) = guard.as_ref() {
      debug!("使用已初始化的模型句柄");
      return Ok(models.clone());
    }

    info!("初始化远程模型句柄...");
    let now = Instant::now();
    let models = Arc::new((self.builder)()?);
    info!(
      "模型初始化完成: {} 个模型, 耗时: {:.2?}",
      models.len(),
      now.elapsed()
    );
    *guard = Some(models.clone());
    Ok(models)
  }

  /// 在后台预热，不阻塞调用方
  pub fn warm_up(self: &Arc<Self>) -> JoinHandle<()> {
    let registry = self.clone();
    tokio::spawn(async move {
      if let Err(e) = registry.get().await {
        error!("模型预热失败: {}", e);
      }
    })
  }

  pub async fn is_initialized(&self) -> bool {
    self.models.lock().await.is_some()
  }

  /// 释放句柄，下次 `get` 时重新初始化
  pub async fn reset(&self) {
    let mut guard = self.models.lock().await;
    if guard.take().is_some() {
      info!("模型句柄已释放");
    }
  }
}
