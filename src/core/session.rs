//! 比较会话 - 保证同一时间只有一个比较任务在运行

use crate::core::engine::{CompareJob, CompareRequest, ComparisonResult, JobConfig};
use crate::core::events::EventStream;
use crate::error::{CompareError, Result};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct ActiveJob {
    run_id: Uuid,
    cancel: CancellationToken,
}

/// 已启动的比较任务
pub struct RunningJob {
    pub run_id: Uuid,
    pub events: EventStream,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<ComparisonResult>>,
}

/// 比较会话
#[derive(Debug, Clone, Default)]
pub struct CompareSession {
    active: Arc<Mutex<Option<ActiveJob>>>,
}

impl CompareSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动新任务，已有任务在运行时返回 `Busy`
    ///
    /// 必须在 tokio runtime 中调用。
    pub fn start(&self, request: CompareRequest, config: JobConfig) -> Result<RunningJob> {
        let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(CompareError::Busy);
        }

        let (job, events) = CompareJob::new(request, config);
        let run_id = job.run_id();
        let cancel = job.cancel_token();
        *slot = Some(ActiveJob {
            run_id,
            cancel: cancel.clone(),
        });
        drop(slot);

        let active = self.active.clone();
        let handle = tokio::spawn(async move {
            // 任务结束（包括 panic）时释放占用
            scopeguard::defer! {
                release(&active, run_id);
            }
            job.run().await
        });

        Ok(RunningJob {
            run_id,
            events,
            cancel,
            handle,
        })
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }

    /// 取消当前任务，没有任务在运行时返回 false
    pub fn cancel_current(&self) -> bool {
        let slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(active) => {
                debug!("请求取消比较任务: {}", active.run_id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

fn release(active: &Mutex<Option<ActiveJob>>, run_id: Uuid) {
    let mut slot = active.lock().unwrap_or_else(|e| e.into_inner());
    if slot.as_ref().map(|a| a.run_id) == Some(run_id) {
        *slot = None;
        debug!("比较任务结束: {}", run_id);
    }
}
