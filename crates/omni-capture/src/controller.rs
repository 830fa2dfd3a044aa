//! # Batch Controller
//!
//! 同一时刻最多只有一个批量遍历。新的 `start` 会先取消旧的遍历，
//! 等它写入最终状态后再启动，进度通过广播通道分发给所有订阅者。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use omni_config::BatchConfig;
use omni_core::{detect_platform, BatchProgress, CheckpointRecord, Platform};
use omni_session::{CheckpointStore, SessionStore};

use crate::batch::{BatchTraversal, TraversalControl};
use crate::driver::PageDriver;
use crate::protocol::{BatchNotification, ControlRequest, ControlResponse};

const NOTIFICATION_CAPACITY: usize = 64;

struct ActiveRun {
    control: TraversalControl,
    handle: JoinHandle<BatchProgress>,
}

/// 批量遍历控制器
pub struct BatchController {
    driver: Arc<dyn PageDriver>,
    sessions: Arc<dyn SessionStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: BatchConfig,
    notifications: broadcast::Sender<BatchNotification>,
    active: Mutex<Option<ActiveRun>>,
    starting: AsyncMutex<()>,
}

impl BatchController {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        sessions: Arc<dyn SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatchConfig,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            driver,
            sessions,
            checkpoints,
            config,
            notifications,
            active: Mutex::new(None),
            starting: AsyncMutex::new(()),
        }
    }

    /// 订阅进度通知
    pub fn subscribe(&self) -> broadcast::Receiver<BatchNotification> {
        self.notifications.subscribe()
    }

    /// 启动新的遍历。已有遍历会被取消，并在其当前会话处理完、
    /// 最终状态写入后才开始新的遍历。
    pub async fn start(&self, platform: Platform) {
        let _starting = self.starting.lock().await;

        let previous = self.active.lock().as_ref().map(|run| run.control.clone());
        if let Some(previous) = previous {
            if !previous.is_finished() {
                info!("Cancelling running batch traversal before replacing it");
                previous.cancel();
                previous.finished().await;
            }
        }

        let control = TraversalControl::new();
        let notifications = self.notifications.clone();
        let traversal = BatchTraversal::new(
            platform,
            self.driver.clone(),
            self.sessions.clone(),
            self.checkpoints.clone(),
            self.config.clone(),
        )
        .with_control(control.clone())
        .with_progress_sink(Arc::new(move |progress: &BatchProgress| {
            // 没有订阅者时发送失败，忽略即可
            let _ = notifications.send(BatchNotification::BatchCaptureProgress {
                progress: progress.clone(),
            });
        }));

        let replaced = self.active.lock().replace(ActiveRun {
            control,
            handle: tokio::spawn(
                traversal
                    .run()
                    .instrument(info_span!("batch", platform = %platform)),
            ),
        });
        // 旧遍历只剩宽限期清理，不能再碰新遍历的检查点
        if let Some(replaced) = replaced {
            replaced.handle.abort();
        }
        info!(platform = %platform, "Batch traversal scheduled");
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|run| !run.control.is_finished())
    }

    /// 暂停当前遍历，没有活动遍历时返回 false
    pub fn pause(&self) -> bool {
        self.with_active(TraversalControl::pause)
    }

    pub fn resume(&self) -> bool {
        self.with_active(TraversalControl::resume)
    }

    pub fn cancel(&self) -> bool {
        self.with_active(TraversalControl::cancel)
    }

    fn with_active(&self, action: impl FnOnce(&TraversalControl)) -> bool {
        match self.active.lock().as_ref() {
            Some(run) if !run.control.is_finished() => {
                action(&run.control);
                true
            }
            _ => false,
        }
    }

    /// 当前是否运行，以及最近的检查点
    pub async fn status(&self) -> (bool, Option<CheckpointRecord>) {
        let checkpoint = match self.checkpoints.load_checkpoint().await {
            Ok(record) => record,
            Err(e) => {
                debug!("Failed to read checkpoint: {}", e);
                None
            }
        };
        (self.is_running(), checkpoint)
    }

    /// 等待当前遍历结束（含检查点宽限期）并返回最终进度
    pub async fn join(&self) -> Option<BatchProgress> {
        let run = self.active.lock().take()?;
        match run.handle.await {
            Ok(progress) => Some(progress),
            Err(e) => {
                warn!("Batch traversal task failed: {}", e);
                None
            }
        }
    }

    /// 处理一条控制请求
    pub async fn handle_request(&self, request: ControlRequest) -> ControlResponse {
        debug!(?request, "Control request");
        match request {
            ControlRequest::StartBatchCapture => {
                let address = match self.driver.current_address().await {
                    Ok(address) => address,
                    Err(e) => return ControlResponse::error(e.to_string()),
                };
                match detect_platform(&address) {
                    Some(platform) => {
                        self.start(platform).await;
                        ControlResponse::Started { platform }
                    }
                    None => ControlResponse::error(format!("不支持的页面: {}", address)),
                }
            }
            ControlRequest::PauseBatchCapture => ControlResponse::Ack {
                success: self.pause(),
            },
            ControlRequest::ResumeBatchCapture => ControlResponse::Ack {
                success: self.resume(),
            },
            ControlRequest::CancelBatchCapture => ControlResponse::Ack {
                success: self.cancel(),
            },
            ControlRequest::GetBatchCaptureStatus => {
                let (running, checkpoint) = self.status().await;
                ControlResponse::Status {
                    running,
                    checkpoint,
                }
            }
        }
    }
}

impl Drop for BatchController {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().take() {
            run.control.cancel();
        }
    }
}
