//! # Capture Scheduler
//!
//! 单个页面的实时捕获。所有触发源（DOM 变化通知、兜底轮询、导航）
//! 都汇入同一个 [`CaptureScheduler::request_capture`]，变化经过防抖后写入存储。
//!
//! 状态保存在显式的 [`CaptureContext`] 中，导航时整体重置。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use omni_config::CaptureConfig;
use omni_core::{
    derive_session_id, detect_platform, fingerprint, has_changed, Fingerprint, Platform, Session,
};
use omni_extract::TranscriptExtractor;
use omni_session::SessionStore;

use crate::driver::PageDriver;
use crate::error::CaptureError;

/// 捕获触发源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTrigger {
    /// 文档发生变化
    Mutation,
    /// 页面内导航到新地址
    Navigated(String),
}

/// 等待写入的会话
#[derive(Debug, Clone)]
pub struct PendingSave {
    pub deadline: Instant,
    pub session: Session,
    pub fingerprint: Fingerprint,
}

/// 单个页面的捕获状态
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub platform: Option<Platform>,
    pub session_id: Option<String>,
    pub address: Option<String>,
    /// 最近一次进入防抖的指纹
    pub last_emitted: Option<Fingerprint>,
    /// 最近一次写入存储的指纹
    pub last_written: Option<Fingerprint>,
    /// 至多一个待写入
    pub pending: Option<PendingSave>,
    /// 宿主环境已失效
    pub invalidated: bool,
}

impl CaptureContext {
    /// 清空当前页面的状态。宿主失效标记不会被清除。
    pub fn reset(&mut self) {
        let invalidated = self.invalidated;
        *self = Self {
            invalidated,
            ..Self::default()
        };
    }

    /// 是否正在观察一个支持的平台会话
    pub fn is_observing(&self) -> bool {
        self.platform.is_some() && self.session_id.is_some()
    }
}

/// 一次捕获请求的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// 当前地址不是支持的平台
    Unobserved,
    Invalidated,
    /// 页面上还没有消息
    Empty,
    Unchanged,
    /// 已安排（或重新安排）写入
    Scheduled { deadline: Instant },
    Failed(String),
}

/// 一次写入尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// 没有待写入
    Idle,
    /// 与已写入的内容相同
    Unchanged,
    Saved {
        session_id: String,
        message_count: usize,
    },
    /// 宿主已失效，放弃写入
    Abandoned,
    Failed(String),
}

/// 实时捕获调度器
pub struct CaptureScheduler {
    driver: Arc<dyn PageDriver>,
    store: Arc<dyn SessionStore>,
    config: CaptureConfig,
    context: CaptureContext,
}

impl CaptureScheduler {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        store: Arc<dyn SessionStore>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            driver,
            store,
            config,
            context: CaptureContext::default(),
        }
    }

    pub fn context(&self) -> &CaptureContext {
        &self.context
    }

    /// 切换到新地址：丢弃待写入，重置状态，重新识别平台和会话 id
    pub fn navigate(&mut self, address: &str) {
        if self.context.pending.take().is_some() {
            debug!("Dropped pending save on navigation");
        }
        self.context.reset();
        self.context.address = Some(address.to_string());

        let Some(platform) = detect_platform(address) else {
            debug!(address, "Address is not a supported platform");
            return;
        };

        match derive_session_id(address, platform) {
            Ok(session_id) => {
                info!(platform = %platform, session_id = %session_id, "Observing session");
                self.context.platform = Some(platform);
                self.context.session_id = Some(session_id);
            }
            Err(e) => debug!("Cannot derive session id: {}", e),
        }
    }

    /// 请求一次捕获。所有触发源都经过这里。
    pub async fn request_capture(&mut self) -> CaptureOutcome {
        if self.context.invalidated {
            return CaptureOutcome::Invalidated;
        }
        let (Some(platform), Some(session_id)) =
            (self.context.platform, self.context.session_id.clone())
        else {
            return CaptureOutcome::Unobserved;
        };

        let html = match self.driver.document_html().await {
            Ok(html) => html,
            Err(e) => {
                let e = CaptureError::from(e);
                if e.is_context_invalidated() {
                    self.invalidate();
                    return CaptureOutcome::Invalidated;
                }
                warn!("Failed to read document: {}", e);
                return CaptureOutcome::Failed(e.to_string());
            }
        };

        let extraction = TranscriptExtractor::new(platform).extract_html(&html);
        if extraction.is_empty() {
            return CaptureOutcome::Empty;
        }

        let next = fingerprint(&extraction.messages);
        if !has_changed(self.context.last_emitted.as_ref(), &next) {
            return CaptureOutcome::Unchanged;
        }
        self.context.last_emitted = Some(next.clone());

        let address = self.context.address.clone().unwrap_or_default();
        let session = Session::from_extraction(session_id, platform, address, extraction);
        let deadline = Instant::now() + self.config.debounce();
        let replaced = self.context.pending.replace(PendingSave {
            deadline,
            session,
            fingerprint: next,
        });
        if replaced.is_some() {
            debug!("Debounce restarted");
        }

        CaptureOutcome::Scheduled { deadline }
    }

    /// 执行待写入
    pub async fn flush_pending(&mut self) -> FlushOutcome {
        let Some(pending) = self.context.pending.take() else {
            return FlushOutcome::Idle;
        };

        if !self.driver.is_alive().await {
            self.invalidate();
            return FlushOutcome::Abandoned;
        }

        if !has_changed(self.context.last_written.as_ref(), &pending.fingerprint) {
            return FlushOutcome::Unchanged;
        }

        match self.store.save_session_optimized(pending.session).await {
            Ok(saved) => {
                info!(
                    platform = %saved.platform,
                    session_id = %saved.id,
                    messages = saved.message_count,
                    "Session captured"
                );
                self.context.last_written = Some(pending.fingerprint);
                FlushOutcome::Saved {
                    session_id: saved.id,
                    message_count: saved.message_count,
                }
            }
            Err(e) if e.is_context_invalidated() => {
                self.invalidate();
                FlushOutcome::Abandoned
            }
            Err(e) => {
                warn!("Failed to save session: {}", e);
                // 回退到最后成功写入的指纹，下一次捕获会重新调度
                self.context.last_emitted = self.context.last_written.clone();
                FlushOutcome::Failed(e.to_string())
            }
        }
    }

    /// 捕获循环，直到取消、触发通道关闭或宿主失效。返回最终状态。
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<CaptureTrigger>,
        cancel: CancellationToken,
    ) -> CaptureContext {
        match self.driver.current_address().await {
            Ok(address) => self.navigate(&address),
            Err(e) => {
                warn!("Cannot read page address: {}", e);
                return self.context;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return self.context,
            _ = sleep(self.config.initial_delay()) => {}
        }
        self.request_capture().await;

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        poll.tick().await;

        while !self.context.invalidated {
            let deadline = self.context.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                _ = cancel.cancelled() => break,
                trigger = triggers.recv() => match trigger {
                    Some(CaptureTrigger::Mutation) => {
                        self.request_capture().await;
                    }
                    Some(CaptureTrigger::Navigated(address)) => {
                        self.navigate(&address);
                        self.request_capture().await;
                    }
                    None => break,
                },
                _ = poll.tick() => {
                    self.follow_address().await;
                    self.request_capture().await;
                }
                _ = wait_for(deadline) => {
                    self.flush_pending().await;
                }
            }
        }

        if self.context.pending.is_some() {
            self.flush_pending().await;
        }
        info!("Capture scheduler stopped");
        self.context
    }

    /// 轮询时发现地址变化
    async fn follow_address(&mut self) {
        match self.driver.current_address().await {
            Ok(address) if self.context.address.as_deref() != Some(address.as_str()) => {
                debug!(address = %address, "Address changed");
                self.navigate(&address);
            }
            Ok(_) => {}
            Err(e) => {
                let e = CaptureError::from(e);
                if e.is_context_invalidated() {
                    self.invalidate();
                } else {
                    debug!("Cannot read page address: {}", e);
                }
            }
        }
    }

    fn invalidate(&mut self) {
        if !self.context.invalidated {
            warn!("Host context invalidated, capture abandoned");
            self.context.invalidated = true;
        }
        self.context.pending = None;
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotDriver;
    use async_trait::async_trait;
    use omni_session::{MemoryStore, StoreError, StoreResult};
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const ADDRESS: &str = "https://yuanbao.tencent.com/chat/abcdefgh12";

    fn page(turns: &[(&str, &str)]) -> String {
        let bubbles: String = turns
            .iter()
            .map(|(user, ai)| {
                format!(
                    r#"<div class="agent-chat__bubble--human"><div class="content">{}</div></div>
                       <div class="agent-chat__bubble--ai"><div class="answer">{}</div></div>"#,
                    user, ai
                )
            })
            .collect();
        format!(r#"<div class="agent-chat__list">{}</div>"#, bubbles)
    }

    fn setup(dir: &Path, html: &str) -> (CaptureScheduler, Arc<SnapshotDriver>, Arc<MemoryStore>) {
        let path = dir.join("page.html");
        std::fs::write(&path, html).unwrap();
        let driver = Arc::new(SnapshotDriver::new(ADDRESS, path));
        let store = Arc::new(MemoryStore::new());
        let scheduler = CaptureScheduler::new(driver.clone(), store.clone(), CaptureConfig::default());
        (scheduler, driver, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_write_with_final_state() {
        let temp_dir = TempDir::new().unwrap();
        let (mut scheduler, driver, store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        scheduler.navigate(ADDRESS);

        assert!(matches!(scheduler.request_capture().await, CaptureOutcome::Scheduled { .. }));
        std::fs::write(driver.path(), page(&[("q1", "a1"), ("q2", "a2")])).unwrap();
        assert!(matches!(scheduler.request_capture().await, CaptureOutcome::Scheduled { .. }));

        let outcome = scheduler.flush_pending().await;
        assert_eq!(
            outcome,
            FlushOutcome::Saved {
                session_id: "abcdefgh12".to_string(),
                message_count: 4
            }
        );
        assert_eq!(store.len(), 1);
        assert_eq!(scheduler.flush_pending().await, FlushOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_transcript_is_not_rescheduled() {
        let temp_dir = TempDir::new().unwrap();
        let (mut scheduler, _driver, _store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        scheduler.navigate(ADDRESS);

        let first = scheduler.request_capture().await;
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(scheduler.request_capture().await, CaptureOutcome::Unchanged);

        // 未变化时不会推迟原定的写入时间
        let CaptureOutcome::Scheduled { deadline } = first else {
            panic!("expected a scheduled save");
        };
        assert_eq!(scheduler.context().pending.as_ref().unwrap().deadline, deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_unsupported_pages_are_no_ops() {
        let temp_dir = TempDir::new().unwrap();
        let (mut scheduler, _driver, _store) = setup(temp_dir.path(), "<p>landing</p>");

        assert_eq!(scheduler.request_capture().await, CaptureOutcome::Unobserved);
        scheduler.navigate("https://example.com/chat/1");
        assert_eq!(scheduler.request_capture().await, CaptureOutcome::Unobserved);

        scheduler.navigate(ADDRESS);
        assert_eq!(scheduler.request_capture().await, CaptureOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_host_abandons_pending_save() {
        let temp_dir = TempDir::new().unwrap();
        let (mut scheduler, driver, store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        scheduler.navigate(ADDRESS);
        scheduler.request_capture().await;

        std::fs::remove_file(driver.path()).unwrap();
        assert_eq!(scheduler.flush_pending().await, FlushOutcome::Abandoned);
        assert!(store.is_empty());
        assert!(scheduler.context().invalidated);
        assert_eq!(scheduler.request_capture().await, CaptureOutcome::Invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_store_abandons_silently() {
        let temp_dir = TempDir::new().unwrap();
        let (mut scheduler, _driver, store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        scheduler.navigate(ADDRESS);
        scheduler.request_capture().await;

        store.invalidate();
        assert_eq!(scheduler.flush_pending().await, FlushOutcome::Abandoned);
        assert!(scheduler.context().invalidated);
    }

    /// 第一次写入失败的存储
    struct FailOnceStore {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FailOnceStore {
        async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
            self.inner.get_session(id).await
        }

        async fn save_session_optimized(&self, session: Session) -> StoreResult<Session> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.inner.save_session_optimized(session).await
        }

        async fn delete_session(&self, id: &str) -> StoreResult<()> {
            self.inner.delete_session(id).await
        }

        async fn get_all_sessions(&self) -> StoreResult<Vec<Session>> {
            self.inner.get_all_sessions().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_is_retried_on_next_capture() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("page.html");
        std::fs::write(&path, page(&[("q1", "a1")])).unwrap();
        let driver = Arc::new(SnapshotDriver::new(ADDRESS, path));
        let store = Arc::new(FailOnceStore {
            inner: MemoryStore::new(),
            failed: AtomicBool::new(false),
        });
        let mut scheduler = CaptureScheduler::new(driver, store.clone(), CaptureConfig::default());
        scheduler.navigate(ADDRESS);

        assert!(matches!(scheduler.request_capture().await, CaptureOutcome::Scheduled { .. }));
        assert!(matches!(scheduler.flush_pending().await, FlushOutcome::Failed(_)));

        // 内容未变，但上次没有写成，仍需重新调度
        assert!(matches!(scheduler.request_capture().await, CaptureOutcome::Scheduled { .. }));
        assert_eq!(
            scheduler.flush_pending().await,
            FlushOutcome::Saved {
                session_id: "abcdefgh12".to_string(),
                message_count: 2
            }
        );
        assert_eq!(store.inner.len(), 1);
        assert_eq!(scheduler.request_capture().await, CaptureOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_resets_context() {
        let temp_dir = TempDir::new().unwrap();
        let (mut scheduler, _driver, _store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        scheduler.navigate(ADDRESS);
        scheduler.request_capture().await;
        assert!(scheduler.context().pending.is_some());

        scheduler.navigate("https://yuanbao.tencent.com/chat/zyxwvuts99");
        let context = scheduler.context();
        assert!(context.pending.is_none());
        assert!(context.last_emitted.is_none());
        assert_eq!(context.session_id.as_deref(), Some("zyxwvuts99"));

        // 同样的内容在新会话下重新进入防抖
        assert!(matches!(scheduler.request_capture().await, CaptureOutcome::Scheduled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_saves_after_debounce_and_follows_navigation() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, driver, store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(rx, cancel.clone()));

        // initial_delay 500ms + debounce 800ms
        sleep(Duration::from_millis(1500)).await;
        assert!(store.get_session("abcdefgh12").await.unwrap().is_some());

        std::fs::write(driver.path(), page(&[("q1", "a1"), ("q2", "a2")])).unwrap();
        tx.send(CaptureTrigger::Mutation).await.unwrap();
        sleep(Duration::from_millis(1100)).await;
        let grown = store.get_session("abcdefgh12").await.unwrap().unwrap();
        assert_eq!(grown.message_count, 4);

        driver.set_address("https://yuanbao.tencent.com/chat/nextsess01");
        std::fs::write(driver.path(), page(&[("q9", "a9")])).unwrap();
        tx.send(CaptureTrigger::Navigated(
            "https://yuanbao.tencent.com/chat/nextsess01".to_string(),
        ))
        .await
        .unwrap();
        sleep(Duration::from_millis(1400)).await;

        let next = store.get_session("nextsess01").await.unwrap().unwrap();
        assert_eq!(next.messages[0].content, "q9");
        assert_eq!(store.len(), 2);

        cancel.cancel();
        let context = handle.await.unwrap();
        assert_eq!(context.session_id.as_deref(), Some("nextsess01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_when_triggers_close() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, _driver, store) = setup(temp_dir.path(), &page(&[("q1", "a1")]));
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(scheduler.run(rx, CancellationToken::new()));

        sleep(Duration::from_millis(600)).await;
        drop(tx);
        let context = handle.await.unwrap();

        // 退出前写入待写入的会话
        assert!(context.pending.is_none());
        assert_eq!(store.len(), 1);
    }
}
