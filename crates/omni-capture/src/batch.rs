//! # Batch Traversal
//!
//! 自动遍历侧边栏中的所有会话并逐个保存。
//!
//! 状态：`running ⇄ paused`，最终进入 `completed` / `cancelled` / `error`。
//! 暂停与取消是协作式的：只在每轮开始和每次访问之后检查，
//! 正在处理的会话总会完成后才响应取消。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use omni_config::BatchConfig;
use omni_core::registry::SessionListRules;
use omni_core::{
    derive_session_id, platform_config, BatchProgress, BatchStatus, CheckpointRecord, Platform,
    Session,
};
use omni_extract::document::{first_descendant, trimmed_text};
use omni_extract::{Document, TranscriptExtractor};
use omni_session::{CheckpointStore, SessionStore};

use crate::driver::{NodeTarget, PageDriver, ScrollEdge};
use crate::error::{CaptureError, CaptureResult, DriverError};
use crate::stability::{stabilize, StabilityPolicy};

/// 找不到会话列表时的错误信息
pub const NO_SESSION_LIST: &str = "未找到会话列表";
/// 会话条目没有标题时的占位
pub const UNTITLED_ITEM: &str = "未命名会话";
const LOADING_TITLE: &str = "正在加载会话列表...";

/// 进度回调
pub type ProgressSink = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// 遍历控制句柄，可在任意任务中克隆使用
#[derive(Debug, Clone)]
pub struct TraversalControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
    finished: Arc<watch::Sender<bool>>,
}

impl Default for TraversalControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TraversalControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        let (finished, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
            finished: Arc::new(finished),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 遍历已写入最终状态。之后的检查点宽限期不算在运行中。
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    /// 等待遍历写入最终状态
    pub async fn finished(&self) {
        let mut rx = self.finished.subscribe();
        // 发送端由自身持有，wait_for 不会因通道关闭而出错
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// 暂停期间挂起。恢复时返回 true，被取消时返回 false。
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

/// 侧边栏中的一个会话条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionItem {
    pub target: NodeTarget,
    pub title: String,
}

/// 批量遍历
pub struct BatchTraversal {
    platform: Platform,
    driver: Arc<dyn PageDriver>,
    sessions: Arc<dyn SessionStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: BatchConfig,
    control: TraversalControl,
    sink: Option<ProgressSink>,
}

impl BatchTraversal {
    pub fn new(
        platform: Platform,
        driver: Arc<dyn PageDriver>,
        sessions: Arc<dyn SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatchConfig,
    ) -> Self {
        Self {
            platform,
            driver,
            sessions,
            checkpoints,
            config,
            control: TraversalControl::new(),
            sink: None,
        }
    }

    pub fn with_control(mut self, control: TraversalControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn control(&self) -> TraversalControl {
        self.control.clone()
    }

    /// 执行遍历，返回最终进度。不会返回错误，失败体现在状态中。
    pub async fn run(self) -> BatchProgress {
        info!(platform = %self.platform, "Batch traversal started");
        let mut progress = BatchProgress::starting(LOADING_TITLE);
        self.report(&progress).await;

        match self.traverse(&mut progress).await {
            Ok(()) => {}
            Err(e) if e.is_context_invalidated() => {
                warn!("Host context invalidated, batch traversal stopped");
                progress.status = BatchStatus::Cancelled;
            }
            Err(e) => {
                error!("Batch traversal failed: {}", e);
                progress.fail(e.to_string());
            }
        }
        progress.current_title.clear();

        info!(
            platform = %self.platform,
            status = %progress.status,
            current = progress.current,
            total = progress.total,
            captured = progress.captured,
            failed = progress.failed,
            "Batch traversal finished"
        );
        self.report(&progress).await;
        self.control.mark_finished();
        self.clear_after_grace().await;
        progress
    }

    async fn traverse(&self, progress: &mut BatchProgress) -> CaptureResult<()> {
        let Some(rules) = platform_config(self.platform).session_list.as_ref() else {
            progress.fail(NO_SESSION_LIST);
            return Ok(());
        };

        self.ensure_sidebar_open(rules).await?;
        let items = self.discover_items(rules).await?;
        if items.is_empty() {
            warn!("No session list found");
            progress.fail(NO_SESSION_LIST);
            return Ok(());
        }

        progress.total = items.len();
        info!("Total sessions found: {}", items.len());

        for (index, item) in items.iter().enumerate() {
            if !self.honour_pause(progress).await {
                progress.status = BatchStatus::Cancelled;
                return Ok(());
            }

            progress.current = index + 1;
            progress.current_title = item.title.clone();
            progress.status = BatchStatus::Running;
            self.report(progress).await;

            match self.visit(rules, item).await {
                Ok(Some(count)) => progress.captured += count,
                Ok(None) => debug!(title = %item.title, "Session has no messages"),
                Err(e) if e.is_context_invalidated() => return Err(e),
                Err(e) => {
                    warn!(title = %item.title, "Failed to capture session: {}", e);
                    progress.failed += 1;
                }
            }

            if self.control.is_cancelled() {
                progress.status = BatchStatus::Cancelled;
                return Ok(());
            }
            sleep(self.config.between_sessions_delay()).await;
        }

        progress.current = progress.total;
        progress.status = BatchStatus::Completed;
        Ok(())
    }

    /// 每轮开始的检查点。返回 false 表示已取消。
    async fn honour_pause(&self, progress: &mut BatchProgress) -> bool {
        if self.control.is_cancelled() {
            return false;
        }
        if self.control.is_paused() {
            progress.status = BatchStatus::Paused;
            self.report(progress).await;
            if !self.control.wait_while_paused().await {
                return false;
            }
            progress.status = BatchStatus::Running;
        }
        true
    }

    /// 侧边栏被移出视口时尝试点击展开按钮
    async fn ensure_sidebar_open(&self, rules: &SessionListRules) -> CaptureResult<()> {
        let Some(sidebar) = rules.sidebar_selectors.first().copied() else {
            return Ok(());
        };

        match self.driver.is_offscreen(sidebar).await? {
            Some(true) => {
                info!("Sidebar is hidden, trying to open it");
                let html = self.driver.document_html().await?;
                for toggle in present_selectors(&html, rules.toggle_selectors) {
                    if !self.driver.click(&NodeTarget::new(toggle, 0)).await? {
                        continue;
                    }
                    sleep(self.config.sidebar_toggle_delay()).await;
                    if self.driver.is_offscreen(sidebar).await? == Some(false) {
                        info!(toggle, "Sidebar opened");
                        return Ok(());
                    }
                }
                warn!("Could not find a control to open the sidebar");
            }
            Some(false) => debug!("Sidebar is already visible"),
            None => debug!("Sidebar element not found"),
        }
        Ok(())
    }

    /// 滚动侧边栏直到条目数稳定，然后列出所有条目
    async fn discover_items(&self, rules: &SessionListRules) -> CaptureResult<Vec<SessionItem>> {
        let html = self.driver.document_html().await?;
        match present_selectors(&html, rules.sidebar_selectors).first().copied() {
            Some(sidebar) => {
                let driver = self.driver.as_ref();
                let delay = self.config.list_scroll_delay();
                let item_selectors = rules.item_selectors;
                let outcome = stabilize(&self.stability_policy(), move || async move {
                    driver.scroll(sidebar, ScrollEdge::End).await.ok()??;
                    sleep(delay).await;
                    let html = driver.document_html().await.ok()?;
                    Some(count_items(&html, item_selectors) as u64)
                })
                .await;
                debug!(
                    sidebar,
                    rounds = outcome.rounds,
                    converged = outcome.converged,
                    "Session list loaded"
                );
            }
            None => warn!("Sidebar not found for scrolling"),
        }

        let html = self.driver.document_html().await?;
        Ok(enumerate_items(&html, rules))
    }

    /// 访问一个会话：点击、等待、加载历史、提取、保存。返回保存的消息数。
    async fn visit(
        &self,
        rules: &SessionListRules,
        item: &SessionItem,
    ) -> CaptureResult<Option<usize>> {
        if !self.driver.click(&item.target).await? {
            return Err(CaptureError::TargetNotFound {
                selector: item.target.selector.clone(),
                index: item.target.index,
            });
        }
        sleep(self.config.settle_delay()).await;
        self.load_history(rules).await?;

        let html = self.driver.document_html().await?;
        let extraction = TranscriptExtractor::new(self.platform).extract_html(&html);
        if extraction.is_empty() {
            return Ok(None);
        }

        if !self.driver.is_alive().await {
            return Err(DriverError::ContextInvalidated.into());
        }
        let address = self.driver.current_address().await?;
        let session_id = derive_session_id(&address, self.platform)?;
        let mut session = Session::from_extraction(session_id, self.platform, address, extraction);
        if let Some(existing) = self.sessions.get_session(&session.id).await? {
            session.created_at = existing.created_at;
        }

        let saved = self.sessions.save_session_optimized(session).await?;
        info!(
            session_id = %saved.id,
            messages = saved.message_count,
            "Session captured"
        );
        Ok(Some(saved.message_count))
    }

    /// 反复滚动到顶部直到高度不再增长
    async fn load_history(&self, rules: &SessionListRules) -> CaptureResult<()> {
        let html = self.driver.document_html().await?;
        let Some(container) = present_selectors(&html, rules.history_selectors).first().copied()
        else {
            debug!("Message container not found");
            return Ok(());
        };

        let driver = self.driver.as_ref();
        let delay = self.config.history_scroll_delay();
        let outcome = stabilize(&self.stability_policy(), move || async move {
            let metrics = driver.scroll(container, ScrollEdge::Top).await.ok()??;
            sleep(delay).await;
            Some(metrics.scroll_height)
        })
        .await;
        debug!(
            container,
            rounds = outcome.rounds,
            height = outcome.last,
            "History loaded"
        );
        Ok(())
    }

    fn stability_policy(&self) -> StabilityPolicy {
        StabilityPolicy {
            stable_checks: self.config.stable_checks,
            max_rounds: self.config.max_scroll_rounds,
        }
    }

    async fn report(&self, progress: &BatchProgress) {
        if let Some(sink) = &self.sink {
            sink(progress);
        }
        let record = CheckpointRecord::new(progress.clone(), self.platform);
        if let Err(e) = self.checkpoints.save_checkpoint(&record).await {
            debug!("Failed to write checkpoint: {}", e);
        }
    }

    /// 终止状态保留一段时间后清除检查点。期间若已有新的遍历写入则保留。
    async fn clear_after_grace(&self) {
        sleep(self.config.terminal_grace()).await;
        match self.checkpoints.load_checkpoint().await {
            Ok(Some(record)) if record.progress.status.is_terminal() => {
                if let Err(e) = self.checkpoints.clear_checkpoint().await {
                    debug!("Failed to clear checkpoint: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Failed to read checkpoint: {}", e),
        }
    }
}

/// 文档中存在的选择器，保持原顺序
fn present_selectors(html: &str, selectors: &[&'static str]) -> Vec<&'static str> {
    let doc = Document::parse(html);
    selectors
        .iter()
        .copied()
        .filter(|css| doc.count(css) > 0)
        .collect()
}

/// 第一个有匹配的条目选择器的匹配数
fn count_items(html: &str, item_selectors: &[&str]) -> usize {
    let doc = Document::parse(html);
    item_selectors
        .iter()
        .map(|css| doc.count(css))
        .find(|count| *count > 0)
        .unwrap_or(0)
}

fn enumerate_items(html: &str, rules: &SessionListRules) -> Vec<SessionItem> {
    let doc = Document::parse(html);
    for css in rules.item_selectors {
        let nodes = doc.select_all(css);
        if nodes.is_empty() {
            continue;
        }
        debug!("Found {} sessions with: {}", nodes.len(), css);
        return nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| SessionItem {
                target: NodeTarget::new(*css, index),
                title: rules
                    .item_title_selectors
                    .iter()
                    .filter_map(|title_css| first_descendant(node, title_css))
                    .map(trimmed_text)
                    .find(|title| !title.is_empty())
                    .unwrap_or_else(|| UNTITLED_ITEM.to_string()),
            })
            .collect();
    }
    Vec::new()
}
