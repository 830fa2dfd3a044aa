use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;

use omni_capture::{
    BatchController, BatchNotification, BatchTraversal, ControlRequest, ControlResponse,
    DriverError, NodeTarget, PageDriver, ScrollEdge, ScrollMetrics, NO_SESSION_LIST,
};
use omni_config::BatchConfig;
use omni_core::{BatchProgress, BatchStatus, CheckpointRecord, Platform, Session};
use omni_session::{CheckpointStore, MemoryStore, SessionStore, StoreError, StoreResult};

const HOME: &str = "https://www.doubao.com/chat/";

struct MockItem {
    id: &'static str,
    title: &'static str,
    clickable: bool,
}

#[derive(Default)]
struct MockState {
    address: String,
    opened: Option<usize>,
    clicks: Vec<usize>,
}

/// 模拟豆包页面：侧边栏列出会话，点击后切换地址和消息列表
struct MockDriver {
    items: Vec<MockItem>,
    with_sidebar: bool,
    state: Mutex<MockState>,
}

impl MockDriver {
    fn new(items: Vec<MockItem>) -> Self {
        Self {
            items,
            with_sidebar: true,
            state: Mutex::new(MockState {
                address: HOME.to_string(),
                ..Default::default()
            }),
        }
    }

    fn without_sidebar() -> Self {
        Self {
            with_sidebar: false,
            ..Self::new(Vec::new())
        }
    }

    fn clicks(&self) -> Vec<usize> {
        self.state.lock().clicks.clone()
    }

    fn render(&self) -> String {
        let mut html = String::from("<html><body>");
        if self.with_sidebar {
            html.push_str(r#"<div id="flow_chat_sidebar">"#);
            for item in &self.items {
                html.push_str(&format!(
                    r#"<div class="chat-item"><span class="title">{}</span></div>"#,
                    item.title
                ));
            }
            html.push_str("</div>");
        }
        html.push_str(r#"<div class="message-list">"#);
        if let Some(index) = self.state.lock().opened {
            html.push_str(&format!(
                r#"<div class="message-block-container"><div class="bg-s-color-bg-trans"><div class="container-u">问题{index}</div></div></div>
                   <div class="message-block-container"><div class="container-a"><div class="md">回答{index}</div></div></div>"#
            ));
        }
        html.push_str("</div></body></html>");
        html
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn current_address(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().address.clone())
    }

    async fn document_html(&self) -> Result<String, DriverError> {
        Ok(self.render())
    }

    async fn click(&self, target: &NodeTarget) -> Result<bool, DriverError> {
        if !target.selector.contains("chat-item") {
            return Ok(false);
        }
        let Some(item) = self.items.get(target.index) else {
            return Ok(false);
        };
        let mut state = self.state.lock();
        state.clicks.push(target.index);
        if !item.clickable {
            return Ok(false);
        }
        state.opened = Some(target.index);
        state.address = format!("{}{}", HOME, item.id);
        Ok(true)
    }

    async fn scroll(
        &self,
        _selector: &str,
        edge: ScrollEdge,
    ) -> Result<Option<ScrollMetrics>, DriverError> {
        let scroll_height = match edge {
            ScrollEdge::Top => 2400,
            ScrollEdge::End => 800,
        };
        Ok(Some(ScrollMetrics { scroll_height }))
    }

    async fn is_offscreen(&self, _selector: &str) -> Result<Option<bool>, DriverError> {
        Ok(Some(!self.with_sidebar))
    }

    async fn is_alive(&self) -> bool {
        true
    }
}

fn three_items(second_clickable: bool) -> Vec<MockItem> {
    vec![
        MockItem {
            id: "chat1001",
            title: "周末计划",
            clickable: true,
        },
        MockItem {
            id: "chat1002",
            title: "学习Rust",
            clickable: second_clickable,
        },
        MockItem {
            id: "chat1003",
            title: "旅行清单",
            clickable: true,
        },
    ]
}

fn traversal(platform: Platform, driver: Arc<MockDriver>, store: Arc<MemoryStore>) -> BatchTraversal {
    BatchTraversal::new(
        platform,
        driver,
        store.clone(),
        store,
        BatchConfig::default(),
    )
}

fn recording_sink(
    log: Arc<Mutex<Vec<BatchProgress>>>,
) -> Arc<dyn Fn(&BatchProgress) + Send + Sync> {
    Arc::new(move |progress: &BatchProgress| log.lock().push(progress.clone()))
}

#[tokio::test(start_paused = true)]
async fn test_failed_item_does_not_stop_traversal() {
    let driver = Arc::new(MockDriver::new(three_items(false)));
    let store = Arc::new(MemoryStore::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let progress = traversal(Platform::Doubao, driver.clone(), store.clone())
        .with_progress_sink(recording_sink(log.clone()))
        .run()
        .await;

    assert_eq!(progress.status, BatchStatus::Completed);
    assert_eq!(progress.total, 3);
    assert_eq!(progress.current, 3);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.captured, 4);
    assert_eq!(driver.clicks(), vec![0, 1, 2]);

    assert_eq!(store.len(), 2);
    let first = store.get_session("chat1001").await.unwrap().unwrap();
    assert_eq!(first.message_count, 2);
    assert_eq!(first.platform, Platform::Doubao);
    assert!(store.get_session("chat1002").await.unwrap().is_none());
    assert!(store.get_session("chat1003").await.unwrap().is_some());

    let titles: Vec<String> = log
        .lock()
        .iter()
        .filter(|p| p.status == BatchStatus::Running && p.current > 0)
        .map(|p| p.current_title.clone())
        .collect();
    assert_eq!(titles, vec!["周末计划", "学习Rust", "旅行清单"]);

    // 终止状态在宽限期后清除
    assert!(store.load_checkpoint().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_first_visit() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    let run = traversal(Platform::Doubao, driver.clone(), store.clone());
    let control = run.control();

    let sink = {
        let control = control.clone();
        Arc::new(move |progress: &BatchProgress| {
            if progress.current == 1 && progress.status == BatchStatus::Running {
                control.cancel();
            }
        })
    };
    let progress = run.with_progress_sink(sink).run().await;

    assert_eq!(progress.status, BatchStatus::Cancelled);
    assert_eq!(progress.current, 1);
    assert_eq!(progress.captured, 2);
    assert_eq!(driver.clicks(), vec![0]);
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let run = traversal(Platform::Doubao, driver.clone(), store.clone());
    let control = run.control();

    let sink = {
        let control = control.clone();
        let log = log.clone();
        Arc::new(move |progress: &BatchProgress| {
            if progress.current == 1 && progress.status == BatchStatus::Running {
                control.pause();
            }
            log.lock().push(progress.clone());
        })
    };
    let handle = tokio::spawn(run.with_progress_sink(sink).run());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(control.is_paused());
    assert_eq!(driver.clicks(), vec![0]);
    assert_eq!(
        log.lock().last().map(|p| p.status),
        Some(BatchStatus::Paused)
    );

    control.resume();
    let progress = handle.await.unwrap();
    assert_eq!(progress.status, BatchStatus::Completed);
    assert_eq!(driver.clicks(), vec![0, 1, 2]);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_missing_session_list_is_an_error() {
    let driver = Arc::new(MockDriver::without_sidebar());
    let store = Arc::new(MemoryStore::new());

    let progress = traversal(Platform::Doubao, driver.clone(), store.clone())
        .run()
        .await;

    assert_eq!(progress.status, BatchStatus::Error);
    assert_eq!(progress.error.as_deref(), Some(NO_SESSION_LIST));
    assert_eq!(progress.current, 0);
    assert!(driver.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_platform_without_session_list() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());

    let progress = traversal(Platform::Claude, driver.clone(), store.clone())
        .run()
        .await;

    assert_eq!(progress.status, BatchStatus::Error);
    assert_eq!(progress.error.as_deref(), Some(NO_SESSION_LIST));
    assert!(driver.clicks().is_empty());
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalidated_store_cancels_traversal() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    store.invalidate();

    let progress = traversal(Platform::Doubao, driver.clone(), store.clone())
        .run()
        .await;

    assert_eq!(progress.status, BatchStatus::Cancelled);
    assert_eq!(driver.clicks(), vec![0]);
}

/// 拒绝写入指定会话的存储
struct RejectingStore {
    inner: MemoryStore,
    rejected: &'static str,
}

#[async_trait]
impl SessionStore for RejectingStore {
    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        self.inner.get_session(id).await
    }

    async fn save_session_optimized(&self, session: Session) -> StoreResult<Session> {
        if session.id == self.rejected {
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

#[async_trait]
impl CheckpointStore for RejectingStore {
    async fn save_checkpoint(&self, record: &CheckpointRecord) -> StoreResult<()> {
        self.inner.save_checkpoint(record).await
    }

    async fn load_checkpoint(&self) -> StoreResult<Option<CheckpointRecord>> {
        self.inner.load_checkpoint().await
    }

    async fn clear_checkpoint(&self) -> StoreResult<()> {
        self.inner.clear_checkpoint().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_on_clicked_item_is_counted() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(RejectingStore {
        inner: MemoryStore::new(),
        rejected: "chat1002",
    });

    let progress = BatchTraversal::new(
        Platform::Doubao,
        driver.clone(),
        store.clone(),
        store.clone(),
        BatchConfig::default(),
    )
    .run()
    .await;

    assert_eq!(progress.status, BatchStatus::Completed);
    assert_eq!(progress.current, 3);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.captured, 4);
    assert_eq!(driver.clicks(), vec![0, 1, 2]);
    assert_eq!(store.inner.len(), 2);
    assert!(store.inner.get_session("chat1002").await.unwrap().is_none());
}

fn controller(driver: Arc<MockDriver>, store: Arc<MemoryStore>) -> BatchController {
    let sessions: Arc<dyn SessionStore> = store.clone();
    let checkpoints: Arc<dyn CheckpointStore> = store;
    BatchController::new(driver, sessions, checkpoints, BatchConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_controller_replaces_running_traversal() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    let controller = controller(driver.clone(), store.clone());
    let mut notifications = controller.subscribe();

    controller.start(Platform::Doubao).await;
    controller.start(Platform::Doubao).await;
    assert!(controller.is_running());

    let progress = controller.join().await.unwrap();
    assert_eq!(progress.status, BatchStatus::Completed);
    assert_eq!(driver.clicks(), vec![0, 1, 2]);
    assert_eq!(store.len(), 3);

    let mut statuses = Vec::new();
    while let Ok(BatchNotification::BatchCaptureProgress { progress }) = notifications.try_recv() {
        statuses.push(progress.status);
    }
    assert!(statuses.contains(&BatchStatus::Cancelled));
    assert_eq!(statuses.last(), Some(&BatchStatus::Completed));
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_controller_handles_protocol() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    let controller = controller(driver.clone(), store.clone());

    assert_eq!(
        controller.handle_request(ControlRequest::PauseBatchCapture).await,
        ControlResponse::Ack { success: false }
    );

    assert_eq!(
        controller.handle_request(ControlRequest::StartBatchCapture).await,
        ControlResponse::Started {
            platform: Platform::Doubao
        }
    );
    match controller
        .handle_request(ControlRequest::GetBatchCaptureStatus)
        .await
    {
        ControlResponse::Status { running, .. } => assert!(running),
        other => panic!("unexpected response: {:?}", other),
    }
    assert_eq!(
        controller.handle_request(ControlRequest::CancelBatchCapture).await,
        ControlResponse::Ack { success: true }
    );

    let progress = controller.join().await.unwrap();
    assert_eq!(progress.status, BatchStatus::Cancelled);
    assert!(driver.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_controller_rejects_unknown_page() {
    let driver = Arc::new(MockDriver::new(Vec::new()));
    driver.state.lock().address = "https://example.com/".to_string();
    let controller = controller(driver, Arc::new(MemoryStore::new()));

    match controller.handle_request(ControlRequest::StartBatchCapture).await {
        ControlResponse::Error { message } => assert!(message.contains("example.com")),
        other => panic!("unexpected response: {:?}", other),
    }
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_controller_replacement_waits_for_in_flight_visit() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    let controller = controller(driver.clone(), store.clone());

    controller.start(Platform::Doubao).await;
    while driver.clicks().is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // 第一个会话已点击但尚未保存
    assert!(store.is_empty());
    controller.start(Platform::Doubao).await;

    // 旧遍历先完成当前会话，新遍历此时还未点击
    assert_eq!(driver.clicks(), vec![0]);
    assert!(store.get_session("chat1001").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (running, checkpoint) = controller.status().await;
    assert!(running);
    assert_eq!(
        checkpoint.map(|record| record.progress.status),
        Some(BatchStatus::Running)
    );

    // 旧遍历的宽限期清理不会影响新遍历
    tokio::time::sleep(Duration::from_secs(4)).await;
    let (_, checkpoint) = controller.status().await;
    assert_eq!(
        checkpoint.map(|record| record.progress.status),
        Some(BatchStatus::Running)
    );

    let progress = controller.join().await.unwrap();
    assert_eq!(progress.status, BatchStatus::Completed);
    assert_eq!(driver.clicks(), vec![0, 0, 1, 2]);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_controller_not_running_during_terminal_grace() {
    let driver = Arc::new(MockDriver::new(three_items(true)));
    let store = Arc::new(MemoryStore::new());
    let controller = controller(driver.clone(), store.clone());
    let mut notifications = controller.subscribe();

    controller.start(Platform::Doubao).await;
    loop {
        let BatchNotification::BatchCaptureProgress { progress } = notifications.recv().await.unwrap();
        if progress.status == BatchStatus::Completed {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // 检查点仍保留终止状态，但遍历已不在运行
    let (running, checkpoint) = controller.status().await;
    assert!(!running);
    assert_eq!(
        checkpoint.map(|record| record.progress.status),
        Some(BatchStatus::Completed)
    );
    for request in [
        ControlRequest::PauseBatchCapture,
        ControlRequest::ResumeBatchCapture,
        ControlRequest::CancelBatchCapture,
    ] {
        assert_eq!(
            controller.handle_request(request).await,
            ControlResponse::Ack { success: false }
        );
    }

    controller.join().await.unwrap();
    assert!(store.load_checkpoint().await.unwrap().is_none());
}
