//! 编排器集成测试
//!
//! 用脚本化的假远程客户端驱动完整流程：矩阵构建、窗口限并发提交、
//! 重试退避、轮询推进、快照恢复与结果导出。

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batch_infer::api::{
    Choice, ChoiceMessage, InferenceApi, RemoteError, StatusResponse, SubmitRequest,
    SubmitResponse, UsagePayload,
};
use batch_infer::{
    Config, Event, FileStore, Input, NewTemplate, Orchestrator, Request, Snapshot, Store, Task,
    TaskStatus, Template, ValidationError,
};

// ========== 假远程客户端 ==========

#[derive(Clone, Default)]
struct MockApi {
    inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    /// request_id → 剩余的提交失败次数
    submit_failures: Mutex<HashMap<String, u32>>,
    /// task_id → 剩余的查询瞬时错误次数
    query_glitches: Mutex<HashMap<String, u32>>,
    /// task_id → 预设的状态响应（未预设时返回仍在处理中）
    statuses: Mutex<HashMap<String, StatusResponse>>,
    submit_calls: AtomicUsize,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
}

impl MockApi {
    fn fail_submit(&self, request_id: &str, times: u32) {
        self.inner
            .submit_failures
            .lock()
            .unwrap()
            .insert(request_id.to_string(), times);
    }

    fn glitch_query(&self, task_id: &str, times: u32) {
        self.inner
            .query_glitches
            .lock()
            .unwrap()
            .insert(task_id.to_string(), times);
    }

    fn set_status(&self, task_id: &str, status: StatusResponse) {
        self.inner
            .statuses
            .lock()
            .unwrap()
            .insert(task_id.to_string(), status);
    }

    fn submit_calls(&self) -> usize {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }

    fn max_inflight(&self) -> usize {
        self.inner.max_inflight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceApi for MockApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        self.inner.submit_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.inner.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_inflight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.inflight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = {
            let mut failures = self.inner.submit_failures.lock().unwrap();
            match failures.get_mut(&request.request_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            anyhow::bail!("模拟网络错误");
        }

        Ok(SubmitResponse {
            task_id: format!("remote-{}", request.request_id),
        })
    }

    async fn query(&self, task_id: &str) -> Result<StatusResponse> {
        let should_glitch = {
            let mut glitches = self.inner.query_glitches.lock().unwrap();
            match glitches.get_mut(task_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_glitch {
            anyhow::bail!("模拟查询超时");
        }

        let preset = self.inner.statuses.lock().unwrap().get(task_id).cloned();
        Ok(preset.unwrap_or_else(|| StatusResponse {
            task_status: "PROCESSING".to_string(),
            ..Default::default()
        }))
    }
}

fn success_status(content: &str, tokens: u64) -> StatusResponse {
    StatusResponse {
        task_status: "SUCCESS".to_string(),
        choices: vec![Choice {
            message: ChoiceMessage {
                content: Some(content.to_string()),
            },
        }],
        usage: Some(UsagePayload {
            total_tokens: tokens,
        }),
        error: None,
    }
}

fn fail_status(message: &str) -> StatusResponse {
    StatusResponse {
        task_status: "FAIL".to_string(),
        choices: vec![],
        usage: None,
        error: Some(RemoteError {
            message: message.to_string(),
        }),
    }
}

// ========== 测试辅助 ==========

fn test_config(dir: &Path) -> Config {
    Config {
        window_size: 5,
        max_retries: 2,
        retry_backoff_ms: 5,
        poll_interval_ms: 20,
        snapshot_path: dir.join("state.json").to_string_lossy().into_owned(),
        ..Config::default()
    }
}

fn summary_template() -> NewTemplate {
    NewTemplate {
        name: "摘要".to_string(),
        system_prompt: "你是一个摘要助手".to_string(),
        user_prompt_template: "请总结：{input}".to_string(),
        model: "glm-4".to_string(),
        temperature: 0.3,
    }
}

/// 建好 n 条输入 + 一个模板 + 覆盖全部输入的请求矩阵
async fn seed(
    orchestrator: &Orchestrator<MockApi, FileStore>,
    input_count: usize,
) -> batch_infer::Template {
    for i in 1..=input_count {
        orchestrator
            .add_input(&format!("输入文本 {}", i))
            .await
            .unwrap();
    }
    let template = orchestrator.add_template(summary_template()).await.unwrap();
    orchestrator
        .build_requests(&template.id, &format!("1-{}", input_count))
        .await
        .unwrap();
    template
}

// ========== 请求矩阵 ==========

#[tokio::test]
async fn test_build_requests_matrix_and_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, MockApi::default(), store);

    for i in 1..=3 {
        orchestrator.add_input(&format!("文本 {}", i)).await.unwrap();
    }
    let template = orchestrator.add_template(summary_template()).await.unwrap();

    let outcome = orchestrator.build_requests(&template.id, "1-2").await.unwrap();
    assert_eq!(outcome.requested, 2);
    assert_eq!(outcome.added, 2);

    let requests = orchestrator.requests().await;
    let inputs = orchestrator.inputs().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].input_id, inputs[0].id);
    assert_eq!(requests[1].input_id, inputs[1].id);

    // 相同 (范围, 模板) 再构建一次不会产生重复请求
    let again = orchestrator.build_requests(&template.id, "1-2").await.unwrap();
    assert_eq!(again.requested, 2);
    assert_eq!(again.added, 0);
    assert_eq!(orchestrator.requests().await.len(), 2);
}

#[tokio::test]
async fn test_build_requests_rejects_empty_match() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, MockApi::default(), store);

    orchestrator.add_input("唯一的输入").await.unwrap();
    let template = orchestrator.add_template(summary_template()).await.unwrap();

    // 非法段与倒序区间全部被丢弃，结果集为空
    let err = orchestrator
        .build_requests(&template.id, "abc,9-5")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ValidationError>(),
        Some(ValidationError::EmptyRangeMatch { .. })
    ));
    assert!(orchestrator.requests().await.is_empty());
}

// ========== 提交管线 ==========

#[tokio::test]
async fn test_submit_retries_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let api = MockApi::default();
    api.fail_submit("req-1", 2);
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, mut rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 1).await;
    let outcome = orchestrator.submit_all().await.unwrap();
    assert_eq!(outcome.submitted, 1);
    assert_eq!(outcome.failed, 0);

    let task = orchestrator.task("req-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.remote_task_id.as_deref(), Some("remote-req-1"));

    // 每次尝试都有行级状态事件
    let mut labels = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::RowStatus { label, .. } = event {
            labels.push(label);
        }
    }
    assert!(labels.iter().any(|l| l.contains("提交中 (尝试 2/3)")));

    orchestrator.stop_polling().await;
}

#[tokio::test]
async fn test_submit_exhausts_retries_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let api = MockApi::default();
    api.fail_submit("req-1", 99);
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 1).await;
    let outcome = orchestrator.submit_all().await.unwrap();
    assert_eq!(outcome.submitted, 0);
    assert_eq!(outcome.failed, 1);

    let task = orchestrator.task("req-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.result.unwrap().contains("提交失败"));
    // 总尝试次数 = max_retries + 1
    assert_eq!(api.submit_calls(), 3);

    orchestrator.join_polling().await;
    let counts = orchestrator.counts().await;
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.completed + counts.failed + counts.in_flight(), counts.total);
}

#[tokio::test]
async fn test_window_bounds_inflight_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        window_size: 2,
        ..test_config(dir.path())
    };
    let api = MockApi::default();
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 5).await;
    let outcome = orchestrator.submit_all().await.unwrap();
    assert_eq!(outcome.submitted, 5);

    // 任意时刻在途提交数不超过窗口大小
    assert!(api.max_inflight() <= 2, "在途峰值 {}", api.max_inflight());

    orchestrator.stop_polling().await;
}

// ========== 轮询引擎 ==========

#[tokio::test]
async fn test_polling_completes_all_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let api = MockApi::default();
    api.set_status("remote-req-1", success_status("这是摘要", 42));
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, mut rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 1).await;
    orchestrator.submit_all().await.unwrap();
    orchestrator.join_polling().await;

    let task = orchestrator.task("req-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some("这是摘要"));
    assert_eq!(task.usage.unwrap().total_tokens, 42);

    let counts = orchestrator.counts().await;
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.total, 1);

    // 全部完成后轮询自动结束并上报最终统计
    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        if let Event::PollingFinished {
            completed,
            failed,
            total,
        } = event
        {
            finished = Some((completed, failed, total));
        }
    }
    assert_eq!(finished, Some((1, 0, 1)));
}

#[tokio::test]
async fn test_polling_remote_failure_and_transient_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let api = MockApi::default();
    api.set_status("remote-req-1", fail_status("配额不足"));
    api.set_status("remote-req-2", success_status("第二条结果", 7));
    // 第二个任务的第一次查询是瞬时网络错误，不应计为任务失败
    api.glitch_query("remote-req-2", 1);
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 2).await;
    orchestrator.submit_all().await.unwrap();
    orchestrator.join_polling().await;

    let failed = orchestrator.task("req-1").await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.result.as_deref(), Some("配额不足"));
    assert_eq!(failed.retry_count, 0);

    let completed = orchestrator.task("req-2").await.unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.result.as_deref(), Some("第二条结果"));
    assert_eq!(completed.retry_count, 0);

    let counts = orchestrator.counts().await;
    assert_eq!((counts.completed, counts.failed, counts.total), (1, 1, 2));
}

// ========== 持久化与恢复 ==========

#[tokio::test]
async fn test_recover_restores_state_and_never_resubmits() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    // 第一个会话：提交并全部完成
    let api1 = MockApi::default();
    api1.set_status("remote-req-1", success_status("结果一", 1));
    api1.set_status("remote-req-2", success_status("结果二", 2));
    let (first, _rx1) = Orchestrator::new(
        config.clone(),
        api1.clone(),
        FileStore::new(config.snapshot_path.clone()),
    );
    seed(&first, 2).await;
    first.submit_all().await.unwrap();
    first.join_polling().await;

    // 第二个会话：从同一快照恢复
    let api2 = MockApi::default();
    let (second, _rx2) = Orchestrator::new(
        config.clone(),
        api2.clone(),
        FileStore::new(config.snapshot_path.clone()),
    );
    let report = second.recover().await.unwrap().unwrap();
    assert_eq!(report.requests, 2);
    assert_eq!(report.pollable, 0);

    // 连续恢复两次结果一致
    let report_again = second.recover().await.unwrap().unwrap();
    assert_eq!(report_again.requests, report.requests);
    assert_eq!(report_again.tasks, report.tasks);
    assert_eq!(second.counts().await, first.counts().await);

    // 远程任务 id 原样保留
    for local_id in ["req-1", "req-2"] {
        assert_eq!(
            second.task(local_id).await.unwrap().remote_task_id,
            first.task(local_id).await.unwrap().remote_task_id,
        );
    }

    // 已提交的任务不会重新提交
    second.submit_all().await.unwrap();
    assert_eq!(api2.submit_calls(), 0);
}

#[tokio::test]
async fn test_recover_resumes_polling_of_inflight_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    // 第一个会话提交后任务仍在处理中（模拟页面刷新时中断）
    let api1 = MockApi::default();
    let (first, _rx1) = Orchestrator::new(
        config.clone(),
        api1.clone(),
        FileStore::new(config.snapshot_path.clone()),
    );
    seed(&first, 2).await;
    first.submit_all().await.unwrap();
    first.stop_polling().await;

    // 恢复后自动继续轮询直到终态，且不重新提交
    let api2 = MockApi::default();
    api2.set_status("remote-req-1", success_status("结果一", 1));
    api2.set_status("remote-req-2", success_status("结果二", 2));
    let (second, _rx2) = Orchestrator::new(
        config.clone(),
        api2.clone(),
        FileStore::new(config.snapshot_path.clone()),
    );
    let report = second.recover().await.unwrap().unwrap();
    assert_eq!(report.pollable, 2);

    second.join_polling().await;
    assert_eq!(api2.submit_calls(), 0);
    let counts = second.counts().await;
    assert_eq!((counts.completed, counts.failed), (2, 0));
}

#[tokio::test]
async fn test_recover_resubmits_retrying_task_without_remote_id() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    // 快照捕获在退避等待期间：任务处于重试中、尚无远程任务 id
    let mut tasks = HashMap::new();
    tasks.insert(
        "req-1".to_string(),
        Task {
            status: TaskStatus::Retrying,
            remote_task_id: None,
            result: None,
            usage: None,
            retry_count: 1,
        },
    );
    let snapshot = Snapshot {
        requests: vec![Request {
            local_id: "req-1".to_string(),
            input_id: "input-1".to_string(),
            template_id: "tpl-1".to_string(),
        }],
        tasks,
        inputs: vec![Input {
            id: "input-1".to_string(),
            content: "输入文本".to_string(),
        }],
        templates: vec![Template {
            id: "tpl-1".to_string(),
            name: "摘要".to_string(),
            system_prompt: "你是一个摘要助手".to_string(),
            user_prompt_template: "请总结：{input}".to_string(),
            model: "glm-4".to_string(),
            temperature: 0.3,
        }],
        timestamp: "2026-08-25T12:00:00+08:00".to_string(),
    };
    FileStore::new(config.snapshot_path.clone())
        .save(&snapshot)
        .await
        .unwrap();

    let api = MockApi::default();
    api.set_status("remote-req-1", success_status("恢复后的结果", 9));
    let (orchestrator, _rx) = Orchestrator::new(
        config.clone(),
        api.clone(),
        FileStore::new(config.snapshot_path.clone()),
    );

    // 无远程 id 的任务不可轮询，必须重新进入提交管线
    let report = orchestrator.recover().await.unwrap().unwrap();
    assert_eq!(report.pollable, 0);

    let outcome = orchestrator.submit_all().await.unwrap();
    assert_eq!(outcome.submitted, 1);
    assert_eq!(api.submit_calls(), 1);

    orchestrator.join_polling().await;
    let task = orchestrator.task("req-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some("恢复后的结果"));
}

#[tokio::test]
async fn test_restart_polling_cancels_previous_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let api = MockApi::default();
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, mut rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 1).await;
    // submit_all 已启动轮询；此时任务仍在处理中
    orchestrator.submit_all().await.unwrap();

    // 再次启动会取消旧循环，不会出现两个并行的轮询
    orchestrator.start_polling().await;
    api.set_status("remote-req-1", success_status("重启后的结果", 5));
    orchestrator.join_polling().await;

    let task = orchestrator.task("req-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    // 只有一个循环在推进：终态转移一次、最终统计上报一次
    let mut finished = 0;
    let mut completed_rows = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::PollingFinished { .. } => finished += 1,
            Event::RowStatus { label, .. } if label == "已完成" => completed_rows += 1,
            _ => {}
        }
    }
    assert_eq!(finished, 1);
    assert_eq!(completed_rows, 1);

    // 循环已结束，重复停止是无操作
    orchestrator.stop_polling().await;
    orchestrator.stop_polling().await;
    assert_eq!(orchestrator.counts().await.completed, 1);
}

// ========== 删除与级联 ==========

#[tokio::test]
async fn test_delete_input_cascades_to_requests() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, MockApi::default(), store);

    let template = seed(&orchestrator, 2).await;
    assert_eq!(orchestrator.requests().await.len(), 2);

    let inputs = orchestrator.inputs().await;
    orchestrator.delete_input(&inputs[0].id).await.unwrap();
    assert_eq!(orchestrator.requests().await.len(), 1);
    assert!(orchestrator.task("req-1").await.is_none());

    orchestrator.delete_template(&template.id).await.unwrap();
    assert!(orchestrator.requests().await.is_empty());
}

// ========== 结果导出 ==========

#[tokio::test]
async fn test_export_rows_ordered_by_input_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, MockApi::default(), store);

    for i in 1..=3 {
        orchestrator.add_input(&format!("文本 {}", i)).await.unwrap();
    }
    let template = orchestrator.add_template(summary_template()).await.unwrap();
    // 先调度第 3 条，再调度第 1 条：导出仍按输入顺序排列
    orchestrator.build_requests(&template.id, "3").await.unwrap();
    orchestrator.build_requests(&template.id, "1").await.unwrap();

    let rows = orchestrator.export_rows().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].input_text, "文本 1");
    assert_eq!(rows[1].input_text, "文本 3");
    assert_eq!(rows[0].status, "排队中");
    assert_eq!(rows[0].tokens_used, "-");
    assert_eq!(rows[0].result, "[排队中]");
    assert_eq!(rows[0].template_name, "摘要");

    let csv = orchestrator.export_csv().await;
    assert!(csv.contains("RequestID,InputText,TemplateName,Status,TokensUsed,Result"));
}

#[tokio::test]
async fn test_export_after_completion_contains_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let api = MockApi::default();
    api.set_status("remote-req-1", success_status("摘要结果", 13));
    let store = FileStore::new(config.snapshot_path.clone());
    let (orchestrator, _rx) = Orchestrator::new(config, api.clone(), store);

    seed(&orchestrator, 1).await;
    orchestrator.submit_all().await.unwrap();
    orchestrator.join_polling().await;

    let rows = orchestrator.export_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "已完成");
    assert_eq!(rows[0].tokens_used, "13");
    assert_eq!(rows[0].result, "摘要结果");
}
