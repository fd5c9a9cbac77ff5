mod common;

use chrono::{NaiveDate, NaiveDateTime};
use common::{MasterHarness, logic_task};
use dagflow::dependency::DependencyEvaluator;
use dagflow::error::is_definition_error;
use dagflow::master::TaskAction;
use dagflow::model::dependent::{
    DependTarget, DependentItem, DependentParameters, DependentRelation, DependentTaskModel,
};
use dagflow::model::{
    DependResult, ProcessDefinitionRef, ProcessInstance, TaskExecutionStatus, TaskInstance,
    TaskType, TriggerType, WorkflowExecutionStatus,
};
use dagflow::service::alert::AlertKind;
use dagflow::service::memory::InMemoryProcessService;
use serde_json::json;

const UPSTREAM: i64 = 500;
const OTHER_UPSTREAM: i64 = 501;

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .expect("valid date")
        .and_hms_opt(hour, 0, 0)
        .expect("valid time")
}

fn business_date() -> NaiveDateTime {
    at(5, 10)
}

fn scheduled_run(id: i64, definition_code: i64, state: WorkflowExecutionStatus, day: u32) -> ProcessInstance {
    let mut process = ProcessInstance::new(id, definition_code, 1);
    process.trigger = TriggerType::Scheduler;
    process.state = state;
    process.schedule_time = Some(at(day, 1));
    process.start_time = Some(at(day, 1));
    if state.is_finished() {
        process.end_time = Some(at(day, 2));
    }
    process
}

fn item(definition_code: i64, target: DependTarget) -> DependentItem {
    DependentItem {
        project_code: 1,
        definition_code,
        dep_task_code: target,
        cycle: "day".to_string(),
        date_value: "today".to_string(),
        status: None,
    }
}

fn tree(relation: DependentRelation, items: Vec<DependentItem>) -> DependentParameters {
    DependentParameters {
        relation: DependentRelation::And,
        depend_task_list: vec![DependentTaskModel {
            relation,
            depend_item_list: items,
        }],
    }
}

async fn evaluate(evaluator: &mut DependencyEvaluator, store: &InMemoryProcessService) -> DependResult {
    evaluator
        .evaluate(store, business_date(), false)
        .await
        .expect("evaluation failed")
}

#[tokio::test]
async fn test_successful_run_today_satisfies_item() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Success, 5));

    let mut evaluator =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::AllTasks)]));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Success);
}

#[tokio::test]
async fn test_missing_run_waits() {
    let store = InMemoryProcessService::new();
    // yesterday's run does not count for "today"
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Success, 4));

    let mut evaluator =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::AllTasks)]));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Waiting);
}

#[tokio::test]
async fn test_running_upstream_waits() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::RunningExecution, 5));

    let mut evaluator =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::AllTasks)]));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Waiting);
}

#[tokio::test]
async fn test_and_fails_on_any_failure_even_while_others_wait() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Failure, 5));

    // the waiting item comes first, the failure still decides
    let mut evaluator = DependencyEvaluator::new(tree(
        DependentRelation::And,
        vec![
            item(OTHER_UPSTREAM, DependTarget::AllTasks),
            item(UPSTREAM, DependTarget::AllTasks),
        ],
    ));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Failed);
}

#[tokio::test]
async fn test_or_succeeds_on_any_success() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Failure, 5));
    store.insert_process(scheduled_run(51, OTHER_UPSTREAM, WorkflowExecutionStatus::Success, 5));

    let mut evaluator = DependencyEvaluator::new(tree(
        DependentRelation::Or,
        vec![
            item(UPSTREAM, DependTarget::AllTasks),
            item(OTHER_UPSTREAM, DependTarget::AllTasks),
        ],
    ));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Success);
}

#[tokio::test]
async fn test_or_waits_while_nothing_succeeded() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Failure, 5));

    let mut evaluator = DependencyEvaluator::new(tree(
        DependentRelation::Or,
        vec![
            item(UPSTREAM, DependTarget::AllTasks),
            item(OTHER_UPSTREAM, DependTarget::AllTasks),
        ],
    ));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Waiting);
}

#[tokio::test]
async fn test_terminal_result_is_not_recomputed() {
    let store = InMemoryProcessService::new();
    let mut evaluator =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::AllTasks)]));

    // 1. Nothing yet
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Waiting);

    // 2. The run shows up and succeeds
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Success, 5));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Success);

    // 3. A later rerun fails, the decision stands
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Failure, 5));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Success);
    assert_eq!(evaluator.models()[0].item_results().len(), 1);
}

#[tokio::test]
async fn test_task_level_item() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Success, 5));
    let mut upstream_task = TaskInstance::new(70, 7, TaskType::from("SHELL"), 50);
    upstream_task.state = TaskExecutionStatus::Success;
    store.insert_task(upstream_task);

    let mut found =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::Task(7))]));
    assert_eq!(evaluate(&mut found, &store).await, DependResult::Success);

    // the run finished without ever creating task 8
    let mut missing =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::Task(8))]));
    assert_eq!(evaluate(&mut missing, &store).await, DependResult::Failed);
}

#[tokio::test]
async fn test_later_manual_run_wins_over_scheduled_one() {
    let store = InMemoryProcessService::new();
    store.insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Failure, 5));
    let mut rerun = ProcessInstance::new(51, UPSTREAM, 1);
    rerun.trigger = TriggerType::Manual;
    rerun.state = WorkflowExecutionStatus::Success;
    rerun.start_time = Some(at(5, 3));
    rerun.end_time = Some(at(5, 4));
    store.insert_process(rerun);

    let mut evaluator =
        DependencyEvaluator::new(tree(DependentRelation::And, vec![item(UPSTREAM, DependTarget::AllTasks)]));
    assert_eq!(evaluate(&mut evaluator, &store).await, DependResult::Success);
}

#[tokio::test]
async fn test_unknown_date_value_is_a_definition_error() {
    let store = InMemoryProcessService::new();
    let mut bad = item(UPSTREAM, DependTarget::AllTasks);
    bad.date_value = "yesterdayish".to_string();

    let mut evaluator = DependencyEvaluator::new(tree(DependentRelation::And, vec![bad]));
    let err = evaluator
        .evaluate(&store, business_date(), false)
        .await
        .expect_err("unsupported date value accepted");
    assert!(is_definition_error(&err));
}

fn dependent_params(definition_code: i64) -> serde_json::Value {
    json!({
        "dependence": {
            "relation": "AND",
            "dependTaskList": [{
                "relation": "AND",
                "dependItemList": [{
                    "projectCode": 1,
                    "definitionCode": definition_code,
                    "depTaskCode": 0,
                    "cycle": "day",
                    "dateValue": "today"
                }]
            }]
        }
    })
}

fn scheduled_harness() -> (MasterHarness, ProcessInstance) {
    let h = MasterHarness::new();
    let mut process = h.process(1);
    process.trigger = TriggerType::Scheduler;
    process.schedule_time = Some(business_date());
    h.store.insert_process(process.clone());
    h.store.insert_definition(ProcessDefinitionRef {
        code: UPSTREAM,
        project_code: 1,
        name: "upstream".to_string(),
        task_codes: vec![7],
        end_task_codes: vec![7],
    });
    (h, process)
}

#[tokio::test]
async fn test_dependent_task_waits_then_succeeds() {
    let (h, process) = scheduled_harness();

    // 1. Submit, nothing upstream yet
    let id = h
        .master
        .scheduler
        .submit(process, logic_task(40, 4, "DEPENDENT", 1, dependent_params(UPSTREAM)))
        .await
        .expect("submit failed");
    assert!(h.master.scheduler.action(id, TaskAction::Run).await);
    assert_eq!(
        h.master.scheduler.task_state(id).await,
        Some(TaskExecutionStatus::RunningExecution)
    );

    // 2. Upstream run lands
    h.store
        .insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Success, 5));
    assert!(h.master.scheduler.action(id, TaskAction::Run).await);

    // 3. Task finished
    assert_eq!(h.store.task(id).expect("task stored").state, TaskExecutionStatus::Success);
}

#[tokio::test]
async fn test_dependent_task_fails_with_upstream() {
    let (h, process) = scheduled_harness();
    h.store
        .insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Failure, 5));

    let id = h
        .master
        .scheduler
        .submit(process, logic_task(40, 4, "DEPENDENT", 1, dependent_params(UPSTREAM)))
        .await
        .expect("submit failed");
    assert!(h.master.scheduler.action(id, TaskAction::Run).await);
    assert_eq!(h.store.task(id).expect("task stored").state, TaskExecutionStatus::Failure);
}

#[tokio::test]
async fn test_dependent_on_unknown_workflow_fails_at_submit() {
    let (h, process) = scheduled_harness();

    let id = h
        .master
        .scheduler
        .submit(process, logic_task(40, 4, "DEPENDENT", 1, dependent_params(999)))
        .await
        .expect("submit failed");

    assert_eq!(h.store.task(id).expect("task stored").state, TaskExecutionStatus::Failure);
    assert_eq!(h.alerts.count(AlertKind::DefinitionError), 1);
}

#[tokio::test]
async fn test_paused_dependent_task_stops_waiting() {
    let (h, process) = scheduled_harness();

    // 1. Waiting on an upstream run that never came
    let id = h
        .master
        .scheduler
        .submit(process, logic_task(40, 4, "DEPENDENT", 1, dependent_params(UPSTREAM)))
        .await
        .expect("submit failed");
    assert!(h.master.scheduler.action(id, TaskAction::Run).await);

    // 2. Pause ends it; a second pause is a no-op
    assert!(h.master.scheduler.pause(id).await);
    assert!(h.master.scheduler.pause(id).await);
    assert_eq!(h.store.task(id).expect("task stored").state, TaskExecutionStatus::Pause);

    // 3. A late upstream success does not revive it
    h.store
        .insert_process(scheduled_run(50, UPSTREAM, WorkflowExecutionStatus::Success, 5));
    assert!(h.master.scheduler.action(id, TaskAction::Run).await);
    assert_eq!(h.store.task(id).expect("task stored").state, TaskExecutionStatus::Pause);
}
