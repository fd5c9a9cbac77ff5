use dagflow::expression::switch::choose_branch;
use dagflow::expression::var_pool::{merge, merge_end_node_var_pools, param_map};
use dagflow::model::params::SwitchResultVo;
use dagflow::model::{Direct, Property, TaskInstance, TaskType};
use chrono::NaiveDate;

fn branches() -> Vec<SwitchResultVo> {
    vec![
        SwitchResultVo::new("${x} > 5", 11),
        SwitchResultVo::new("${x} > 0", 12),
        SwitchResultVo::new("", 13),
    ]
}

fn globals(x: &str) -> Vec<Property> {
    vec![Property::new("x", Direct::In, x)]
}

#[test]
fn test_first_matching_branch_wins() {
    let params = param_map(&globals("3"), &[]);
    assert_eq!(choose_branch(&branches(), &params).expect("evaluation failed"), Some(1));

    let params = param_map(&globals("9"), &[]);
    assert_eq!(choose_branch(&branches(), &params).expect("evaluation failed"), Some(0));
}

#[test]
fn test_empty_condition_is_the_fallback() {
    let params = param_map(&globals("-1"), &[]);
    assert_eq!(choose_branch(&branches(), &params).expect("evaluation failed"), Some(2));
}

#[test]
fn test_no_branch_matches() {
    let params = param_map(&globals("-1"), &[]);
    let only_conditions = &branches()[..2];
    assert_eq!(choose_branch(only_conditions, &params).expect("evaluation failed"), None);
}

#[test]
fn test_upstream_var_pool_shadows_globals() {
    // 1. Upstream publishes x=3 over the global x=10
    let mut pool = Vec::new();
    merge(&mut pool, &[Property::output("x", "3")]);

    // 2. The switch sees the var pool value
    let params = param_map(&globals("10"), &pool);
    assert_eq!(choose_branch(&branches(), &params).expect("evaluation failed"), Some(1));
}

#[test]
fn test_string_comparison() {
    let params = param_map(&[Property::new("env", Direct::In, "prod")], &[]);
    let branches = vec![
        SwitchResultVo::new("${env} == \"dev\"", 21),
        SwitchResultVo::new("${env} == 'prod'", 22),
    ];
    assert_eq!(choose_branch(&branches, &params).expect("evaluation failed"), Some(1));
}

#[test]
fn test_unresolved_variable_is_an_error() {
    let params = param_map(&[], &[]);
    let branches = vec![SwitchResultVo::new("${missing} > 1", 31)];
    assert!(choose_branch(&branches, &params).is_err());
}

#[test]
fn test_end_task_outputs_feed_the_next_switch() {
    let day = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
    let mut first = TaskInstance::new(1, 10, TaskType::from("SHELL"), 1);
    first.end_time = day.and_hms_opt(8, 0, 0);
    first.var_pool = vec![Property::output("x", "1")];
    let mut second = TaskInstance::new(2, 11, TaskType::from("SHELL"), 1);
    second.end_time = day.and_hms_opt(9, 0, 0);
    second.var_pool = vec![Property::output("x", "7")];

    let merged = merge_end_node_var_pools(&[second, first]);
    let params = param_map(&globals("0"), &merged);
    assert_eq!(choose_branch(&branches(), &params).expect("evaluation failed"), Some(0));
}
