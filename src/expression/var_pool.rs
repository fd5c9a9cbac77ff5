use std::collections::HashMap;

use crate::model::{Direct, Property, TaskInstance};

/// Merges `incoming` into `target` by name: existing names are overwritten in place, new
/// names are appended. Names stay unique.
pub fn merge(target: &mut Vec<Property>, incoming: &[Property]) {
    for property in incoming {
        match target.iter_mut().find(|p| p.prop == property.prop) {
            Some(existing) => *existing = property.clone(),
            None => target.push(property.clone()),
        }
    }
}

/// OUT properties of a var pool.
pub fn outputs(var_pool: &[Property]) -> Vec<Property> {
    var_pool
        .iter()
        .filter(|p| p.direct == Direct::Out)
        .cloned()
        .collect()
}

/// Collects the OUT variables of the end tasks of a finished workflow.
///
/// When two end tasks publish the same name the one that finished later wins.
pub fn merge_end_node_var_pools(end_tasks: &[TaskInstance]) -> Vec<Property> {
    let mut ordered: Vec<&TaskInstance> = end_tasks.iter().collect();
    ordered.sort_by_key(|t| t.end_time);

    let mut merged = Vec::new();
    for task in ordered {
        merge(&mut merged, &outputs(&task.var_pool));
    }
    merged
}

/// Parameters visible to expressions: global params overlaid by the var pool.
pub fn param_map(global_params: &[Property], var_pool: &[Property]) -> HashMap<String, Property> {
    let mut params: HashMap<String, Property> = global_params
        .iter()
        .map(|p| (p.prop.clone(), p.clone()))
        .collect();
    for p in var_pool {
        params.insert(p.prop.clone(), p.clone());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;
    use chrono::NaiveDate;

    #[test]
    fn merge_overwrites_and_appends() {
        let mut pool = vec![Property::output("a", "1"), Property::output("b", "2")];
        merge(&mut pool, &[Property::output("b", "20"), Property::output("c", "3")]);
        let names: Vec<_> = pool.iter().map(|p| p.prop.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(pool[1].value, "20");
    }

    #[test]
    fn later_end_task_wins() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut early = TaskInstance::new(1, 10, TaskType::from("SHELL"), 1);
        early.end_time = day.and_hms_opt(1, 0, 0);
        early.var_pool = vec![Property::output("x", "early"), Property::new("in_only", Direct::In, "v")];
        let mut late = TaskInstance::new(2, 11, TaskType::from("SHELL"), 1);
        late.end_time = day.and_hms_opt(2, 0, 0);
        late.var_pool = vec![Property::output("x", "late")];

        let merged = merge_end_node_var_pools(&[late, early]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].value, "late");
    }

    #[test]
    fn var_pool_overrides_global() {
        let params = param_map(
            &[Property::new("x", Direct::In, "1")],
            &[Property::output("x", "2")],
        );
        assert_eq!(params["x"].value, "2");
    }
}
