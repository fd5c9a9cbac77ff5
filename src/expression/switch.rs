use anyhow::{Result, anyhow};
use evalexpr::{build_operator_tree, DefaultNumericTypes, HashMapContext};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::expression::placeholder::substitute;
use crate::model::Property;
use crate::model::params::SwitchResultVo;

/// Evaluates a boolean expression that has no free variables left.
pub fn evaluate_condition(content: &str) -> Result<bool> {
    let tree = build_operator_tree::<DefaultNumericTypes>(content)
        .map_err(|e| anyhow!("Invalid condition '{}': {}", content, e))?;
    let ctx = HashMapContext::<DefaultNumericTypes>::new();
    tree.eval_boolean_with_context(&ctx)
        .map_err(|e| anyhow!("Condition '{}' is not boolean: {}", content, e))
}

/// Picks the first branch whose condition holds.
///
/// An empty condition matches unconditionally. Returns `Ok(None)` when no branch matched and
/// an error as soon as one condition cannot be evaluated.
pub fn choose_branch(
    branches: &[SwitchResultVo],
    params: &HashMap<String, Property>,
) -> Result<Option<usize>> {
    for (i, branch) in branches.iter().enumerate() {
        if branch.condition.trim().is_empty() {
            debug!(branch = i, "empty condition, taking default branch");
            return Ok(Some(i));
        }
        let content = substitute(&branch.condition.replace('\'', "\""), params);
        match evaluate_condition(&content) {
            Ok(true) => {
                debug!(branch = i, condition = %content, "switch condition matched");
                return Ok(Some(i));
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(branch = i, condition = %content, error = %e, "switch condition failed");
                return Err(e);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direct;

    #[test]
    fn evaluates_comparisons() {
        assert!(evaluate_condition("3 > 0").unwrap());
        assert!(!evaluate_condition("3 > 5").unwrap());
        assert!(evaluate_condition("\"a\" == \"a\" && 2 >= 2").unwrap());
    }

    #[test]
    fn non_boolean_is_error() {
        assert!(evaluate_condition("1 + 2").is_err());
    }

    #[test]
    fn single_quotes_are_accepted() {
        let mut params = HashMap::new();
        params.insert("env".to_string(), Property::new("env", Direct::In, "prod"));
        let branches = vec![SwitchResultVo::new("${env} == 'prod'", 7)];
        assert_eq!(choose_branch(&branches, &params).unwrap(), Some(0));
    }
}
