use crate::model::DependResult;
use crate::model::dependent::DependentRelation;

/// Combines results under a relation.
///
/// AND: any FAILED wins, then any WAITING, otherwise SUCCESS.
/// OR: any SUCCESS wins, then any WAITING, otherwise FAILED.
/// An empty list is SUCCESS.
pub fn reduce(relation: DependentRelation, results: &[DependResult]) -> DependResult {
    if results.is_empty() {
        return DependResult::Success;
    }
    let has = |r: DependResult| results.contains(&r);
    match relation {
        DependentRelation::And => {
            if has(DependResult::Failed) {
                DependResult::Failed
            } else if has(DependResult::Waiting) {
                DependResult::Waiting
            } else {
                DependResult::Success
            }
        }
        DependentRelation::Or => {
            if has(DependResult::Success) {
                DependResult::Success
            } else if has(DependResult::Waiting) {
                DependResult::Waiting
            } else {
                DependResult::Failed
            }
        }
    }
}

/// True when `result` decides the relation regardless of the remaining entries.
pub fn short_circuits(relation: DependentRelation, result: DependResult) -> bool {
    match relation {
        DependentRelation::And => result == DependResult::Failed,
        DependentRelation::Or => result == DependResult::Success,
    }
}
