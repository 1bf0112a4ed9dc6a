//! Transitive dependency checking

use std::collections::HashSet;

use crate::error::{Reporter, ReturnCode};
use crate::registry::{DependencyState, Registry};
use crate::version;

/// Re-derive the failure reason for a record already marked unsatisfied by
/// scanning its declared dependencies against the current registry: an
/// absent dependency reports not-found, a present-but-incompatible one
/// reports bad-version.
fn unsatisfied_reason(registry: &Registry, name: &str) -> ReturnCode {
    let Some(record) = registry.get(name) else {
        return ReturnCode::UnknownError;
    };
    for dep in &record.metadata.dependencies {
        match registry.get(&dep.name) {
            None => return ReturnCode::LoadDependencyNotFound,
            Some(found) => {
                if !version::compatible(&found.metadata.version, &dep.version) {
                    return ReturnCode::LoadDependencyBadVersion;
                }
            }
        }
    }
    ReturnCode::LoadDependencyNotFound
}

/// Check that every dependency declared by `name` transitively exists at a
/// compatible version, memoised through the record's tri-state flag.
///
/// Direct failures mark the record unsatisfied and emit one incident with
/// the record's path. A record whose direct dependencies pass but whose
/// transitive check fails is left `Unknown`; revisits re-detect through the
/// recursion. Re-entering a record already on the recursion stack returns
/// success - cycles are the sort phase's to report.
pub(crate) fn check(
    registry: &mut Registry,
    name: &str,
    visiting: &mut HashSet<String>,
    reporter: &mut Reporter<'_>,
) -> ReturnCode {
    let Some(record) = registry.get(name) else {
        return ReturnCode::LoadDependencyNotFound;
    };
    match record.dependencies {
        DependencyState::Satisfied => return ReturnCode::Success,
        DependencyState::Unsatisfied => return unsatisfied_reason(registry, name),
        DependencyState::Unknown => {}
    }
    if !visiting.insert(name.to_string()) {
        return ReturnCode::Success;
    }

    let path = record.path.clone();
    let declared = record.metadata.dependencies.clone();

    let mut outcome = ReturnCode::Success;
    for dep in &declared {
        let direct = match registry.get(&dep.name) {
            None => ReturnCode::LoadDependencyNotFound,
            Some(found) if !version::compatible(&found.metadata.version, &dep.version) => {
                ReturnCode::LoadDependencyBadVersion
            }
            Some(_) => ReturnCode::Success,
        };

        if !direct.is_success() {
            if let Some(record) = registry.get_mut(name) {
                record.dependencies = DependencyState::Unsatisfied;
            }
            reporter.emit(direct, &path.display().to_string());
            outcome = direct;
            break;
        }

        let transitive = check(registry, &dep.name, visiting, reporter);
        if !transitive.is_success() {
            outcome = transitive;
            break;
        }
    }

    visiting.remove(name);
    if outcome.is_success() {
        if let Some(record) = registry.get_mut(name) {
            record.dependencies = DependencyState::Satisfied;
        }
    }
    outcome
}
