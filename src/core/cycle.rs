//! # Installation-time cycle detection.
//!
//! Before an installation commits, a depth-first search walks the
//! dependency graph in the *dependent* direction: starting from the new
//! controller's provided registrations, through each dependent, through
//! that dependent's own provided registrations, and so on. Re-encountering
//! the new controller means the installation would close a cycle; the
//! visit stack spells it out in dependency order.
//!
//! ## Rules
//! - Aggregation services (no provides) cannot be depended on and are
//!   pruned; a new aggregation controller is exempt entirely.
//! - Removed controllers are pruned: they no longer hold edges.
//! - Each registration is read-locked only while its dependents are
//!   examined.

use std::collections::HashSet;
use std::sync::Arc;

use crate::controller::ServiceController;
use crate::core::dependency::Dependent;
use crate::error::InstallError;
use crate::state::ServiceState;

/// Fails with [`InstallError::Cycle`] iff installing `instance` would
/// close a dependency cycle.
pub(crate) fn detect_cycle(instance: &Arc<ServiceController>) -> Result<(), InstallError> {
    if instance.provides.is_empty() {
        return Ok(());
    }
    let mut visited: HashSet<u64> = HashSet::new();
    let mut stack: Vec<Arc<ServiceController>> = vec![instance.clone()];
    for registration in &instance.provides {
        let guard = registration.lock_read();
        visit(&guard.dependents, instance, &mut visited, &mut stack)?;
    }
    Ok(())
}

fn visit(
    dependents: &[Arc<dyn Dependent>],
    instance: &Arc<ServiceController>,
    visited: &mut HashSet<u64>,
    stack: &mut Vec<Arc<ServiceController>>,
) -> Result<(), InstallError> {
    for dependent in dependents {
        let Some(controller) = dependent.dependent_controller() else {
            continue;
        };
        if Arc::ptr_eq(&controller, instance) {
            return Err(InstallError::Cycle {
                path: stack.iter().map(|c| c.display_name()).collect(),
            });
        }
        if visited.insert(controller.id()) {
            if controller.state() == ServiceState::Removed || controller.provides.is_empty() {
                continue;
            }
            stack.push(controller.clone());
            for registration in &controller.provides {
                if registration.provider().is_none() {
                    // concurrent removal
                    continue;
                }
                let guard = registration.lock_read();
                visit(&guard.dependents, instance, visited, stack)?;
            }
            stack.pop();
        }
    }
    Ok(())
}
