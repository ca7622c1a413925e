//! Module ordering
//!
//! Produces a root-to-leaf install order from declared dependencies. Reverse
//! the result for uninstalls.

use crate::error::{Error, Result};
use std::collections::HashSet;

/// Something that can be placed in a dependency order
pub trait ModuleNode {
    /// Qualified `name@version`
    fn qualified_name(&self) -> String;
    /// Qualified names this node requires
    fn dependencies(&self) -> &[String];
}

/// Order `to_install` so every module comes after the modules it depends on
///
/// Dependencies found in `already_installed` count as satisfied. Ties are
/// broken by input order, so the same input always yields the same order.
pub fn sort_modules<T>(to_install: &[T], already_installed: &[String]) -> Result<Vec<T>>
where
    T: ModuleNode + Clone,
{
    let names: Vec<String> = to_install.iter().map(ModuleNode::qualified_name).collect();

    let mut requested: HashSet<&str> = HashSet::with_capacity(names.len());
    for name in &names {
        if !requested.insert(name.as_str()) {
            return Err(Error::DuplicateModule(name.clone()));
        }
    }
    let installed: HashSet<&str> = already_installed.iter().map(String::as_str).collect();

    let mut waiting_on: Vec<HashSet<&str>> = Vec::with_capacity(to_install.len());
    for (module, name) in to_install.iter().zip(&names) {
        let mut deps = HashSet::new();
        for dep in module.dependencies() {
            if requested.contains(dep.as_str()) {
                deps.insert(dep.as_str());
            } else if !installed.contains(dep.as_str()) {
                return Err(Error::MissingDependency {
                    module: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        waiting_on.push(deps);
    }

    let mut placed = vec![false; to_install.len()];
    let mut order: Vec<usize> = Vec::with_capacity(to_install.len());

    while order.len() < to_install.len() {
        let ready: Vec<usize> = waiting_on
            .iter()
            .zip(&placed)
            .enumerate()
            .filter(|(_, (deps, done))| !**done && deps.is_empty())
            .map(|(index, _)| index)
            .collect();

        if ready.is_empty() {
            let modules = names
                .iter()
                .zip(&placed)
                .filter(|(_, done)| !**done)
                .map(|(name, _)| name.clone())
                .collect();
            return Err(Error::DependencyCycle { modules });
        }

        for &index in &ready {
            placed[index] = true;
            order.push(index);
        }
        let landed: HashSet<&str> = ready.iter().map(|&i| names[i].as_str()).collect();
        for deps in &mut waiting_on {
            deps.retain(|dep| !landed.contains(dep));
        }
    }

    Ok(order.into_iter().map(|i| to_install[i].clone()).collect())
}

/// Reverse a root-to-leaf order for teardown
pub fn leaf_to_root<T>(mut order: Vec<T>) -> Vec<T> {
    order.reverse();
    order
}
