//! Modules shipped with rowcloud, all backed by the sandbox provider

pub mod dns;
pub mod network;

use converge::{Context, ModuleRegistry};
use rowstore::Store;
use sandbox::Sandbox;
use std::sync::Arc;

/// Version of every bundled module
pub const VERSION: &str = "0.1.0";

/// Context key under which modules contribute the provider handle
pub const SANDBOX: &str = "sandbox";

/// Registry of every bundled module
pub fn registry(cloud: &Arc<Sandbox>) -> converge::Result<ModuleRegistry<Store>> {
    let mut registry = ModuleRegistry::new(VERSION);
    registry.register(network::module(cloud))?;
    registry.register(dns::module(cloud))?;
    Ok(registry)
}

fn provider(ctx: &Context<Store>) -> anyhow::Result<Arc<Sandbox>> {
    ctx.require_extension::<Sandbox>(SANDBOX)
}

/// Split a newline-joined column back into values
fn split_lines(joined: &str) -> Vec<String> {
    joined
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use converge::{ConvergeOptions, Reconciler};
    use rowstore::Store;
    use sandbox::Sandbox;
    use std::sync::Arc;

    pub struct Harness {
        pub store: Store,
        pub cloud: Arc<Sandbox>,
        pub reconciler: Reconciler<Store>,
    }

    pub async fn installed(modules: &[&str]) -> Harness {
        let store = Store::open_in_memory().unwrap();
        let cloud = Arc::new(Sandbox::in_memory());
        let registry = super::registry(&cloud).unwrap();
        let reconciler = Reconciler::new(registry, store.clone()).with_options(ConvergeOptions {
            jobs: 4,
            ..Default::default()
        });
        let names: Vec<String> = modules.iter().map(ToString::to_string).collect();
        reconciler.install(&names, false).await.unwrap();
        Harness {
            store,
            cloud,
            reconciler,
        }
    }

    impl Harness {
        pub fn exec(&self, sql: &str) {
            self.store.execute_batch(sql).unwrap();
        }

        /// First column of every row, as strings
        pub fn column(&self, sql: &str) -> Vec<String> {
            self.store
                .query(sql)
                .unwrap()
                .rows
                .into_iter()
                .map(|row| match &row[0] {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contents() {
        let registry = registry(&Arc::new(Sandbox::in_memory())).unwrap();
        let names: Vec<String> = registry.modules().iter().map(|m| m.qualified_name()).collect();
        assert_eq!(names, vec!["sandbox_network@0.1.0", "sandbox_dns@0.1.0"]);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\n b \n\n"), vec!["a", "b"]);
        assert!(split_lines("").is_empty());
    }
}
