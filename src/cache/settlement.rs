//! Post-mutation invalidation.

use color_eyre::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::layer::QueryClient;

/// How a settled mutation waits for invalidated queries to be refetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
  /// Refetch before the mutation call returns
  #[default]
  Awaited,
  /// Refetch in the background; the mutation returns right away
  FireAndForget,
}

/// Invalidation targets of one settled mutation.
///
/// Targets are entity-type scoped prefixes, so unrelated reads of the same
/// entity type are refreshed too.
#[derive(Debug, Clone)]
pub struct Settlement {
  targets: Vec<QueryKey>,
  policy: InvalidationPolicy,
}

impl Settlement {
  pub fn new(policy: InvalidationPolicy) -> Self {
    Self {
      targets: Vec::new(),
      policy,
    }
  }

  pub fn target(mut self, key: QueryKey) -> Self {
    if !self.targets.contains(&key) {
      self.targets.push(key);
    }
    self
  }

  pub fn targets(&self) -> &[QueryKey] {
    &self.targets
  }

  /// Mark every target invalid, then refetch according to the policy.
  pub async fn reconcile(self, client: &QueryClient) -> Result<()> {
    for target in &self.targets {
      client.invalidate_queries(target)?;
    }

    match self.policy {
      InvalidationPolicy::Awaited => {
        for target in &self.targets {
          client.refetch_queries(target).await?;
        }
      }
      InvalidationPolicy::FireAndForget => {
        let background = client.clone();
        let targets = self.targets;
        client.spawn_task(async move {
          for target in &targets {
            if let Err(e) = background.refetch_queries(target).await {
              warn!(target = %target, error = %e, "background refetch after mutation failed");
            }
          }
        })?;
        debug!("settlement refetch running in background");
      }
    }
    Ok(())
  }
}
