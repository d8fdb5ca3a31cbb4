//! Process-scoped registry deduplicating persistence stacks.

use super::config::{StoreConfiguration, StoreIdentity};
use super::stack::Stack;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry owning at most one stack per store identity.
///
/// Stacks are never removed. Hand one registry to every manager that should
/// share stores.
#[derive(Default)]
pub struct StoreRegistry {
    stacks: Mutex<Vec<Arc<Stack>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stack for the configured identity, creating and opening
    /// it on first request.
    ///
    /// Only the first configuration registered for an identity is kept; its
    /// error handler and boot flags apply to every later caller.
    pub fn get(&self, configuration: StoreConfiguration) -> Arc<Stack> {
        let (stack, created) = {
            let mut stacks = self.lock_stacks();
            match stacks
                .iter()
                .find(|stack| stack.identity() == configuration.identity())
            {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let stack = Arc::new(Stack::new(configuration));
                    stacks.push(Arc::clone(&stack));
                    (stack, true)
                }
            }
        };

        if created {
            info!(
                "event=stack_register module=stack status=ok store={} path={}",
                stack.name(),
                stack.store_path().display()
            );
            if stack.ensure_initialized().is_err() {
                debug!(
                    "event=stack_register module=stack status=degraded store={}",
                    stack.name()
                );
            }
        }
        stack
    }

    pub fn find(&self, identity: &StoreIdentity) -> Option<Arc<Stack>> {
        self.lock_stacks()
            .iter()
            .find(|stack| stack.identity() == identity)
            .cloned()
    }

    /// Registered stacks in creation order.
    pub fn list(&self) -> Vec<Arc<Stack>> {
        self.lock_stacks().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_stacks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_stacks().is_empty()
    }

    /// Saves every context with pending changes across all stacks.
    ///
    /// Never fails; save errors go to each stack's error handler.
    pub fn flush_all(&self) {
        let stacks = self.list();
        info!(
            "event=store_flush module=stack status=start stacks={}",
            stacks.len()
        );
        for stack in &stacks {
            stack.flush();
        }
        info!("event=store_flush module=stack status=ok");
    }

    fn lock_stacks(&self) -> MutexGuard<'_, Vec<Arc<Stack>>> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
