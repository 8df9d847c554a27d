//! Cooperative cancellation shared by the worker threads.
//!
//! A token is cancelled when it, or any ancestor, has been cancelled.
//! Cancelling a child never affects its parent or siblings.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Node {
    flag: AtomicBool,
    parent: Option<Arc<Node>>,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    node: Arc<Node>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that observes this one but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(Node {
                flag: AtomicBool::new(false),
                parent: Some(self.node.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.node.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        let mut node = Some(&self.node);
        while let Some(n) = node {
            if n.flag.load(Ordering::Acquire) {
                return true;
            }
            node = n.parent.as_ref();
        }
        false
    }
}
