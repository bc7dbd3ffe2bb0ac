//! Hierarchical namespaces over one binding.
//!
//! A [`Channel`] prefixes every event name it touches with its path, so
//! independent subsystems can share one connection without colliding:
//! `binding.channel().of("chat").of("room").emit("say", ..)` travels as
//! `chat/room/say`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{ConnectionBinding, RequestHandle, RpcHandler, Subscription};

/// A namespace node. Cheap to clone; clones are the same node.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    binding: ConnectionBinding,
    name: Option<String>,
    path: String,
    parent: Weak<ChannelInner>,
    children: Mutex<HashMap<String, Channel>>,
}

impl Channel {
    /// The unnamed root namespace. Its path is empty.
    pub fn root(binding: ConnectionBinding) -> Self {
        Self::build(binding, None, String::new(), Weak::new())
    }

    fn build(
        binding: ConnectionBinding,
        name: Option<String>,
        path: String,
        parent: Weak<ChannelInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                binding,
                name,
                path,
                parent,
                children: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Slash-joined names from the root down to this channel.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The parent channel, if this is not the root and the parent is still alive.
    pub fn parent(&self) -> Option<Channel> {
        self.inner.parent.upgrade().map(|inner| Channel { inner })
    }

    pub fn binding(&self) -> &ConnectionBinding {
        &self.inner.binding
    }

    /// The wire name of `event` in this namespace.
    pub fn join_path(&self, event: &str) -> String {
        join(&self.inner.path, event)
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) {
        self.inner.binding.send_event(self.join_path(event), args);
    }

    pub fn request(&self, event: &str, args: Vec<Value>) -> RequestHandle {
        self.inner.binding.send_request(self.join_path(event), args)
    }

    pub fn on(&self, event: &str, handler: &RpcHandler) -> Subscription {
        self.inner.binding.on(self.join_path(event), handler)
    }

    pub fn off(&self, event: &str, handler: &RpcHandler) -> bool {
        self.inner.binding.off(&self.join_path(event), handler)
    }

    /// The child namespace `name`, created on first use and cached after.
    pub fn of(&self, name: &str) -> Channel {
        self.inner
            .children
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| {
                Self::build(
                    self.inner.binding.clone(),
                    Some(name.to_owned()),
                    self.join_path(name),
                    Arc::downgrade(&self.inner),
                )
            })
            .clone()
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

fn join(path: &str, event: &str) -> String {
    match (path.is_empty(), event.is_empty()) {
        (true, _) => event.to_owned(),
        (false, true) => path.to_owned(),
        (false, false) => format!("{path}/{event}"),
    }
}

static_assertions::assert_impl_all!(Channel: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingConfig, MemTransport};
    use std::time::Duration;

    fn binding() -> ConnectionBinding {
        let (a, _b) = MemTransport::pair();
        ConnectionBinding::with_config(
            a,
            BindingConfig::default().with_request_timeout(Duration::ZERO),
        )
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "ping"), "ping");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("", ""), "");
        assert_eq!(join("a/b", "ping"), "a/b/ping");
    }

    #[tokio::test]
    async fn test_paths() {
        let root = binding().channel();
        assert_eq!(root.path(), "");
        assert_eq!(root.name(), None);
        assert_eq!(root.join_path("ping"), "ping");

        let a = root.of("a");
        let b = a.of("b");
        assert_eq!(a.path(), "a");
        assert_eq!(b.path(), "a/b");
        assert_eq!(b.name(), Some("b"));
        assert_eq!(b.join_path("ping"), "a/b/ping");
    }

    #[tokio::test]
    async fn test_children_are_cached() {
        let root = binding().channel();
        let a = root.of("a");
        assert!(a.ptr_eq(&root.of("a")));
        assert!(!a.ptr_eq(&root.of("b")));
        assert!(a.of("x").ptr_eq(&root.of("a").of("x")));
    }

    #[tokio::test]
    async fn test_parent_links() {
        let root = binding().channel();
        let b = root.of("a").of("b");
        let a = b.parent().unwrap();
        assert!(a.ptr_eq(&root.of("a")));
        assert!(a.parent().unwrap().ptr_eq(&root));
        assert!(root.parent().is_none());

        drop((root, a));
        assert!(b.parent().is_none());
    }

    #[tokio::test]
    async fn test_emit_is_namespaced() {
        let binding = binding();
        binding.channel().of("chat").emit("say", vec![Value::from("hi")]);
        assert_eq!(binding.queued_len(), 1);
    }
}
