//! Per-call context that carries the cancellation signal and the log
//! attribute overlay of the operation it belongs to.
//!
//! A [`Ctx`] is an immutable value. Adding attributes produces a new context,
//! so concurrently running handlers that were derived from the same parent
//! never observe each other's attributes. To make the attributes show up in
//! log records the context has to be made ambient with [`Ctx::scope`] or
//! [`Ctx::in_scope`]. The log formatter then reads them via [`Ctx::try_current`].

use futures::prelude::*;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    static CURRENT: Ctx;
}

/// A single `key=value` pair of the overlay
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone)]
pub struct Ctx {
    /// Ordered from the root of the context chain to the leaf
    attrs: Arc<[Attr]>,
    cancel: CancellationToken,
}

impl Ctx {
    /// Root context without any attributes, that is never cancelled
    /// unless [`Ctx::cancel`] is called on it or one of its descendants.
    pub fn background() -> Self {
        Self::default()
    }

    /// Same as [`Ctx::background`], but the cancellation is driven by the
    /// given token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            attrs: Arc::from(Vec::new()),
            cancel,
        }
    }

    #[must_use]
    pub fn with_attr(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_attrs([Attr::new(key, value)])
    }

    #[must_use]
    pub fn with_attrs(&self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        let attrs = self.attrs.iter().cloned().chain(attrs).collect();
        Self {
            attrs,
            cancel: self.cancel.clone(),
        }
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }

    /// Signals cancellation to every context that shares the token with this one
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Runs the future with this context being the ambient one
    pub fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(self, fut)
    }

    /// Runs the closure with this context being the ambient one
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self.clone(), f)
    }

    /// Returns the innermost ambient context if there is any
    pub fn try_current() -> Option<Ctx> {
        CURRENT.try_with(Ctx::clone).ok()
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("attrs", &self.attrs)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Returns a new context with one more attribute. The parent is left intact.
pub fn with_attribute(parent: &Ctx, key: impl Into<String>, value: impl Into<Value>) -> Ctx {
    parent.with_attr(key, value)
}

/// Returns a new context with the given attributes appended. The parent is left intact.
pub fn with_attributes(parent: &Ctx, attrs: impl IntoIterator<Item = Attr>) -> Ctx {
    parent.with_attrs(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::{expect, Expect};

    #[track_caller]
    fn assert_attrs(ctx: &Ctx, expected: Expect) {
        let actual = ctx
            .attrs()
            .iter()
            .map(|attr| format!("{}={}", attr.key, attr.value))
            .collect::<Vec<_>>()
            .join(" ");
        expected.assert_eq(&actual);
    }

    #[test]
    fn sequential_attrs_are_appended_and_parent_is_intact() {
        let root = Ctx::background();
        let first = with_attribute(&root, "key1", "value1");
        let second = with_attributes(&first, [Attr::new("key2", "value2")]);

        assert_attrs(&root, expect![""]);
        assert_attrs(&first, expect![[r#"key1="value1""#]]);
        assert_attrs(&second, expect![[r#"key1="value1" key2="value2""#]]);
    }

    #[test]
    fn siblings_are_isolated() {
        let parent = Ctx::background().with_attr("component", "telegram");
        let left = parent.with_attr("update_id", 1);
        let right = parent.with_attr("update_id", 2);

        assert_attrs(&parent, expect![[r#"component="telegram""#]]);
        assert_attrs(&left, expect![[r#"component="telegram" update_id=1"#]]);
        assert_attrs(&right, expect![[r#"component="telegram" update_id=2"#]]);
    }

    #[test]
    fn duplicate_keys_are_kept() {
        let ctx = Ctx::background().with_attr("k", 1).with_attr("k", 2);
        assert_attrs(&ctx, expect!["k=1 k=2"]);
    }

    #[test]
    fn derived_contexts_share_cancellation() {
        let root = Ctx::background();
        let child = root.with_attr("update_id", 42);

        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn ambient_context() {
        assert!(Ctx::try_current().is_none());

        let ctx = Ctx::background().with_attr("update_id", 42);
        let inner = ctx.in_scope(|| Ctx::try_current().map(|ctx| ctx.attrs().to_vec()));

        assert_eq!(inner, Some(vec![Attr::new("update_id", 42)]));
        assert!(Ctx::try_current().is_none());
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let parent = Ctx::background();

        let read = |id: i32| {
            parent.with_attr("update_id", id).scope(async move {
                tokio::task::yield_now().await;
                Ctx::try_current().map(|ctx| ctx.attrs().to_vec())
            })
        };

        let (left, right) = tokio::join!(read(1), read(2));

        assert_eq!(left, Some(vec![Attr::new("update_id", 1)]));
        assert_eq!(right, Some(vec![Attr::new("update_id", 2)]));
    }
}
