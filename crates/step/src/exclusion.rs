//! Exclusion-logic knowledge base: a trie of `/`-and-`!` paths with
//! exclusive-subtree semantics.
//!
//! An `ElNode` is stored as the `Value` of a state element, so it inherits
//! persistence and backtracking for free via [`crate::state::State`] --
//! `ElStore`/`ElDelete` don't mutate a node in place, they build a new node
//! and `set` it back into state, the same pattern every other stateful
//! primitive in this crate uses.

use std::rc::Rc;

use crate::intern::SymbolId;

/// One edge label: inclusive (`/key`) children coexist; exclusive (`!key`)
/// children replace any sibling exclusive subtree at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment {
    Inclusive(SymbolId),
    Exclusive(SymbolId),
}

impl PathSegment {
    #[must_use]
    fn key(self) -> SymbolId {
        match self {
            Self::Inclusive(k) | Self::Exclusive(k) => k,
        }
    }

    #[must_use]
    fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive(_))
    }
}

/// A node in the exclusion-logic trie. Immutable and `Rc`-shared like every
/// other persistent structure in this crate.
#[derive(Debug, Clone, Default)]
pub struct ElNode {
    children: Rc<Vec<(PathSegment, ElNode)>>,
}

impl ElNode {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Inserts `path`, returning the updated root. If any segment along the
    /// way is exclusive, it replaces the *entire* exclusive subtree at that
    /// point (any prior exclusive child under the same parent, regardless of
    /// key, is dropped) -- it replaces the entire exclusive
    /// subtree."
    #[must_use]
    pub fn store(&self, path: &[PathSegment]) -> Self {
        let Some((head, rest)) = path.split_first() else {
            return self.clone();
        };

        let mut children: Vec<(PathSegment, ElNode)> = if head.is_exclusive() {
            self.children.iter().filter(|(seg, _)| !seg.is_exclusive()).cloned().collect()
        } else {
            self.children.iter().filter(|(seg, _)| *seg != *head).cloned().collect()
        };

        let existing_child = self
            .children
            .iter()
            .find(|(seg, _)| *seg == *head)
            .map(|(_, node)| node.clone())
            .unwrap_or_default();
        let updated_child = existing_child.store(rest);
        children.push((*head, updated_child));

        Self {
            children: Rc::new(children),
        }
    }

    /// Removes the subtree rooted at `path`, returning the updated root.
    /// Removing a path that doesn't exist is a no-op.
    #[must_use]
    pub fn delete(&self, path: &[PathSegment]) -> Self {
        let Some((head, rest)) = path.split_first() else {
            return Self::empty();
        };
        if rest.is_empty() {
            let children = self.children.iter().filter(|(seg, _)| seg.key() != head.key()).cloned().collect();
            return Self {
                children: Rc::new(children),
            };
        }
        let mut children: Vec<(PathSegment, ElNode)> = Vec::with_capacity(self.children.len());
        for (seg, child) in self.children.iter() {
            if seg.key() == head.key() {
                children.push((*seg, child.delete(rest)));
            } else {
                children.push((*seg, child.clone()));
            }
        }
        Self {
            children: Rc::new(children),
        }
    }

    /// Returns `true` iff `path` names a stored node (i.e. it or a prefix of
    /// it was directly stored, or it has descendants).
    #[must_use]
    pub fn contains(&self, path: &[PathSegment]) -> bool {
        let Some((head, rest)) = path.split_first() else {
            return true;
        };
        match self.children.iter().find(|(seg, _)| seg.key() == head.key()) {
            Some((_, child)) => child.contains(rest),
            None => false,
        }
    }

    /// Enumerates every leaf path under this node, rendered with a resolver
    /// for display (used by reflection/testing).
    pub fn leaf_paths(&self, resolve: &impl Fn(SymbolId) -> String) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaf_paths(resolve, &mut String::new(), &mut out);
        out.sort();
        out
    }

    fn collect_leaf_paths(&self, resolve: &impl Fn(SymbolId) -> String, prefix: &mut String, out: &mut Vec<String>) {
        if self.children.is_empty() && !prefix.is_empty() {
            out.push(prefix.clone());
            return;
        }
        for (seg, child) in self.children.iter() {
            let sigil = if seg.is_exclusive() { '!' } else { '/' };
            let start_len = prefix.len();
            prefix.push(sigil);
            prefix.push_str(&resolve(seg.key()));
            child.collect_leaf_paths(resolve, prefix, out);
            prefix.truncate(start_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(n: u32) -> SymbolId {
        SymbolId::from(n)
    }

    #[test]
    fn exclusive_link_replaces_sibling_subtree() {
        // /a, /a/b, /c!d, /c!e -- sorted leaves are ["/a/b", "/c!e"]

        let root = ElNode::empty();
        let a = sym(0);
        let b = sym(1);
        let c = sym(2);
        let d = sym(3);
        let e = sym(4);

        let root = root.store(&[PathSegment::Inclusive(a)]);
        let root = root.store(&[PathSegment::Inclusive(a), PathSegment::Inclusive(b)]);
        let root = root.store(&[PathSegment::Exclusive(c), PathSegment::Exclusive(d)]);
        let root = root.store(&[PathSegment::Exclusive(c), PathSegment::Exclusive(e)]);

        let resolve = |id: SymbolId| match id.index() {
            0 => "a".to_owned(),
            1 => "b".to_owned(),
            2 => "c".to_owned(),
            3 => "d".to_owned(),
            4 => "e".to_owned(),
            _ => unreachable!(),
        };
        assert_eq!(root.leaf_paths(&resolve), vec!["/a/b".to_owned(), "/c!e".to_owned()]);
    }

    #[test]
    fn delete_removes_subtree() {
        let a = sym(0);
        let b = sym(1);
        let root = ElNode::empty().store(&[PathSegment::Inclusive(a), PathSegment::Inclusive(b)]);
        assert!(root.contains(&[PathSegment::Inclusive(a), PathSegment::Inclusive(b)]));
        let root = root.delete(&[PathSegment::Inclusive(a)]);
        assert!(!root.contains(&[PathSegment::Inclusive(a)]));
    }
}
