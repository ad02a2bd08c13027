//! Segment trie behind the router.
//!
//! Each node is one path segment: a literal (`users`), a parameter (`:id`),
//! or a constrained parameter (`:id(\d+)`). Nodes carry the handlers bound
//! per method and the middleware registered at that scope.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Children are
//! owned by the arena, and the parent link is just an index, so walking back
//! up to the root never creates an ownership cycle. Nodes are never removed,
//! so a `NodeId` stays valid for the lifetime of its trie.
//!
//! Matching prefers a literal child over parameter children at every depth.
//! Parameter children are tried in definition order. If a branch dead-ends
//! deeper down, the walk backs up and tries the next candidate.

use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::trace;

use crate::compose::SharedMiddleware;
use crate::error::{Error, Result};
use crate::handler::BoxedHandler;
use crate::method::Method;

/// Prefix marking a parameter segment.
const PARAM_SIGIL: char = ':';

/// Stable handle to a trie node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(usize);

enum Segment {
    Root,
    Literal(String),
    Param {
        name: String,
        /// Source text of the constraint, used for equality checks.
        source: Option<String>,
        matcher: Option<Regex>,
    },
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => Ok(()),
            Self::Literal(s) => f.write_str(s),
            Self::Param { name, source: None, .. } => write!(f, ":{name}"),
            Self::Param { name, source: Some(re), .. } => write!(f, ":{name}({re})"),
        }
    }
}

struct Node {
    segment: Segment,
    parent: Option<NodeId>,
    literals: HashMap<String, NodeId>,
    params: Vec<NodeId>,
    handlers: HashMap<Method, BoxedHandler>,
    middleware: Vec<SharedMiddleware>,
}

impl Node {
    fn new(segment: Segment, parent: Option<NodeId>) -> Self {
        Self {
            segment,
            parent,
            literals: HashMap::new(),
            params: Vec::new(),
            handlers: HashMap::new(),
            middleware: Vec::new(),
        }
    }
}

/// Path parameters extracted by a match, in path order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Value bound to `name`. If a name repeats along the path, the deepest
    /// binding wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of a successful [`Trie::matches`].
#[derive(Debug)]
pub struct Match {
    pub node: NodeId,
    pub params: Params,
}

/// The route trie.
pub struct Trie {
    nodes: Vec<Node>,
}

impl Trie {
    pub fn new() -> Self {
        Self { nodes: vec![Node::new(Segment::Root, None)] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Defines `path` from the root. See [`define_under`](Self::define_under).
    pub fn define(&mut self, path: &str) -> Result<NodeId> {
        self.define_under(self.root(), path)
    }

    /// Walks `path` starting at `from`, creating missing nodes, and returns
    /// the terminal node. Defining an existing path returns the existing node
    /// without modifying anything.
    ///
    /// # Errors
    ///
    /// [`Error::AmbiguousParam`] if a parameter segment would sit beside a
    /// parameter with the same constraint but another name, and
    /// [`Error::InvalidPattern`] if a constraint does not compile.
    pub fn define_under(&mut self, from: NodeId, path: &str) -> Result<NodeId> {
        let mut current = from;
        for raw in split(path) {
            current = match raw.strip_prefix(PARAM_SIGIL) {
                Some(pattern) => self.param_child(current, raw, pattern)?,
                None => self.literal_child(current, raw),
            };
        }
        trace!(path, node = current.0, "define");
        Ok(current)
    }

    fn literal_child(&mut self, parent: NodeId, segment: &str) -> NodeId {
        let next = NodeId(self.nodes.len());
        match self.nodes[parent.0].literals.entry(segment.to_owned()) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                e.insert(next);
                self.nodes.push(Node::new(Segment::Literal(segment.to_owned()), Some(parent)));
                next
            }
        }
    }

    fn param_child(&mut self, parent: NodeId, raw: &str, pattern: &str) -> Result<NodeId> {
        let (name, source) = parse_param(pattern);

        for &child in &self.nodes[parent.0].params {
            if let Segment::Param { name: existing, source: existing_source, .. } = &self.nodes[child.0].segment
                && existing_source.as_deref() == source
            {
                if existing == name {
                    return Ok(child);
                }
                return Err(Error::AmbiguousParam {
                    path: self.path_of(parent),
                    existing: existing.clone(),
                    requested: name.to_owned(),
                });
            }
        }

        let matcher = source
            .map(|re| Regex::new(&format!("^(?:{re})$")))
            .transpose()
            .map_err(|source| Error::InvalidPattern { segment: raw.to_owned(), source })?;

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(
            Segment::Param {
                name: name.to_owned(),
                source: source.map(str::to_owned),
                matcher,
            },
            Some(parent),
        ));
        self.nodes[parent.0].params.push(id);
        Ok(id)
    }

    /// Resolves a request path. Segments are percent-decoded before they are
    /// compared, so parameter values come back decoded. A segment with a
    /// malformed escape or invalid UTF-8 matches nothing.
    ///
    /// Returns `None` when nothing matches; that is an ordinary outcome.
    pub fn matches(&self, path: &str) -> Option<Match> {
        let segments: Vec<Cow<'_, str>> = split(path).map(decode_segment).collect::<Option<_>>()?;
        let mut bindings = Vec::new();
        let node = self.walk(self.root(), &segments, &mut bindings)?;
        Some(Match { node, params: Params(bindings) })
    }

    fn walk(&self, at: NodeId, segments: &[Cow<'_, str>], bindings: &mut Vec<(String, String)>) -> Option<NodeId> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(at);
        };
        let node = &self.nodes[at.0];

        if let Some(&child) = node.literals.get(head.as_ref())
            && let Some(found) = self.walk(child, rest, bindings)
        {
            return Some(found);
        }

        if head.is_empty() {
            return None;
        }
        for &child in &node.params {
            let Segment::Param { name, matcher, .. } = &self.nodes[child.0].segment else {
                continue;
            };
            if matcher.as_ref().is_some_and(|re| !re.is_match(head)) {
                continue;
            }
            bindings.push((name.clone(), head.to_string()));
            if let Some(found) = self.walk(child, rest, bindings) {
                return Some(found);
            }
            bindings.pop();
        }
        None
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// `id` followed by each ancestor up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |&n| self.parent(n))
    }

    /// Binds `handler` to `method` on `id`.
    ///
    /// # Errors
    ///
    /// [`Error::RouteConflict`] if the method is already bound; the original
    /// handler stays in place.
    pub fn bind(&mut self, id: NodeId, method: Method, handler: BoxedHandler) -> Result<()> {
        if self.nodes[id.0].handlers.contains_key(&method) {
            return Err(Error::RouteConflict { method, path: self.path_of(id) });
        }
        self.nodes[id.0].handlers.insert(method, handler);
        Ok(())
    }

    /// Appends a middleware to the scope rooted at `id`.
    pub fn attach(&mut self, id: NodeId, middleware: SharedMiddleware) {
        self.nodes[id.0].middleware.push(middleware);
    }

    pub fn handler(&self, id: NodeId, method: Method) -> Option<BoxedHandler> {
        self.nodes[id.0].handlers.get(&method).cloned()
    }

    /// Middleware applying to `id`, collected leaf-to-root and returned in
    /// root-to-leaf order: ancestors wrap descendants.
    pub fn middleware_chain(&self, id: NodeId) -> Vec<SharedMiddleware> {
        let mut scopes: Vec<&[SharedMiddleware]> = self
            .ancestors(id)
            .filter(|&n| n != self.root())
            .map(|n| self.nodes[n.0].middleware.as_slice())
            .collect();
        scopes.reverse();
        scopes.concat()
    }

    /// The route pattern leading to `id`, e.g. `/users/:id`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments: Vec<String> = self
            .ancestors(id)
            .filter(|&n| n != self.root())
            .map(|n| self.nodes[n.0].segment.to_string())
            .collect();
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

/// `"/a/b"` → `["a", "b"]`. Only one leading slash is dropped, so `"/a/"`
/// keeps its trailing empty segment. The root path yields no segments.
fn split(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    (!trimmed.is_empty())
        .then(|| trimmed.split('/'))
        .into_iter()
        .flatten()
}

fn decode_segment(raw: &str) -> Option<Cow<'_, str>> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.iter().enumerate().all(|(i, &b)| {
        b != b'%' || bytes.get(i + 1..i + 3).is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    });
    if !well_formed {
        return None;
    }
    percent_decode_str(raw).decode_utf8().ok()
}

/// `"id(\d+)"` → `("id", Some("\d+"))`.
fn parse_param(pattern: &str) -> (&str, Option<&str>) {
    match pattern.split_once('(') {
        Some((name, rest)) if rest.ends_with(')') => (name, Some(&rest[..rest.len() - 1])),
        _ => (pattern, None),
    }
}
