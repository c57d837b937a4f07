//! In-process element tree implementing [`PageDom`]
//!
//! Builds documents node by node and fires mutation records to attached
//! observers the way a browser would: child insertions are reported to
//! observers on the parent (or any ancestor with `subtree`), class changes to
//! observers on the element (or any ancestor with `subtree`). Writes issued
//! through the trait are recorded so callers can assert on what the agent did.
//!
//! Selector queries render the tree to HTML, tagging every element with its
//! node id, and match against the parsed snapshot with `scraper`. The tree
//! must therefore nest the way an HTML parser would leave it.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc;

use super::{
    DomError, DomResult, InputEvent, MutationBatch, MutationRecord, MutationStream, NodeId,
    ObserveOptions, ObserverId, PageDom,
};

#[derive(Debug)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Attribute carrying the node id in rendered snapshots
const NODE_ATTR: &str = "data-relay-node";

#[derive(Debug)]
struct Observer {
    target: NodeId,
    options: ObserveOptions,
}

/// A write the agent performed through [`PageDom`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomWrite {
    SetValue(NodeId, String),
    Dispatch(NodeId, InputEvent),
    Click(NodeId),
}

#[derive(Debug)]
struct Inner {
    host: String,
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    observers: HashMap<ObserverId, Observer>,
    writes: Vec<DomWrite>,
    queries: usize,
    fail_writes: Option<String>,
}

/// In-memory document with a single `body` root
pub struct MemoryDom {
    inner: Mutex<Inner>,
    tx: mpsc::UnboundedSender<MutationBatch>,
    root: NodeId,
}

impl MemoryDom {
    /// Create an empty document served from `host`
    pub fn new(host: &str) -> (Self, MutationStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let root = 1;
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                tag: "body".to_string(),
                attrs: BTreeMap::new(),
                text: String::new(),
                value: String::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        let inner = Inner {
            host: host.to_string(),
            nodes,
            next_id: root + 1,
            observers: HashMap::new(),
            writes: Vec::new(),
            queries: 0,
            fail_writes: None,
        };
        (
            Self {
                inner: Mutex::new(inner),
                tx,
                root,
            },
            rx,
        )
    }

    /// The document body
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create a detached element
    ///
    /// `shape` is `tag#id.class1.class2`; attributes are added with
    /// [`MemoryDom::set_attr`].
    pub fn create(&self, shape: &str) -> NodeId {
        let mut tag = String::new();
        let mut id = None;
        let mut classes = Vec::new();
        let mut kind = 't';
        let mut buf = String::new();
        for c in shape.chars().chain(std::iter::once('\0')) {
            if matches!(c, '#' | '.' | '\0') {
                let token = std::mem::take(&mut buf);
                match kind {
                    't' => tag = token,
                    '#' => id = Some(token),
                    _ if !token.is_empty() => classes.push(token),
                    _ => {}
                }
                kind = c;
            } else {
                buf.push(c);
            }
        }

        let mut attrs = BTreeMap::new();
        if let Some(id) = id {
            attrs.insert("id".to_string(), id);
        }
        if !classes.is_empty() {
            attrs.insert("class".to_string(), classes.join(" "));
        }

        let mut inner = self.inner.lock();
        let node_id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.insert(
            node_id,
            Node {
                tag: if tag.is_empty() { "div".to_string() } else { tag },
                attrs,
                text: String::new(),
                value: String::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        node_id
    }

    /// Create an element and append it under `parent` in one step
    pub fn append_new(&self, parent: NodeId, shape: &str) -> NodeId {
        let node = self.create(shape);
        self.append(parent, node);
        node
    }

    /// Attach `child` under `parent`, notifying child-list observers
    pub fn append(&self, parent: NodeId, child: NodeId) {
        let batches = {
            let mut inner = self.inner.lock();
            if let Some(node) = inner.nodes.get_mut(&child) {
                node.parent = Some(parent);
            }
            if let Some(node) = inner.nodes.get_mut(&parent) {
                node.children.push(child);
            }
            let record = MutationRecord::ChildList {
                target: parent,
                added: vec![child],
            };
            inner.batches_for(parent, |o| o.child_list, record)
        };
        self.deliver(batches);
    }

    pub fn set_text(&self, node: NodeId, text: &str) {
        if let Some(n) = self.inner.lock().nodes.get_mut(&node) {
            n.text = text.to_string();
        }
    }

    /// Set a plain attribute; `class` goes through [`MemoryDom::add_class`]
    pub fn set_attr(&self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.inner.lock().nodes.get_mut(&node) {
            n.attrs.insert(name.to_string(), value.to_string());
        }
    }

    /// Add a class, notifying class-attribute observers
    pub fn add_class(&self, node: NodeId, class: &str) {
        let batches = {
            let mut inner = self.inner.lock();
            let Some(n) = inner.nodes.get_mut(&node) else {
                return;
            };
            let classes = n.attrs.entry("class".to_string()).or_default();
            if !classes.is_empty() {
                classes.push(' ');
            }
            classes.push_str(class);
            let record = MutationRecord::Attribute {
                target: node,
                attribute: "class".to_string(),
            };
            inner.batches_for(node, |o| o.class_attribute, record)
        };
        self.deliver(batches);
    }

    /// Make every subsequent write fail with a script error
    pub fn fail_writes(&self, message: &str) {
        self.inner.lock().fail_writes = Some(message.to_string());
    }

    /// Writes performed through [`PageDom`], in order
    pub fn writes(&self) -> Vec<DomWrite> {
        self.inner.lock().writes.clone()
    }

    /// Number of selector queries issued through [`PageDom`]
    pub fn query_count(&self) -> usize {
        self.inner.lock().queries
    }

    /// Number of observers still connected
    pub fn active_observers(&self) -> usize {
        self.inner.lock().observers.len()
    }

    pub fn value_of(&self, node: NodeId) -> Option<String> {
        self.inner.lock().nodes.get(&node).map(|n| n.value.clone())
    }

    fn deliver(&self, batches: Vec<MutationBatch>) {
        for batch in batches {
            // Receiver gone means nobody is watching this page any more
            let _ = self.tx.send(batch);
        }
    }
}

impl Inner {
    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.nodes.get(&id).ok_or(DomError::StaleNode(id))
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn batches_for(
        &self,
        target: NodeId,
        wants: impl Fn(&ObserveOptions) -> bool,
        record: MutationRecord,
    ) -> Vec<MutationBatch> {
        let mut ids: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, o)| wants(&o.options))
            .filter(|(_, o)| {
                o.target == target || (o.options.subtree && self.is_ancestor_or_self(o.target, target))
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|observer| MutationBatch {
                observer,
                records: vec![record.clone()],
            })
            .collect()
    }

    fn text_of(&self, id: NodeId, out: &mut String) {
        if let Some(node) = self.nodes.get(&id) {
            out.push_str(&node.text);
            for child in &node.children {
                self.text_of(*child, out);
            }
        }
    }

    fn record_write(&mut self, write: DomWrite) -> DomResult<()> {
        if let Some(message) = &self.fail_writes {
            return Err(DomError::Script(message.clone()));
        }
        self.writes.push(write);
        Ok(())
    }

    fn select(&mut self, scope: Option<NodeId>, selector: &str) -> DomResult<Vec<NodeId>> {
        self.queries += 1;
        let selector = parse_selector(selector)?;
        let scope = scope.unwrap_or(1);
        self.node(scope)?;
        let snapshot = self.snapshot(scope);
        let Some(scope) = find_element(&snapshot, scope) else {
            return Ok(Vec::new());
        };
        let found = scope.select(&selector).filter_map(node_id_of).collect();
        Ok(found)
    }

    fn matches(&self, node: NodeId, selector: &str) -> DomResult<bool> {
        let selector = parse_selector(selector)?;
        self.node(node)?;
        let snapshot = self.snapshot(node);
        let matched = find_element(&snapshot, node).is_some_and(|el| selector.matches(&el));
        Ok(matched)
    }

    /// Parse the tree containing `node`
    ///
    /// Attached nodes see the whole document; a detached subtree is parsed as
    /// a fragment of its own.
    fn snapshot(&self, node: NodeId) -> Html {
        let mut top = node;
        while let Some(parent) = self.nodes.get(&top).and_then(|n| n.parent) {
            top = parent;
        }
        let mut html = String::new();
        self.render(top, &mut html);
        if top == 1 {
            Html::parse_document(&format!("<!DOCTYPE html><html><head></head>{html}</html>"))
        } else {
            Html::parse_fragment(&html)
        }
    }

    fn render(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        out.push('<');
        out.push_str(&node.tag);
        out.push_str(&format!(" {NODE_ATTR}=\"{id}\""));
        for (name, value) in &node.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            push_escaped(out, value);
            out.push('"');
        }
        out.push('>');
        push_escaped(out, &node.text);
        for child in &node.children {
            self.render(*child, out);
        }
        out.push_str("</");
        out.push_str(&node.tag);
        out.push('>');
    }
}

fn parse_selector(selector: &str) -> DomResult<Selector> {
    Selector::parse(selector).map_err(|_| DomError::InvalidSelector(selector.to_string()))
}

fn find_element(snapshot: &Html, id: NodeId) -> Option<ElementRef<'_>> {
    snapshot
        .tree
        .nodes()
        .filter_map(ElementRef::wrap)
        .find(|el| node_id_of(*el) == Some(id))
}

fn node_id_of(el: ElementRef<'_>) -> Option<NodeId> {
    el.value().attr(NODE_ATTR).and_then(|id| id.parse().ok())
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[async_trait]
impl PageDom for MemoryDom {
    async fn hostname(&self) -> DomResult<String> {
        Ok(self.inner.lock().host.clone())
    }

    async fn query(&self, scope: Option<NodeId>, selector: &str) -> DomResult<Option<NodeId>> {
        Ok(self.inner.lock().select(scope, selector)?.into_iter().next())
    }

    async fn query_all(&self, scope: Option<NodeId>, selector: &str) -> DomResult<Vec<NodeId>> {
        self.inner.lock().select(scope, selector)
    }

    async fn matches(&self, node: NodeId, selector: &str) -> DomResult<bool> {
        self.inner.lock().matches(node, selector)
    }

    async fn text(&self, node: NodeId) -> DomResult<String> {
        let inner = self.inner.lock();
        inner.node(node)?;
        let mut out = String::new();
        inner.text_of(node, &mut out);
        Ok(out)
    }

    async fn set_value(&self, node: NodeId, value: &str) -> DomResult<()> {
        let mut inner = self.inner.lock();
        inner.node(node)?;
        inner.record_write(DomWrite::SetValue(node, value.to_string()))?;
        if let Some(n) = inner.nodes.get_mut(&node) {
            n.value = value.to_string();
        }
        Ok(())
    }

    async fn dispatch(&self, node: NodeId, event: InputEvent) -> DomResult<()> {
        let mut inner = self.inner.lock();
        inner.node(node)?;
        inner.record_write(DomWrite::Dispatch(node, event))
    }

    async fn click(&self, node: NodeId) -> DomResult<()> {
        let mut inner = self.inner.lock();
        inner.node(node)?;
        inner.record_write(DomWrite::Click(node))
    }

    async fn observe(&self, target: NodeId, options: ObserveOptions) -> DomResult<ObserverId> {
        let mut inner = self.inner.lock();
        inner.node(target)?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.insert(id, Observer { target, options });
        Ok(id)
    }

    async fn disconnect(&self, observer: ObserverId) -> DomResult<()> {
        self.inner
            .lock()
            .observers
            .remove(&observer)
            .map(|_| ())
            .ok_or(DomError::UnknownObserver(observer))
    }
}
