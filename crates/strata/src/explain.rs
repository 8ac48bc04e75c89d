//! explain/trace sink
//!
//! An [Explainer] receives a structured account of how a lookup was resolved. Frames form a stack:
//! every [Explainer::push] is matched by exactly one [Explainer::pop]. Leaf [Event]s are attached
//! to the innermost open frame.
//!
//! The engine never builds explain messages unless an explainer is attached, see
//! [crate::invocation::Invocation::report_text].
use crate::value::Value;
use parking_lot::Mutex;

/// A context frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    DataProvider(String),
    Location(String),
    Interpolation(String),
    Lookup(String),
    Merge(String),
    Segment(String),
    SubLookup(String),
    InvalidKey(String),
}

/// A leaf event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Found { key: String, value: Value },
    NotFound { key: String },
    LocationNotFound,
    MergeResult(Value),
    MergeSource(String),
    Text(String),
}

/// Receiver of explain frames and events
pub trait Explainer: Send + Sync {
    fn push(&self, frame: Frame);

    fn pop(&self);

    fn accept(&self, event: Event);

    /// Include the resolution of `lookup_options` in the explanation
    fn options(&self) -> bool {
        false
    }

    /// Explain the resolution of `lookup_options` only
    fn only_options(&self) -> bool {
        false
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::DataProvider(name) => write!(f, "Data Provider \"{name}\""),
            Frame::Location(location) => write!(f, "Location \"{location}\""),
            Frame::Interpolation(expression) => write!(f, "Interpolation on \"{expression}\""),
            Frame::Lookup(key) => write!(f, "Searching for \"{key}\""),
            Frame::Merge(strategy) => write!(f, "Merge strategy \"{strategy}\""),
            Frame::Segment(segment) => write!(f, "Sub key: \"{segment}\""),
            Frame::SubLookup(key) => write!(f, "Sub lookup \"{key}\""),
            Frame::InvalidKey(key) => write!(f, "Invalid key \"{key}\""),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Found { key, value } => write!(f, "Found key: \"{key}\" value: {}", render(value)),
            Event::NotFound { key } => write!(f, "No such key: \"{key}\""),
            Event::LocationNotFound => f.write_str("Location not found"),
            Event::MergeResult(value) => write!(f, "Merged result: {}", render(value)),
            Event::MergeSource(source) => write!(f, "Using merge options from {source}"),
            Event::Text(text) => f.write_str(text),
        }
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

#[derive(Debug)]
enum Entry {
    Node(Node),
    Event(Event),
}

#[derive(Debug, derive_new::new)]
struct Node {
    frame: Frame,
    #[new(default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Default)]
struct Tree {
    roots: Vec<Entry>,
    open: Vec<Node>,
}

impl Tree {
    fn attach(&mut self, entry: Entry) {
        match self.open.last_mut() {
            Some(parent) => parent.entries.push(entry),
            None => self.roots.push(entry),
        }
    }
}

/// Thread-safe [Explainer] collecting a tree that renders as an indented report
#[derive(Debug, Default)]
pub struct ExplainTree {
    tree: Mutex<Tree>,
    options: bool,
    only_options: bool,
}

impl ExplainTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also explain how `lookup_options` were found
    pub fn with_options(mut self, options: bool) -> Self {
        self.options = options;
        self
    }

    /// Only explain how `lookup_options` were found
    pub fn with_only_options(mut self, only_options: bool) -> Self {
        self.only_options = only_options;
        self
    }

    /// Render everything collected so far
    pub fn render(&self) -> String {
        let tree = self.tree.lock();
        let mut out = String::new();
        for entry in &tree.roots {
            render_entry(&mut out, entry, 0);
        }
        out
    }

    /// All events, depth first
    pub fn events(&self) -> Vec<Event> {
        fn collect(entries: &[Entry], out: &mut Vec<Event>) {
            for entry in entries {
                match entry {
                    Entry::Node(node) => collect(&node.entries, out),
                    Entry::Event(event) => out.push(event.clone()),
                }
            }
        }

        let tree = self.tree.lock();
        let mut out = Vec::new();
        collect(&tree.roots, &mut out);
        out
    }
}

fn render_entry(out: &mut String, entry: &Entry, depth: usize) {
    use std::fmt::Write;

    let indent = "  ".repeat(depth);
    match entry {
        Entry::Node(node) => {
            let _ = writeln!(out, "{indent}{}", node.frame);
            for child in &node.entries {
                render_entry(out, child, depth + 1);
            }
        }
        Entry::Event(event) => {
            let _ = writeln!(out, "{indent}{event}");
        }
    }
}

impl Explainer for ExplainTree {
    fn push(&self, frame: Frame) {
        self.tree.lock().open.push(Node::new(frame));
    }

    fn pop(&self) {
        let mut tree = self.tree.lock();
        if let Some(node) = tree.open.pop() {
            tree.attach(Entry::Node(node));
        }
    }

    fn accept(&self, event: Event) {
        self.tree.lock().attach(Entry::Event(event));
    }

    fn options(&self) -> bool {
        self.options
    }

    fn only_options(&self) -> bool {
        self.only_options
    }
}
