//! Reply-tree layout for displaying one stored thread.
//!
//! Stored rows only know their thread root; the parent/child shape comes from
//! re-reading each message's reference headers out of the mirror. Messages that
//! are referenced but absent are phantom containers: they never appear in the
//! output, and their children are shown at the phantom's depth.

use std::collections::{HashMap, HashSet};

use inboxmux_types::Message;

use crate::header::{normalize_subject, parse_message, ParsedMessage};
use crate::mirror::Mirror;

/// A stored message plus its parent chain (oldest first).
#[derive(Debug, Clone)]
pub struct ThreadInput {
    pub message: Message,
    pub parents: Vec<String>,
}

/// One line of a flattened thread.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    pub message: Message,
    pub depth: usize,
    /// `None` when the subject only repeats the parent's.
    pub display_subject: Option<String>,
}

#[derive(Debug, Default)]
struct Container {
    message: Option<Message>,
    parent: Option<String>,
    children: Vec<String>,
}

/// References followed by In-Reply-To, duplicates dropped.
pub fn parent_chain(parsed: &ParsedMessage) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let refs = parsed.references.iter().flat_map(|c| c.ids());
    let reply = parsed.in_reply_to.iter().flat_map(|c| c.ids());
    for id in refs.chain(reply) {
        if *id != parsed.message_id && seen.insert(id.clone()) {
            chain.push(id.clone());
        }
    }
    chain
}

/// Pair stored rows with parent chains re-read from the mirror.
///
/// Rows whose blob can't be read or parsed get an empty chain and end up as
/// top-level entries.
pub fn thread_inputs(mirror: Option<&Mirror>, rows: Vec<Message>) -> Vec<ThreadInput> {
    rows.into_iter()
        .map(|message| {
            let parents = match mirror {
                Some(mirror) => match mirror.read_message(&message.commit_id) {
                    Ok(Some(blob)) => match parse_message(&blob) {
                        Ok(parsed) => parent_chain(&parsed),
                        Err(e) => {
                            log::warn!("cannot re-parse {}: {}", message.message_id, e);
                            Vec::new()
                        }
                    },
                    Ok(None) => Vec::new(),
                    Err(e) => {
                        log::warn!("cannot re-read {}: {}", message.commit_id, e);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            ThreadInput { message, parents }
        })
        .collect()
}

struct Tree {
    containers: HashMap<String, Container>,
    order: Vec<String>,
}

impl Tree {
    fn new() -> Self {
        Tree {
            containers: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn ensure(&mut self, id: &str) {
        if !self.containers.contains_key(id) {
            self.containers.insert(id.to_string(), Container::default());
            self.order.push(id.to_string());
        }
    }

    /// True if `ancestor` sits on the parent path above `node` (or is `node`).
    fn is_ancestor(&self, ancestor: &str, node: &str) -> bool {
        let mut current = Some(node);
        let mut hops = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.containers.len() {
                return false;
            }
            current = self.containers.get(id).and_then(|c| c.parent.as_deref());
        }
        false
    }

    fn unlink(&mut self, child: &str) {
        let parent = self.containers.get_mut(child).and_then(|c| c.parent.take());
        if let Some(parent) = parent {
            if let Some(p) = self.containers.get_mut(&parent) {
                p.children.retain(|c| c != child);
            }
        }
    }

    fn link(&mut self, parent: &str, child: &str) {
        self.unlink(child);
        if let Some(c) = self.containers.get_mut(child) {
            c.parent = Some(parent.to_string());
        }
        if let Some(p) = self.containers.get_mut(parent) {
            p.children.push(child.to_string());
        }
    }

    fn add(&mut self, input: ThreadInput) {
        let id = input.message.message_id.clone();
        self.ensure(&id);
        if let Some(c) = self.containers.get_mut(&id) {
            c.message = Some(input.message);
        }

        let mut prev: Option<String> = None;
        for reference in input.parents.iter().filter(|r| **r != id) {
            self.ensure(reference);
            if let Some(ref p) = prev {
                let orphan = self
                    .containers
                    .get(reference)
                    .is_some_and(|c| c.parent.is_none());
                if orphan && !self.is_ancestor(reference, p) {
                    self.link(p, reference);
                }
            }
            prev = Some(reference.clone());
        }

        // The message's own headers decide its parent.
        if let Some(p) = prev {
            if !self.is_ancestor(&id, &p) {
                self.link(&p, &id);
            }
        }
    }

    /// Own date, or the earliest date of the messages found below a phantom.
    fn sort_date(&self, id: &str) -> Option<i64> {
        let c = self.containers.get(id)?;
        if let Some(ref m) = c.message {
            return m.date_sent;
        }
        let mut earliest: Option<i64> = None;
        let mut stack: Vec<&str> = c.children.iter().map(String::as_str).collect();
        while let Some(child) = stack.pop() {
            let Some(c) = self.containers.get(child) else {
                continue;
            };
            match c.message {
                Some(ref m) => {
                    if let Some(date) = m.date_sent {
                        earliest = Some(earliest.map_or(date, |e| e.min(date)));
                    }
                }
                None => stack.extend(c.children.iter().map(String::as_str)),
            }
        }
        earliest
    }

    fn sorted<'a>(&self, ids: &'a [String]) -> Vec<&'a str> {
        let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        ids.sort_by(|a, b| self.sort_date(a).cmp(&self.sort_date(b)).then_with(|| a.cmp(b)));
        ids
    }

    /// Depth-first, children in date order.
    fn flatten<'a>(&'a self, root: &'a str, out: &mut Vec<ThreadEntry>) {
        let mut stack: Vec<(&'a str, usize, Option<&'a str>)> = vec![(root, 0, None)];

        while let Some((id, depth, parent_subject)) = stack.pop() {
            let Some(c) = self.containers.get(id) else {
                continue;
            };
            let (child_depth, child_parent_subject) = match c.message {
                Some(ref message) => {
                    out.push(ThreadEntry {
                        message: message.clone(),
                        depth,
                        display_subject: display_subject(message.subject.as_deref(), parent_subject, depth),
                    });
                    (depth + 1, message.subject.as_deref())
                }
                None => (depth, parent_subject),
            };
            for child in self.sorted(&c.children).into_iter().rev() {
                stack.push((child, child_depth, child_parent_subject));
            }
        }
    }
}

fn display_subject(subject: Option<&str>, parent_subject: Option<&str>, depth: usize) -> Option<String> {
    let subject = subject?;
    if depth > 0 {
        if let Some(parent) = parent_subject {
            let parent = normalize_subject(parent);
            if !parent.is_empty() && normalize_subject(subject).contains(&parent) {
                return None;
            }
        }
    }
    Some(subject.to_string())
}

/// Arrange `inputs` into a reply tree and flatten it depth-first.
pub fn build_thread(inputs: Vec<ThreadInput>) -> Vec<ThreadEntry> {
    let mut tree = Tree::new();
    for input in inputs {
        tree.add(input);
    }

    let roots: Vec<String> = tree
        .order
        .iter()
        .filter(|id| tree.containers.get(*id).is_some_and(|c| c.parent.is_none()))
        .cloned()
        .collect();

    let mut out = Vec::new();
    for root in tree.sorted(&roots) {
        tree.flatten(root, &mut out);
    }
    out
}
