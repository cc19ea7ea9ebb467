//! Thread-root resolution for a freshly parsed message.
//!
//! A message adopts the stored root of the oldest ancestor already known to the
//! store, so every root pointer is at most one hop from a self-rooted row. A
//! message with no known ancestor roots itself. Descendants stored before their
//! parent are not re-rooted when the parent arrives.

use inboxmux_types::{Result, RootLookup};

use crate::header::{AncestorChain, ParsedMessage};

/// Candidate ancestors, oldest first.
///
/// A usable `References` chain wins; otherwise the `In-Reply-To` id; otherwise
/// nothing.
pub fn ancestor_chain(message: &ParsedMessage) -> Vec<String> {
    let chain = match (&message.references, &message.in_reply_to) {
        (Some(AncestorChain::Ids(ids)), _) if !ids.is_empty() => ids.clone(),
        (_, Some(AncestorChain::Ids(ids))) => ids.iter().take(1).cloned().collect(),
        _ => Vec::new(),
    };
    chain
        .into_iter()
        .filter(|id| *id != message.message_id)
        .collect()
}

/// The `root_message_id` to store for `message`.
pub fn resolve_root(message: &ParsedMessage, lookup: &dyn RootLookup) -> Result<String> {
    for ancestor in ancestor_chain(message) {
        if let Some(root) = lookup.root_of(&ancestor)? {
            log::trace!(
                "{} joins thread {} via {}",
                message.message_id,
                root,
                ancestor
            );
            return Ok(root);
        }
    }
    Ok(message.message_id.clone())
}
