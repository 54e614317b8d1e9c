use std::collections::VecDeque;

use tracing::warn;

use crate::budget::char_len;

/// Noteworthy callouts that did not fit in their step's post. Scoped to a
/// single chain run.
#[derive(Debug, Clone, Default)]
pub struct RecordsAccumulator {
    queue: VecDeque<String>,
    tag: Option<String>,
}

impl RecordsAccumulator {
    pub fn new(tag: Option<String>) -> Self {
        Self {
            queue: VecDeque::new(),
            tag,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.queue.push_back(text.into());
    }

    pub fn extend(&mut self, texts: impl IntoIterator<Item = String>) {
        for text in texts {
            self.push(text);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Empties the queue into as few posts as possible, preserving order.
    /// Entries are joined by newlines and every post ends with the tag; each
    /// post is strictly shorter than `max_length` characters. An entry too
    /// long to fit even alone is split at char boundaries into consecutive
    /// posts.
    pub fn drain_into(&mut self, max_length: usize) -> Vec<String> {
        let tag_cost = self.tag.as_deref().map_or(0, |tag| char_len(tag) + 1);
        let room = max_length.saturating_sub(tag_cost + 1);
        if room == 0 {
            if !self.queue.is_empty() {
                warn!(
                    dropped = self.queue.len(),
                    max_length,
                    "tag leaves no room for records"
                );
                self.queue.clear();
            }
            return Vec::new();
        }

        let mut posts = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        while let Some(entry) = self.queue.pop_front() {
            let entry_len = char_len(&entry);
            if entry_len > room {
                let chars: Vec<char> = entry.chars().collect();
                for piece in chars.chunks(room).rev() {
                    self.queue.push_front(piece.iter().collect());
                }
                continue;
            }

            let joined_len = if current.is_empty() {
                entry_len
            } else {
                current_len + 1 + entry_len
            };
            if joined_len <= room {
                current_len = joined_len;
                current.push(entry);
            } else {
                posts.push(self.finish(&current));
                current_len = entry_len;
                current = vec![entry];
            }
        }

        if !current.is_empty() {
            posts.push(self.finish(&current));
        }
        posts
    }

    fn finish(&self, entries: &[String]) -> String {
        let mut post = entries.join("\n");
        if let Some(tag) = &self.tag {
            post.push('\n');
            post.push_str(tag);
        }
        post
    }
}
