pub const STATUS_LIMIT: usize = 280;

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[derive(Debug, Clone)]
pub struct StatusBudget {
    pub limit: usize,
    pub hashtag: Option<String>,
}

impl Default for StatusBudget {
    fn default() -> Self {
        Self {
            limit: STATUS_LIMIT,
            hashtag: None,
        }
    }
}

impl StatusBudget {
    pub fn new(limit: usize, hashtag: Option<String>) -> Self {
        Self { limit, hashtag }
    }

    /// Appends the link, then the hashtag, each only if it still fits.
    /// A body that is over the limit on its own is suppressed, never truncated.
    pub fn compose(&self, body: &str, link: Option<&str>) -> Option<String> {
        if char_len(body) > self.limit {
            return None;
        }

        let mut text = body.to_string();
        for extra in [link, self.hashtag.as_deref()].into_iter().flatten() {
            if char_len(&text) + 1 + char_len(extra) <= self.limit {
                text.push('\n');
                text.push_str(extra);
            }
        }
        Some(text)
    }

    /// Room left for the body once link and hashtag are reserved. Extras
    /// that could never fit reserve nothing.
    pub fn room(&self, link: Option<&str>) -> usize {
        let reserved: usize = [link, self.hashtag.as_deref()]
            .into_iter()
            .flatten()
            .map(|extra| char_len(extra) + 1)
            .filter(|cost| *cost <= self.limit)
            .sum();
        self.limit.saturating_sub(reserved)
    }

    /// Appends callouts to the body while they fit in `room`; the rest are
    /// returned in order.
    pub fn fill(&self, body: &str, callouts: Vec<String>, link: Option<&str>) -> (String, Vec<String>) {
        let room = self.room(link);
        let mut text = body.to_string();
        let mut overflow = Vec::new();

        for callout in callouts {
            if overflow.is_empty() && char_len(&text) + 1 + char_len(&callout) <= room {
                text.push('\n');
                text.push_str(&callout);
            } else {
                overflow.push(callout);
            }
        }
        (text, overflow)
    }
}
