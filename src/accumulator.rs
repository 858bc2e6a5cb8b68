use crate::frame::Delta;

/// Increments one frame added to the running reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaChunk {
    pub reasoning: Option<String>,
    pub content: Option<String>,
}

/// Running `reasoning` and `content` strings of one stream session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamAccumulator {
    reasoning: String,
    content: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the frame's increments. Returns `None` when the frame carried
    /// neither reasoning nor content, in which case nothing changed.
    pub fn apply(&mut self, delta: &Delta) -> Option<DeltaChunk> {
        if delta.is_empty() {
            return None;
        }

        if let Some(reasoning) = &delta.reasoning {
            self.reasoning.push_str(reasoning);
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }

        Some(DeltaChunk {
            reasoning: delta.reasoning.clone(),
            content: delta.content.clone(),
        })
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.reasoning.len() + self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
