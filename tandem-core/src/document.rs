//! The document capability consumed by the replication layer.

use crate::event::TextEvent;

/// An editable text document.
///
/// Implementations are only ever touched from one mutation context at a
/// time, so they need `Send` but not `Sync`.
pub trait Document: Send {
    /// Apply one event. On error the document must be left unchanged.
    fn apply(&mut self, event: &TextEvent) -> Result<(), ApplyError>;

    /// Full text content.
    fn content(&self) -> String;

    /// Length in chars.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An event could not be applied to the current document state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The event addresses chars past the end of the document.
    OutOfRange {
        offset: usize,
        len: usize,
        doc_len: usize,
    },
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                offset,
                len,
                doc_len,
            } => write!(
                f,
                "Range {offset}..{} out of bounds for document of length {doc_len}",
                offset.saturating_add(*len)
            ),
        }
    }
}

impl std::error::Error for ApplyError {}

/// String-backed [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
    /// Cached char count; `String::len` is bytes.
    chars: usize,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let chars = text.chars().count();
        Self { text, chars }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Byte index of the char at `offset`. `offset == chars` maps to the end.
    fn byte_index(&self, offset: usize) -> usize {
        self.text
            .char_indices()
            .nth(offset)
            .map_or(self.text.len(), |(idx, _)| idx)
    }
}

impl Document for TextBuffer {
    fn apply(&mut self, event: &TextEvent) -> Result<(), ApplyError> {
        match event {
            TextEvent::Insert { offset, text } => {
                if *offset > self.chars {
                    return Err(ApplyError::OutOfRange {
                        offset: *offset,
                        len: 0,
                        doc_len: self.chars,
                    });
                }
                let at = self.byte_index(*offset);
                self.text.insert_str(at, text);
                self.chars += text.chars().count();
            }
            TextEvent::Remove { offset, len } => {
                let end = offset.checked_add(*len);
                if end.map_or(true, |end| end > self.chars) {
                    return Err(ApplyError::OutOfRange {
                        offset: *offset,
                        len: *len,
                        doc_len: self.chars,
                    });
                }
                let start = self.byte_index(*offset);
                let stop = self.byte_index(offset + len);
                self.text.replace_range(start..stop, "");
                self.chars -= len;
            }
        }
        log::trace!("Applied {} at {}, length now {}", event.kind(), event.offset(), self.chars);
        Ok(())
    }

    fn content(&self) -> String {
        self.text.clone()
    }

    fn len(&self) -> usize {
        self.chars
    }
}
