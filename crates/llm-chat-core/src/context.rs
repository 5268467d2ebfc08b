//! Capturing the active editor's selection as chat context.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// A snapshot of selected text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionContext {
    pub text: String,
    pub source_label: String,
}

impl SelectionContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Anything that can report a label and its current selection.
pub trait EditorSurface {
    fn label(&self) -> &str;
    fn selected_text(&self) -> String;
}

/// Read the selection from the focused editor, if there is one.
///
/// No active editor is a normal empty result. A collapsed selection yields
/// an empty `text`.
pub fn capture_selection(active: Option<&dyn EditorSurface>) -> Option<SelectionContext> {
    let surface = active?;
    Some(SelectionContext {
        text: surface.selected_text(),
        source_label: surface.label().to_string(),
    })
}

/// Build the outbound message text, prefixing any attached selection.
pub fn compose_prompt(text: &str, context: Option<&SelectionContext>) -> String {
    let mut prompt = String::new();

    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("Selected code from {}:\n", context.source_label));
        prompt.push_str(&context.text);
        if !context.text.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str(text);
    prompt
}

/// Zero-based line and character (not byte) offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Anchor and active end of a selection, in either order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
}

impl Selection {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn normalized(&self) -> (Position, Position) {
        if self.start <= self.end {
            (self.start, self.end)
        } else {
            (self.end, self.start)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The host's report of the focused editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub file_name: String,
    pub text: String,
    #[serde(default)]
    pub selection: Selection,
}

impl EditorSnapshot {
    pub fn new(file_name: &str, text: &str, selection: Selection) -> Self {
        Self {
            file_name: file_name.to_string(),
            text: text.to_string(),
            selection,
        }
    }

    /// Open a file and select 1-based inclusive `lines`, or the whole file.
    pub fn from_file(path: &Path, lines: Option<(usize, usize)>) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let selection = match lines {
            Some((first, last)) => {
                if first == 0 || last < first {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("invalid line range {}:{}", first, last),
                    ));
                }
                Selection::new(Position::new(first - 1, 0), Position::new(last, 0))
            }
            None => Selection::new(Position::default(), Position::new(usize::MAX, 0)),
        };
        Ok(Self::new(&path.display().to_string(), &text, selection))
    }

    /// Clamp a position to the document and convert it to a byte offset.
    fn byte_offset(&self, pos: Position) -> usize {
        let mut line_start = 0;
        for (idx, line) in self.text.split_inclusive('\n').enumerate() {
            if idx == pos.line {
                let content = line.strip_suffix('\n').unwrap_or(line);
                let content = content.strip_suffix('\r').unwrap_or(content);
                let within = content
                    .char_indices()
                    .nth(pos.character)
                    .map(|(i, _)| i)
                    .unwrap_or(content.len());
                return line_start + within;
            }
            line_start += line.len();
        }
        self.text.len()
    }
}

impl EditorSurface for EditorSnapshot {
    fn label(&self) -> &str {
        &self.file_name
    }

    fn selected_text(&self) -> String {
        let (start, end) = self.selection.normalized();
        self.text[self.byte_offset(start)..self.byte_offset(end)].to_string()
    }
}
