//! Control markers in model output.
//!
//! Two kinds of markers matter to the client:
//!
//! - reasoning delimiters: `<think>` is emitted before the first reasoning
//!   text of a backend query and `</think>` before the first answer text
//!   after it (or at the end of the query if none follows);
//! - the final-output marker `</final_output>`, which the model uses to say
//!   it has a complete answer. It is removed from visible text and history,
//!   and its presence is reported as [`MarkerEvent::Final`].
//!
//! Streamed text may split a marker across fragments, so the scanner holds
//! back a trailing partial prefix of the marker until the next fragment or
//! the end of the stream decides it.

use lyra_core::provider::StreamFragment;

pub const FINAL_MARKER: &str = "</final_output>";
pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerEvent {
    ThinkingStart,
    Thinking(String),
    ThinkingEnd,
    Text(String),
    Final,
}

/// Remove every final marker from a complete text.
///
/// Returns the cleaned text and whether a marker was present.
pub fn strip_final_marker(text: &str) -> (String, bool) {
    if text.contains(FINAL_MARKER) {
        (text.replace(FINAL_MARKER, ""), true)
    } else {
        (text.to_string(), false)
    }
}

/// Incremental final-marker scanner.
#[derive(Debug, Default)]
pub struct FinalMarkerScanner {
    pending: String,
}

impl FinalMarkerScanner {
    pub fn push(&mut self, text: &str, out: &mut Vec<MarkerEvent>) {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(text);

        while let Some(idx) = buf.find(FINAL_MARKER) {
            if idx > 0 {
                out.push(MarkerEvent::Text(buf[..idx].to_string()));
            }
            out.push(MarkerEvent::Final);
            buf.drain(..idx + FINAL_MARKER.len());
        }

        let held = partial_marker_suffix(&buf);
        self.pending = buf.split_off(buf.len() - held);
        if !buf.is_empty() {
            out.push(MarkerEvent::Text(buf));
        }
    }

    /// Release any held-back text.
    pub fn finish(&mut self, out: &mut Vec<MarkerEvent>) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            out.push(MarkerEvent::Text(pending));
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the
/// marker. The marker is ASCII, so the split point is a char boundary.
fn partial_marker_suffix(text: &str) -> usize {
    (1..FINAL_MARKER.len())
        .rev()
        .find(|&k| text.ends_with(&FINAL_MARKER[..k]))
        .unwrap_or(0)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ThinkingState {
    #[default]
    NotStarted,
    Thinking,
    Finished,
}

/// Turns the fragments of one backend query into marker events.
#[derive(Debug, Default)]
pub struct FragmentScanner {
    thinking: ThinkingState,
    finals: FinalMarkerScanner,
}

impl FragmentScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &StreamFragment) -> Vec<MarkerEvent> {
        let mut out = Vec::new();

        if let Some(thinking) = fragment.thinking.as_deref().filter(|t| !t.is_empty()) {
            if self.thinking == ThinkingState::NotStarted {
                self.thinking = ThinkingState::Thinking;
                out.push(MarkerEvent::ThinkingStart);
            }
            out.push(MarkerEvent::Thinking(thinking.to_string()));
        }

        if !fragment.content.is_empty() {
            if self.thinking == ThinkingState::Thinking {
                self.thinking = ThinkingState::Finished;
                out.push(MarkerEvent::ThinkingEnd);
            }
            self.finals.push(&fragment.content, &mut out);
        }

        out
    }

    /// End of the query: flush held text and close an open reasoning block.
    pub fn finish(&mut self) -> Vec<MarkerEvent> {
        let mut out = Vec::new();
        self.finals.finish(&mut out);
        if self.thinking == ThinkingState::Thinking {
            self.thinking = ThinkingState::Finished;
            out.push(MarkerEvent::ThinkingEnd);
        }
        out
    }
}

/// Marker events folded into what the client sees.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Visible text, with reasoning delimiters and without the final marker
    pub content: String,
    /// Reasoning text, when any
    pub thinking: Option<String>,
    /// Whether a final marker was seen
    pub final_marker: bool,
}

impl Rendered {
    pub fn from_events(events: &[MarkerEvent]) -> Self {
        let mut rendered = Self::default();
        for event in events {
            match event {
                MarkerEvent::ThinkingStart => rendered.content.push_str(THINK_OPEN),
                MarkerEvent::ThinkingEnd => rendered.content.push_str(THINK_CLOSE),
                MarkerEvent::Text(text) => rendered.content.push_str(text),
                MarkerEvent::Thinking(text) => rendered.thinking.get_or_insert_with(String::new).push_str(text),
                MarkerEvent::Final => rendered.final_marker = true,
            }
        }
        rendered
    }

    /// Nothing to forward.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.thinking.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_text(pieces: &[&str]) -> (String, bool) {
        let mut scanner = FragmentScanner::new();
        let mut events = Vec::new();
        for piece in pieces {
            events.extend(scanner.push(&StreamFragment::text(*piece)));
        }
        events.extend(scanner.finish());
        let rendered = Rendered::from_events(&events);
        (rendered.content, rendered.final_marker)
    }

    #[test]
    fn strips_marker_from_complete_text() {
        assert_eq!(strip_final_marker("</final_output>The answer is 4."), ("The answer is 4.".into(), true));
        assert_eq!(strip_final_marker("plain"), ("plain".into(), false));
    }

    #[test]
    fn marker_inside_one_fragment() {
        assert_eq!(scan_text(&["</final_output>Hello", " world"]), ("Hello world".into(), true));
    }

    #[test]
    fn marker_split_across_fragments() {
        assert_eq!(scan_text(&["Sure. </fin", "al_out", "put>Four."]), ("Sure. Four.".into(), true));
    }

    #[test]
    fn only_the_partial_prefix_is_held_back() {
        let mut scanner = FinalMarkerScanner::default();
        let mut out = Vec::new();
        scanner.push("value </fi", &mut out);
        assert_eq!(out, vec![MarkerEvent::Text("value ".into())]);

        out.clear();
        scanner.push("sh", &mut out);
        assert_eq!(out, vec![MarkerEvent::Text("</fish".into())]);
    }

    #[test]
    fn unfinished_prefix_is_flushed_at_end() {
        assert_eq!(scan_text(&["a < b </"]), ("a < b </".into(), false));
    }

    #[test]
    fn less_than_text_is_not_swallowed() {
        let mut scanner = FinalMarkerScanner::default();
        let mut out = Vec::new();
        scanner.push("x <y", &mut out);
        assert_eq!(out, vec![MarkerEvent::Text("x <y".into())]);
    }

    #[test]
    fn thinking_is_delimited() {
        let mut scanner = FragmentScanner::new();
        let mut events = scanner.push(&StreamFragment::thinking("hmm"));
        events.extend(scanner.push(&StreamFragment::thinking(" ok")));
        events.extend(scanner.push(&StreamFragment::text("Answer")));
        events.extend(scanner.finish());

        assert_eq!(
            events,
            vec![
                MarkerEvent::ThinkingStart,
                MarkerEvent::Thinking("hmm".into()),
                MarkerEvent::Thinking(" ok".into()),
                MarkerEvent::ThinkingEnd,
                MarkerEvent::Text("Answer".into()),
            ]
        );
        let rendered = Rendered::from_events(&events);
        assert_eq!(rendered.content, "<think></think>Answer");
        assert_eq!(rendered.thinking.as_deref(), Some("hmm ok"));
    }

    #[test]
    fn open_thinking_is_closed_at_end() {
        let mut scanner = FragmentScanner::new();
        let mut events = scanner.push(&StreamFragment::thinking("still going"));
        events.extend(scanner.finish());
        assert_eq!(events.last(), Some(&MarkerEvent::ThinkingEnd));
        assert_eq!(Rendered::from_events(&events).content, "<think></think>");
    }

    #[test]
    fn no_thinking_no_delimiters() {
        assert_eq!(scan_text(&["just ", "text"]), ("just text".into(), false));
    }

    #[test]
    fn multibyte_text_near_marker() {
        assert_eq!(scan_text(&["👽 </final_", "output>ü"]), ("👽 ü".into(), true));
    }
}
