//! Pure markdown-to-HTML stream post-processor (spec §4.6).
//!
//! One [`Augmenter`] lives per `Subscription`, not per `Process` — two
//! subscribers watching the same process augment independently, which is
//! what lets a late joiner catch up without replaying the other
//! subscriber's throttle state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pulldown_cmark::{html, Parser};
use serde::{Deserialize, Serialize};

/// Minimum gap between `pending` emissions for the same block.
pub const PENDING_THROTTLE: Duration = Duration::from_millis(50);

/// Render a complete markdown string to HTML. Pure; no accumulator state.
#[must_use]
pub fn render_markdown(text: &str) -> String {
    let parser = Parser::new(text);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// One of the two events `Augmenter` emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AugmentedBlock {
    /// A block is still accumulating; throttled to at most one per
    /// [`PENDING_THROTTLE`] window.
    Pending {
        /// Rendered HTML of the text seen so far.
        html: String,
    },
    /// A block finished (the owning message reached its `assistant`
    /// final form).
    MarkdownAugment {
        /// The message this block belongs to.
        message_id: Option<String>,
        /// The block's index within that message's content array.
        block_index: Option<u32>,
        /// Rendered HTML of the final text.
        html: String,
    },
}

struct BlockState {
    last_rendered_at: Option<Instant>,
}

/// Per-subscription accumulator. Holds no text itself — the Process already
/// owns the authoritative accumulated text via `getStreamingContent()`;
/// this only tracks each block's throttle clock.
#[derive(Default)]
pub struct Augmenter {
    blocks: HashMap<(String, u32), BlockState>,
}

impl Augmenter {
    /// Create a fresh augmenter with no throttle history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one update to a still-accumulating block. Returns `Some`
    /// only when the throttle window has elapsed since this block's last
    /// emission (or this is its first update).
    pub fn process_partial(&mut self, message_id: &str, block_index: u32, accumulated_text: &str) -> Option<AugmentedBlock> {
        let key = (message_id.to_owned(), block_index);
        let now = Instant::now();
        let state = self.blocks.entry(key).or_insert_with(|| BlockState { last_rendered_at: None });

        let due = match state.last_rendered_at {
            None => true,
            Some(last) => now.duration_since(last) >= PENDING_THROTTLE,
        };
        if !due {
            return None;
        }
        state.last_rendered_at = Some(now);
        Some(AugmentedBlock::Pending { html: render_markdown(accumulated_text) })
    }

    /// A block (and its owning message) reached final form. Always emits,
    /// bypassing the throttle, and drops the block's throttle state since
    /// it will never be updated again.
    pub fn process_final(&mut self, message_id: Option<String>, block_index: Option<u32>, final_text: &str) -> AugmentedBlock {
        if let (Some(id), Some(idx)) = (&message_id, block_index) {
            let _ = self.blocks.remove(&(id.clone(), idx));
        }
        AugmentedBlock::MarkdownAugment {
            message_id,
            block_index,
            html: render_markdown(final_text),
        }
    }

    /// A subscriber joined mid-stream: synthesize a single `pending` event
    /// from the Process's current `getStreamingContent()` snapshot so the
    /// new subscriber sees progress immediately, bypassing the throttle.
    #[must_use]
    pub fn process_catch_up(accumulated_text: &str, _message_id: &str) -> AugmentedBlock {
        AugmentedBlock::Pending { html: render_markdown(accumulated_text) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn render_markdown_basic() {
        let html = render_markdown("# hi\n\nthere");
        assert!(html.contains("<h1>hi</h1>"));
        assert!(html.contains("<p>there</p>"));
    }

    #[test]
    fn first_partial_always_emits() {
        let mut aug = Augmenter::new();
        let event = aug.process_partial("m1", 0, "hello").unwrap();
        assert!(matches!(event, AugmentedBlock::Pending { .. }));
    }

    #[test]
    fn rapid_partials_are_throttled() {
        let mut aug = Augmenter::new();
        assert!(aug.process_partial("m1", 0, "a").is_some());
        assert!(aug.process_partial("m1", 0, "ab").is_none());
    }

    #[test]
    fn partial_emits_again_after_throttle_window() {
        let mut aug = Augmenter::new();
        assert!(aug.process_partial("m1", 0, "a").is_some());
        sleep(PENDING_THROTTLE + Duration::from_millis(10));
        assert!(aug.process_partial("m1", 0, "ab").is_some());
    }

    #[test]
    fn distinct_blocks_throttle_independently() {
        let mut aug = Augmenter::new();
        assert!(aug.process_partial("m1", 0, "a").is_some());
        assert!(aug.process_partial("m1", 1, "b").is_some());
    }

    #[test]
    fn final_block_always_emits_and_clears_throttle_state() {
        let mut aug = Augmenter::new();
        assert!(aug.process_partial("m1", 0, "a").is_some());
        assert!(aug.process_partial("m1", 0, "ab").is_none());
        let event = aug.process_final(Some("m1".into()), Some(0), "ab");
        assert!(matches!(event, AugmentedBlock::MarkdownAugment { ref html, .. } if html.contains("ab")));
        assert!(aug.process_partial("m1", 0, "abc").is_some());
    }

    #[test]
    fn catch_up_renders_accumulated_text_immediately() {
        let event = Augmenter::process_catch_up("partial **bold**", "m1");
        assert!(matches!(event, AugmentedBlock::Pending { html } if html.contains("<strong>bold</strong>")));
    }
}
