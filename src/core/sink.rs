//! Presentation boundary

use crate::core::view::ViewState;

/// Receives every recomputed view.
///
/// May be called from any tokio worker thread; implementations hand the state over
/// to their own rendering context.
pub trait PresentationSink: Send + Sync {
    fn render(&self, view: &ViewState);
}

/// Sink that drops every update. Useful for one-shot commands.
pub struct NullSink;

impl PresentationSink for NullSink {
    fn render(&self, _view: &ViewState) {}
}
