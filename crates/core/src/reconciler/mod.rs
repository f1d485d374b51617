pub mod reconciler;
pub mod transition;
