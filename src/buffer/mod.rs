//! Sample storage primitives
//!
//! Two containers with different jobs: [`ScrollingBuffer`] holds the
//! plot-facing history of each series (overwrite-oldest, cheap snapshot),
//! while [`RingBuffer`] hands decoded samples between threads with
//! blocking semantics.

pub mod ring;
pub mod scrolling;

pub use ring::RingBuffer;
pub use scrolling::ScrollingBuffer;
