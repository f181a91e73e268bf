//! PDF writing.
//!
//! ```text
//! Object graph changes
//!     ↓
//! [IncrementalUpdate] (new revision appended after the original bytes)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! PDF bytes
//! ```
//!
//! [`ContentStreamBuilder`] produces the operators of appearance streams.

pub mod content_stream;
pub mod incremental;
pub mod object_serializer;

pub use content_stream::{ContentStreamBuilder, ContentStreamOp};
pub use incremental::{IncrementalUpdate, WrittenUpdate};
pub use object_serializer::ObjectSerializer;
