//! Provides an immutable view on a sequence of bytes as stored in a cache.
//!
//! All values managed by a [Namespace](crate::namespace::Namespace) are wrapped in a
//! [ByteView](ByteView). Being immutable, a view can be shared freely between the local store,
//! concurrent readers and the HTTP layer without any synchronization - a reader can never observe
//! a partially updated value.
//!
//! Internally a view is backed by [Bytes](bytes::Bytes), therefore cloning a view is cheap (a
//! reference count is incremented) and never copies the underlying data.
use std::fmt;
use std::fmt::Display;

use bytes::Bytes;

use crate::lru::ByteSize;

/// Wraps an immutable sequence of bytes.
///
/// A view is created either by copying borrowed data (see [copy_from](ByteView::copy_from)) or by
/// taking ownership of an already allocated buffer (see the **From** implementations). Once
/// constructed, the contents are never modified.
///
/// # Examples
/// ```
/// # use callisto::view::ByteView;
/// let view = ByteView::copy_from(b"630");
///
/// assert_eq!(view.len(), 3);
/// assert_eq!(view.as_slice(), b"630");
/// assert_eq!(view.to_string(), "630");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates a view by copying the given bytes into a private buffer.
    ///
    /// This is the constructor to use for borrowed data of unknown origin (e.g. bytes handed in
    /// by a user supplied loader via a slice), as the view must not be affected by any later
    /// modification of the source buffer.
    pub fn copy_from(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if this view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Provides read-only access to the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Returns a copy of the underlying bytes as an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Unwraps the view into its underlying buffer without copying.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Takes ownership of an already allocated buffer without copying.
impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView { data: data.into() }
    }
}

/// Takes ownership of a shared buffer without copying (e.g. a response body received from a
/// remote peer).
impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

/// Copies the given string into a new view.
impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from(data.as_bytes())
    }
}

/// Interprets the underlying bytes as an UTF-8 string (replacing invalid sequences).
impl Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}
