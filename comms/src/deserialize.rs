use std::io;

/// A value that can be rebuilt from the contents of a single frame.
pub trait Deserialize: Sized {
    /// Decodes a value out of `buf`, which must hold exactly one encoded value.
    ///
    /// # Arguments
    /// * `buf` - The frame contents, without the length prefix.
    ///
    /// # Returns
    /// The decoded value or an `InvalidData` io error.
    fn deserialize(buf: &[u8]) -> io::Result<Self>;
}
