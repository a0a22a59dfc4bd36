use std::io;

/// A value that can be written into a single frame.
pub trait Serialize {
    /// Appends the encoded form of `self` to `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, it may already hold a length prefix.
    ///
    /// # Returns
    /// An io error if some structured part of the value couldn't be encoded.
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()>;
}
