/// Longest run of bytes held without a terminator before it is handed out as a line.
pub const MAX_LINE_LEN: usize = 4096;

/// Accumulates raw reads and splits them on `\n`.
///
/// A device that never terminates its output would otherwise grow the buffer
/// without limit, so once `MAX_LINE_LEN` bytes are pending they are flushed as
/// one unterminated line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line with its terminator, or an overlong chunk.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        match self.pending.iter().position(|&b| b == b'\n') {
            Some(pos) if pos < MAX_LINE_LEN => Some(self.pending.drain(..=pos).collect()),
            _ if self.pending.len() >= MAX_LINE_LEN => {
                tracing::warn!(len = MAX_LINE_LEN, "flushing overlong line without terminator");
                Some(self.pending.drain(..MAX_LINE_LEN).collect())
            }
            _ => None,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_newline() {
        let mut buf = LineBuffer::new();
        buf.extend(b"ok\npart");
        assert_eq!(buf.take_line(), Some(b"ok\n".to_vec()));
        assert_eq!(buf.take_line(), None);
        buf.extend(b"ial\r\n");
        assert_eq!(buf.take_line(), Some(b"partial\r\n".to_vec()));
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_unterminated_output_is_capped() {
        let mut buf = LineBuffer::new();
        buf.extend(&vec![b'x'; MAX_LINE_LEN + 10]);
        let chunk = buf.take_line();
        assert_eq!(chunk.map(|c| c.len()), Some(MAX_LINE_LEN));
        assert_eq!(buf.pending_len(), 10);
        assert_eq!(buf.take_line(), None);

        buf.extend(b"\n");
        assert_eq!(buf.take_line(), Some(b"xxxxxxxxxx\n".to_vec()));
    }
}
