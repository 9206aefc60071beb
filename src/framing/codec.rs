use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound for a single buffered message
pub const DEFAULT_MAX_LENGTH: usize = 10 * 1024 * 1024; // 10MB

/// Codec that splits a byte stream on a single delimiter byte
///
/// Decoding yields one `String` per delimiter-terminated segment, with the
/// delimiter stripped. Encoding appends the delimiter to the payload.
/// Invalid UTF-8 is replaced rather than rejected.
///
/// # Examples
///
/// ```
/// use tcpcom::framing::DelimiterCodec;
/// use tokio_util::codec::Decoder;
/// use bytes::BytesMut;
///
/// let mut codec = DelimiterCodec::new(b'\n');
/// let mut buf = BytesMut::from(&b"first\nsecond\nthi"[..]);
///
/// assert_eq!(codec.decode(&mut buf).unwrap(), Some("first".to_string()));
/// assert_eq!(codec.decode(&mut buf).unwrap(), Some("second".to_string()));
/// assert_eq!(codec.decode(&mut buf).unwrap(), None);
/// assert_eq!(&buf[..], b"thi");
/// ```
#[derive(Debug, Clone)]
pub struct DelimiterCodec {
    delimiter: u8,
    max_length: usize,
    // Bytes already scanned without finding a delimiter
    next_index: usize,
}

impl DelimiterCodec {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            max_length: DEFAULT_MAX_LENGTH,
            next_index: 0,
        }
    }

    /// Sets the maximum length of a message that may be buffered
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for DelimiterCodec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Decoder for DelimiterCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let start = self.next_index.min(buf.len());
        match buf[start..].iter().position(|b| *b == self.delimiter) {
            Some(offset) => {
                let end = start + offset;
                self.next_index = 0;
                let frame = buf.split_to(end + 1);
                Ok(Some(String::from_utf8_lossy(&frame[..end]).into_owned()))
            }
            None if buf.len() > self.max_length => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Message too large: {} bytes buffered, max allowed: {}",
                    buf.len(),
                    self.max_length
                ),
            )),
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // An unterminated tail is never a message
        buf.clear();
        self.next_index = 0;
        Ok(None)
    }
}

impl<T: AsRef<str>> Encoder<T> for DelimiterCodec {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), io::Error> {
        let payload = item.as_ref().as_bytes();
        dst.reserve(payload.len() + 1);
        dst.put_slice(payload);
        dst.put_u8(self.delimiter);
        Ok(())
    }
}
