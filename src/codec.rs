// Line codec for the HEOS CLI protocol
// Frames are terminated by "\r\n"; a bare "\n" is accepted on input.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const SEPARATOR: &[u8] = b"\r\n";

pub struct HeosCodec {
    max_length: usize,
    // Bytes already scanned for a newline
    next_index: usize,
}

impl Default for HeosCodec {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl HeosCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn frame_from(line: &[u8]) -> String {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        String::from_utf8_lossy(line).into_owned()
    }
}

impl Decoder for HeosCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|&b| b == b'\n') else {
                if buf.len() > self.max_length {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Frame exceeds {} bytes", self.max_length),
                    ));
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let newline_pos = self.next_index + offset;
            self.next_index = 0;
            if newline_pos > self.max_length {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Frame exceeds {} bytes", self.max_length),
                ));
            }
            let line = buf.split_to(newline_pos + 1);
            let frame = Self::frame_from(&line[..line.len() - 1]);

            // Keep-alive blank lines carry nothing
            if frame.trim().is_empty() {
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        let frame = Self::frame_from(&rest);
        if frame.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(frame))
        }
    }
}

impl Encoder<String> for HeosCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), Self::Error> {
        buf.reserve(line.len() + SEPARATOR.len());
        buf.put(line.as_bytes());
        buf.put(SEPARATOR);
        Ok(())
    }
}
