use std::io::{self, Write};

const REPLACEMENT: &str = "\u{FFFD}";

/// Writes inbound frames to the output sink as they arrive.
///
/// A logical message may span several frames and a frame boundary may split a
/// multi-byte UTF-8 sequence. Complete characters are written and flushed
/// immediately; an incomplete trailing sequence is carried into the next
/// frame, and flushed lossily once the end-of-message frame is seen.
pub struct MessageAssembler<W: Write> {
    output: W,
    carry: Vec<u8>,
    chunk_size: usize,
}

impl<W: Write> MessageAssembler<W> {
    pub fn new(output: W, chunk_size: usize) -> Self {
        Self {
            output,
            carry: Vec::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn push_frame(&mut self, payload: &[u8], end_of_message: bool) -> io::Result<()> {
        self.carry.extend_from_slice(payload);

        loop {
            let decoded = std::str::from_utf8(&self.carry).map(|_| ());
            match decoded {
                Ok(_) => {
                    let text = std::mem::take(&mut self.carry);
                    self.write_chunked(&text)?;
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    match e.error_len() {
                        Some(invalid) => {
                            let rest = self.carry.split_off(valid + invalid);
                            let head = std::mem::replace(&mut self.carry, rest);
                            self.write_chunked(&head[..valid])?;
                            self.write_chunked(REPLACEMENT.as_bytes())?;
                        }
                        None => {
                            let tail = self.carry.split_off(valid);
                            let head = std::mem::replace(&mut self.carry, tail);
                            self.write_chunked(&head)?;
                            if end_of_message {
                                self.carry.clear();
                                self.write_chunked(REPLACEMENT.as_bytes())?;
                            }
                            break;
                        }
                    }
                }
            }
        }

        self.output.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.output
    }

    fn write_chunked(&mut self, bytes: &[u8]) -> io::Result<()> {
        for chunk in bytes.chunks(self.chunk_size) {
            self.output.write_all(chunk)?;
        }
        Ok(())
    }
}
