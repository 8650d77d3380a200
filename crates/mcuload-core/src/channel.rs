use std::fmt;
use std::io::{self, Read, Write};

/// Largest frame either side may send.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The link to the device: send one message, then receive its reply.
///
/// Implementations own framing and transport. The loader never has more than
/// one request outstanding.
pub trait Channel {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError>;

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        (**self).send(message)
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        (**self).receive()
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        (**self).send(message)
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        (**self).receive()
    }
}

#[derive(Debug)]
pub enum ChannelError {
    Io(io::Error),
    Closed,
    FrameTooLarge { len: usize, max: usize },
    SequenceMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Io(e) => write!(f, "channel I/O error: {e}"),
            ChannelError::Closed => f.write_str("channel closed by device"),
            ChannelError::FrameTooLarge { len, max } => {
                write!(f, "frame too large: {len} > {max} bytes")
            }
            ChannelError::SequenceMismatch { expected, actual } => write!(
                f,
                "reply sequence mismatch: expected {expected}, got {actual}"
            ),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(e: io::Error) -> Self {
        ChannelError::Io(e)
    }
}

/// Frame header: sequence number and payload length, both `u32` little-endian.
pub const FRAME_HEADER_LEN: usize = 8;

pub fn write_frame(w: &mut impl Write, seq: u32, payload: &[u8]) -> Result<(), ChannelError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let len = payload.len() as u32;
    w.write_all(&seq.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Reads one frame; `Ok(None)` on a clean EOF before the header.
pub fn read_frame(r: &mut impl Read) -> Result<Option<(u32, Vec<u8>)>, ChannelError> {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    if !read_exact_or_eof(r, &mut hdr)? {
        return Ok(None);
    }
    let seq = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let len_u32 = u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    let len = usize::try_from(len_u32).unwrap_or(usize::MAX);
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    if len != 0 {
        r.read_exact(&mut payload)?;
    }
    Ok(Some((seq, payload)))
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut off = 0usize;
    while off < buf.len() {
        let n = reader.read(&mut buf[off..])?;
        if n == 0 {
            if off == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF",
            ));
        }
        off += n;
    }
    Ok(true)
}

/// [`Channel`] over a byte stream pair (serial port, pipe, socket).
///
/// Each request is stamped with a fresh sequence number and the reply must echo
/// it, which catches a device that dropped or duplicated a frame.
pub struct FramedChannel<R, W> {
    reader: R,
    writer: W,
    next_seq: u32,
    pending: Option<u32>,
}

impl<R: Read, W: Write> FramedChannel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_seq: 1,
            pending: None,
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> Channel for FramedChannel<R, W> {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        write_frame(&mut self.writer, seq, message)?;
        self.pending = Some(seq);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        let (seq, payload) = read_frame(&mut self.reader)?.ok_or(ChannelError::Closed)?;
        if let Some(expected) = self.pending.take() {
            if seq != expected {
                return Err(ChannelError::SequenceMismatch {
                    expected,
                    actual: seq,
                });
            }
        }
        Ok(payload)
    }
}
