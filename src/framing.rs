//! Message framing strategies selectable per I/O handler at `start_io` time.

use std::sync::Arc;

/// Decodes a fixed-size header into a body length, in native byte order.
pub type HeaderDecoder = Arc<dyn Fn(&[u8]) -> usize + Send + Sync>;

/// The generalized frame function: given the bytes accumulated so far,
/// returns how many more bytes are needed before the next call, or `0` when
/// the message is complete and ready to hand to the message handler.
pub type FrameFn = Arc<dyn Fn(&[u8]) -> usize + Send + Sync>;

/// Built-in header decoder reading a 16-bit big-endian body length.
pub fn big_endian_u16_decoder() -> HeaderDecoder {
    Arc::new(|header: &[u8]| {
        let bytes: [u8; 2] = header[..2].try_into().expect("header_size must be 2 for this decoder");
        u16::from_be_bytes(bytes) as usize
    })
}

/// Builds a [`FrameFn`] implementing length-prefixed framing in terms of the
/// generalized frame function: once the accumulated buffer is exactly
/// `header_size` bytes, decode the body length from it; once more bytes
/// have been appended (the body), signal completion.
pub fn simple_variable_len_msg_frame(decoder: HeaderDecoder, header_size: usize) -> FrameFn {
    Arc::new(move |accumulated: &[u8]| {
        if accumulated.len() == header_size {
            decoder(accumulated)
        } else {
            0
        }
    })
}

/// Selects how a [`crate::tcp_io::TcpIoHandler`] or [`crate::udp_io::UdpEntity`]
/// splits incoming bytes into application messages.
#[derive(Clone)]
pub enum Framing {
    /// Read exactly `n` bytes per message. For UDP, `n` is the maximum
    /// datagram size and longer datagrams are silently truncated.
    FixedSize(usize),
    /// Accumulate until `delimiter` is found; deliver the buffer including
    /// the delimiter bytes.
    Delimiter(Vec<u8>),
    /// Read `header_size` bytes, then repeatedly consult `frame_fn` to learn
    /// how many more bytes to read, until it returns zero.
    Header { header_size: usize, frame_fn: FrameFn },
    /// No reads (TCP) / no receive loop (UDP); sends remain permitted.
    SendOnly,
}

impl std::fmt::Debug for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framing::FixedSize(n) => f.debug_tuple("FixedSize").field(n).finish(),
            Framing::Delimiter(d) => f.debug_tuple("Delimiter").field(d).finish(),
            Framing::Header { header_size, .. } => {
                f.debug_struct("Header").field("header_size", header_size).finish()
            }
            Framing::SendOnly => write!(f, "SendOnly"),
        }
    }
}

/// Convenience constructor for length-prefixed framing using the built-in
/// 16-bit big-endian decoder.
pub fn length_prefixed_u16() -> Framing {
    Framing::Header {
        header_size: 2,
        frame_fn: simple_variable_len_msg_frame(big_endian_u16_decoder(), 2),
    }
}
