//! MessagePack frame codec.
//!
//! MessagePack-RPC frames carry no length prefix: each message is one
//! self-delimiting MessagePack value written back to back on the stream.
//! The decoder therefore walks element headers to find where the value ends,
//! reports "need more data" until it is fully buffered, and only then hands
//! the frame to `rmpv`.

use bytes::{Buf, BufMut, BytesMut};
use rmpv::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    // ---
    Message,
    Result,
    RpcError,
};

const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;
const DEFAULT_MAX_DEPTH: usize = 1024;

/// Options applied when writing frames.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Largest encoded frame the codec will emit.
    pub max_frame_len: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Options applied when reading frames.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Largest frame the codec will buffer before giving up.
    pub max_frame_len: usize,

    /// Maximum nesting of arrays and maps.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Codec options, configured independently for each direction.
#[derive(Debug, Clone, Default)]
pub struct CodecOptions {
    pub encode: EncodeOptions,
    pub decode: DecodeOptions,
}

/// `tokio_util` codec turning a byte stream into MessagePack values and
/// messages back into bytes.
///
/// Decoding keeps a resumable scan of the frame being buffered, so a large
/// frame arriving in many small reads is walked once rather than re-parsed
/// from its first byte on every read.
#[derive(Debug, Clone, Default)]
pub struct MsgPackCodec {
    options: CodecOptions,
    scan: FrameScan,
}

impl MsgPackCodec {
    // ---

    pub fn new(options: CodecOptions) -> Self {
        Self {
            options,
            scan: FrameScan::default(),
        }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }
}

/// One MessagePack element as announced by its marker.
enum Element {
    /// Self-contained element of `len` bytes, header included.
    Atom(u64),
    /// Array or map header of `header` bytes followed by `items` elements
    /// (keys and values counted separately for maps).
    Container { header: usize, items: u64 },
}

/// Big-endian unsigned length of `width` bytes at `buf[at..]`.
fn be_len(buf: &[u8], at: usize, width: usize) -> Option<u64> {
    // ---
    let bytes = buf.get(at..at + width)?;
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Classify the element starting at `buf[0]`. `Ok(None)` means its header is
/// not fully buffered yet.
fn element(buf: &[u8]) -> Result<Option<Element>> {
    // ---
    let Some(&marker) = buf.first() else {
        return Ok(None);
    };

    let atom = |len: u64| -> Result<Option<Element>> { Ok(Some(Element::Atom(len))) };
    let sized = |width: usize, extra: u64| -> Result<Option<Element>> {
        match be_len(buf, 1, width) {
            Some(len) => Ok(Some(Element::Atom(1 + width as u64 + extra + len))),
            None => Ok(None),
        }
    };
    let container = |width: usize, per_entry: u64| -> Result<Option<Element>> {
        match be_len(buf, 1, width) {
            Some(n) => Ok(Some(Element::Container {
                header: 1 + width,
                items: n * per_entry,
            })),
            None => Ok(None),
        }
    };

    match marker {
        0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => atom(1),
        0x80..=0x8f => Ok(Some(Element::Container {
            header: 1,
            items: u64::from(marker & 0x0f) * 2,
        })),
        0x90..=0x9f => Ok(Some(Element::Container {
            header: 1,
            items: u64::from(marker & 0x0f),
        })),
        0xa0..=0xbf => atom(1 + u64::from(marker & 0x1f)),
        0xc4 | 0xd9 => sized(1, 0),
        0xc5 | 0xda => sized(2, 0),
        0xc6 | 0xdb => sized(4, 0),
        // ext: length, then a type byte, then the data
        0xc7 => sized(1, 1),
        0xc8 => sized(2, 1),
        0xc9 => sized(4, 1),
        0xca => atom(5),
        0xcb => atom(9),
        0xcc | 0xd0 => atom(2),
        0xcd | 0xd1 => atom(3),
        0xce | 0xd2 => atom(5),
        0xcf | 0xd3 => atom(9),
        0xd4 => atom(3),
        0xd5 => atom(4),
        0xd6 => atom(6),
        0xd7 => atom(10),
        0xd8 => atom(18),
        0xdc => container(2, 1),
        0xdd => container(4, 1),
        0xde => container(2, 2),
        0xdf => container(4, 2),
        0xc1 => Err(RpcError::Codec("reserved marker 0xc1".into())),
    }
}

/// Progress through the frame at the front of the read buffer.
///
/// `offset` only ever points at an element boundary that is fully buffered,
/// and the buffer only grows at its end until the frame is consumed, so the
/// scan can pick up where it stopped.
#[derive(Debug, Clone, Default)]
struct FrameScan {
    offset: usize,
    // remaining elements of each open array or map, innermost last
    open: Vec<u64>,
}

impl FrameScan {
    // ---

    /// Continue scanning `buf`. Returns the frame length once it is complete.
    fn advance(&mut self, buf: &[u8], options: &DecodeOptions) -> Result<Option<usize>> {
        // ---
        loop {
            let Some(next) = element(&buf[self.offset..])? else {
                return Ok(None);
            };

            match next {
                Element::Atom(len) => {
                    let end = self.offset as u64 + len;
                    if end > options.max_frame_len as u64 {
                        return Err(RpcError::Codec(format!(
                            "frame exceeds limit of {}",
                            options.max_frame_len
                        )));
                    }
                    if end > buf.len() as u64 {
                        return Ok(None);
                    }
                    self.offset = end as usize;
                }
                Element::Container { header, items } => {
                    self.offset += header;
                    if items > 0 {
                        if self.open.len() >= options.max_depth {
                            return Err(RpcError::Codec(format!(
                                "nesting exceeds depth limit of {}",
                                options.max_depth
                            )));
                        }
                        self.open.push(items);
                        continue;
                    }
                }
            }

            // an element just completed; close every container it finished
            loop {
                match self.open.last_mut() {
                    None => {
                        let len = self.offset;
                        *self = FrameScan::default();
                        return Ok(Some(len));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }
}

impl Decoder for MsgPackCodec {
    type Item = Value;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        // ---
        let limit = self.options.decode.max_frame_len;

        let frame_len = match self.scan.advance(&src[..], &self.options.decode) {
            Ok(Some(len)) => len,
            Ok(None) => {
                if src.len() > limit {
                    return Err(RpcError::Codec(format!(
                        "incomplete frame already {} bytes, limit is {limit}",
                        src.len()
                    )));
                }
                return Ok(None);
            }
            Err(err) => {
                self.scan = FrameScan::default();
                return Err(err);
            }
        };

        let mut frame = &src[..frame_len];
        let value = rmpv::decode::read_value_with_max_depth(&mut frame, self.options.decode.max_depth)
            .map_err(|e| RpcError::Codec(e.to_string()))?;
        if !frame.is_empty() {
            return Err(RpcError::Codec(format!(
                "frame decoded short by {} bytes",
                frame.len()
            )));
        }

        src.advance(frame_len);
        Ok(Some(value))
    }
}

impl Encoder<Message> for MsgPackCodec {
    type Error = RpcError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        // ---
        let value = item.into_value();
        let start = dst.len();
        {
            let mut writer = (&mut *dst).writer();
            rmpv::encode::write_value(&mut writer, &value)
                .map_err(|e| RpcError::Codec(e.to_string()))?;
        }

        let written = dst.len() - start;
        let limit = self.options.encode.max_frame_len;

        if written > limit {
            dst.truncate(start);
            return Err(RpcError::Codec(format!(
                "encoded frame of {written} bytes exceeds limit of {limit}"
            )));
        }
        Ok(())
    }
}
