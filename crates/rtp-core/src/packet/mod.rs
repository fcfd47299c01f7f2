//! RTP packet descriptors and header parsing.
//!
//! [`parse`] is a pure validator: it never copies payload bytes, it only
//! produces an [`RtpInfo`] descriptor locating the payload inside the caller's
//! datagram. Error codes are negative and stable so they can cross FFI-style
//! boundaries unchanged.

mod profile;

pub use profile::RtpProfile;

use thiserror::Error;

/// Parser success code
pub const RTP_PARSER_OK: i32 = 0;

/// Fixed RTP header length, up to and including SSRC
pub const RTP_HEADER_LEN: usize = 12;

/// Fixed RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Parser error codes (negative, stable)
pub const RTP_PARSER_IPS: i32 = -1;
pub const RTP_PARSER_IVER: i32 = -2;
pub const RTP_PARSER_ICC: i32 = -3;
pub const RTP_PARSER_IXH: i32 = -4;
pub const RTP_PARSER_IPD: i32 = -5;

/// Code reserved by the jitter buffer for allocation failure, guaranteed
/// disjoint from every parser error.
pub const RJB_ENOMEM: i32 = RTP_PARSER_IPS - 1000;

/// Header validation failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RtpParseError {
    /// Datagram shorter than the fixed header
    #[error("datagram too short for an RTP header ({0} bytes)")]
    InvalidSize(usize),

    /// Version field is not 2
    #[error("unsupported RTP version {0}")]
    InvalidVersion(u8),

    /// CSRC list runs past the end of the datagram
    #[error("CSRC list exceeds the datagram")]
    InvalidCsrcCount,

    /// Extension header missing or running past the end of the datagram
    #[error("extension header exceeds the datagram")]
    InvalidExtension,

    /// Padding count is zero or larger than the remaining payload
    #[error("padding length is inconsistent")]
    InvalidPadding,
}

impl RtpParseError {
    /// The stable negative error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            RtpParseError::InvalidSize(_) => RTP_PARSER_IPS,
            RtpParseError::InvalidVersion(_) => RTP_PARSER_IVER,
            RtpParseError::InvalidCsrcCount => RTP_PARSER_ICC,
            RtpParseError::InvalidExtension => RTP_PARSER_IXH,
            RtpParseError::InvalidPadding => RTP_PARSER_IPD,
        }
    }
}

/// Parsed per-packet metadata. Produced by [`parse`]; never mutated
/// thereafter.
#[derive(Debug, Clone, Copy)]
pub struct RtpInfo {
    /// Payload length in bytes (padding excluded)
    pub data_size: usize,
    /// Header length: offset of the payload within the datagram
    pub data_offset: usize,
    /// Audio samples carried by the payload, per the payload-type profile
    pub nsamples: u32,
    /// 32-bit media timestamp
    pub ts: u32,
    /// 16-bit on-wire sequence number
    pub seq: u16,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Marker bit
    pub marker: bool,
    /// Payload type
    pub pt: u8,
    /// Whether payloads of this type can be concatenated sample-exactly
    pub appendable: bool,
    /// Payload-type profile, when the type is known
    pub profile: Option<&'static RtpProfile>,
}

/// Validate an RTP datagram and produce its descriptor.
pub fn parse(data: &[u8]) -> Result<RtpInfo, RtpParseError> {
    if data.len() < RTP_HEADER_LEN {
        return Err(RtpParseError::InvalidSize(data.len()));
    }
    let version = data[0] >> 6;
    if version != RTP_VERSION {
        return Err(RtpParseError::InvalidVersion(version));
    }
    let cc = (data[0] & 0x0f) as usize;
    let has_extension = data[0] & 0x10 != 0;
    let has_padding = data[0] & 0x20 != 0;
    let marker = data[1] & 0x80 != 0;
    let pt = data[1] & 0x7f;
    let seq = u16::from_be_bytes([data[2], data[3]]);
    let ts = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let mut data_offset = RTP_HEADER_LEN + cc * 4;
    if data_offset > data.len() {
        return Err(RtpParseError::InvalidCsrcCount);
    }
    if has_extension {
        if data_offset + 4 > data.len() {
            return Err(RtpParseError::InvalidExtension);
        }
        let ext_words = u16::from_be_bytes([data[data_offset + 2], data[data_offset + 3]]) as usize;
        data_offset += 4 + ext_words * 4;
        if data_offset > data.len() {
            return Err(RtpParseError::InvalidExtension);
        }
    }

    let padding = if has_padding {
        let pad = data[data.len() - 1] as usize;
        if pad == 0 || data_offset + pad > data.len() {
            return Err(RtpParseError::InvalidPadding);
        }
        pad
    } else {
        0
    };

    let data_size = data.len() - data_offset - padding;
    let profile = profile::lookup(pt);
    let (nsamples, appendable) = match profile {
        Some(p) => p.samples_for(data_size),
        None => (0, false),
    };

    Ok(RtpInfo {
        data_size,
        data_offset,
        nsamples,
        ts,
        seq,
        ssrc,
        marker,
        pt,
        appendable,
        profile,
    })
}
