//! DNS protocol - RFC 1035
//!
//! Response parsing for the whitelist snooper. Name decoding is
//! compression-pointer-aware and bounded to the message; a structural
//! violation anywhere rejects the packet.

use crate::{Error, Result};

/// DNS header size (fixed at 12 bytes)
pub const DNS_HEADER_SIZE: usize = 12;

/// Maximum decoded name length (RFC 1035 section 2.3.4)
pub const MAX_NAME_LEN: usize = 255;

/// Header flag masks
pub const FLAG_RESPONSE: u16 = 0x8000;
pub const FLAG_OPCODE: u16 = 0x7800;
pub const FLAG_RCODE: u16 = 0x000f;

/// DNS record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DnsType {
    A = 1,
    Cname = 5,
    Ptr = 12,
    Txt = 16,
    Aaaa = 28,
    Srv = 33,
    Any = 255,
}

impl DnsType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(DnsType::A),
            5 => Some(DnsType::Cname),
            12 => Some(DnsType::Ptr),
            16 => Some(DnsType::Txt),
            28 => Some(DnsType::Aaaa),
            33 => Some(DnsType::Srv),
            255 => Some(DnsType::Any),
            _ => None,
        }
    }
}

/// Parsed DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// One resource record from the answer section
#[derive(Debug, Clone)]
pub struct Answer<'a> {
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: &'a [u8],
    /// Offset of `rdata` within the whole message, for decoding
    /// compressed names inside the RDATA (CNAME targets).
    pub rdata_offset: usize,
}

/// Zero-copy view of a DNS message
#[derive(Debug)]
pub struct DnsMessage<'a> {
    buf: &'a [u8],
}

impl<'a> DnsMessage<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < DNS_HEADER_SIZE {
            return Err(Error::Parse("DNS header too short".into()));
        }
        Ok(Self { buf })
    }

    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.buf[0], self.buf[1]])
    }

    pub fn flags(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    /// A response with opcode QUERY and rcode NOERROR.
    pub fn is_plain_response(&self) -> bool {
        self.flags() & (FLAG_RESPONSE | FLAG_OPCODE | FLAG_RCODE) == FLAG_RESPONSE
    }

    pub fn question_count(&self) -> u16 {
        u16::from_be_bytes([self.buf[4], self.buf[5]])
    }

    pub fn answer_count(&self) -> u16 {
        u16::from_be_bytes([self.buf[6], self.buf[7]])
    }

    /// Parse the first question; returns it plus the offset of the
    /// section that follows.
    pub fn question(&self) -> Result<(Question, usize)> {
        let (name, offset) = parse_name(self.buf, DNS_HEADER_SIZE)?;

        if offset + 4 > self.buf.len() {
            return Err(Error::Parse("DNS question truncated".into()));
        }
        let qtype = u16::from_be_bytes([self.buf[offset], self.buf[offset + 1]]);
        let qclass = u16::from_be_bytes([self.buf[offset + 2], self.buf[offset + 3]]);

        Ok((
            Question {
                name,
                qtype,
                qclass,
            },
            offset + 4,
        ))
    }

    /// Walk the answer section starting at `offset`.
    pub fn answers(&self, offset: usize) -> AnswerIter<'a> {
        AnswerIter {
            msg: self.buf,
            offset,
            remaining: self.answer_count(),
        }
    }

    /// Decode a (possibly compressed) name at an absolute offset,
    /// e.g. a CNAME target inside an answer's RDATA.
    pub fn name_at(&self, offset: usize) -> Result<String> {
        parse_name(self.buf, offset).map(|(name, _)| name)
    }
}

/// Walks answer records; stops yielding after the first structural error.
pub struct AnswerIter<'a> {
    msg: &'a [u8],
    offset: usize,
    remaining: u16,
}

impl<'a> AnswerIter<'a> {
    pub fn next_answer(&mut self) -> Result<Option<Answer<'a>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        // Owner name, then TYPE/CLASS/TTL/RDLENGTH.
        let (_, mut offset) = parse_name(self.msg, self.offset)?;
        if offset + 10 > self.msg.len() {
            return Err(Error::Parse("DNS answer truncated".into()));
        }

        let rtype = u16::from_be_bytes([self.msg[offset], self.msg[offset + 1]]);
        let rclass = u16::from_be_bytes([self.msg[offset + 2], self.msg[offset + 3]]);
        let ttl = u32::from_be_bytes([
            self.msg[offset + 4],
            self.msg[offset + 5],
            self.msg[offset + 6],
            self.msg[offset + 7],
        ]);
        let rdlength = u16::from_be_bytes([self.msg[offset + 8], self.msg[offset + 9]]) as usize;
        offset += 10;

        if offset + rdlength > self.msg.len() {
            return Err(Error::Parse("DNS RDATA truncated".into()));
        }

        let answer = Answer {
            rtype,
            rclass,
            ttl,
            rdata: &self.msg[offset..offset + rdlength],
            rdata_offset: offset,
        };
        self.offset = offset + rdlength;

        Ok(Some(answer))
    }
}

/// Parse a domain name from DNS wire format
///
/// Handles both label format and compression pointers (RFC 1035
/// section 4.1.4). Returns the name and the offset just past it in the
/// uncompressed stream.
pub fn parse_name(buffer: &[u8], start: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut total_len = 0usize;
    let mut offset = start;
    let mut jumped = false;
    let mut final_offset = start;
    let mut jumps = 0;
    const MAX_JUMPS: usize = 128;

    loop {
        if jumps > MAX_JUMPS {
            return Err(Error::Parse("DNS name compression loop".into()));
        }

        if offset >= buffer.len() {
            return Err(Error::Parse("DNS name truncated".into()));
        }

        let len = buffer[offset] as usize;

        if len == 0 {
            if !jumped {
                final_offset = offset + 1;
            }
            break;
        } else if len & 0xC0 == 0xC0 {
            // Compression pointer
            if offset + 1 >= buffer.len() {
                return Err(Error::Parse("DNS compression pointer truncated".into()));
            }

            if !jumped {
                final_offset = offset + 2;
            }

            offset = ((len & 0x3F) << 8) | (buffer[offset + 1] as usize);
            jumped = true;
            jumps += 1;
        } else if len & 0xC0 != 0 {
            return Err(Error::Parse("DNS label type unsupported".into()));
        } else {
            offset += 1;
            if offset + len > buffer.len() {
                return Err(Error::Parse("DNS label truncated".into()));
            }

            total_len += len + 1;
            if total_len > MAX_NAME_LEN {
                return Err(Error::Parse("DNS name too long".into()));
            }

            let label = std::str::from_utf8(&buffer[offset..offset + len])
                .map_err(|_| Error::Parse("DNS label not valid UTF-8".into()))?;
            labels.push(label.to_string());
            offset += len;

            if !jumped {
                final_offset = offset;
            }
        }
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };

    Ok((name, final_offset))
}
