//! Minimal RFC 1035/6762 DNS message codec: just enough question/PTR/TXT
//! record support to run a one-shot mDNS query/response exchange. Mirrors
//! [`crate::nat::stun`]'s approach of hand-rolling a small binary protocol
//! rather than depending on a full DNS library.

use std::fmt;

const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const CLASS_IN: u16 = 1;
const FLAGS_RESPONSE: u16 = 0x8400;
const MAX_POINTER_HOPS: usize = 16;

#[derive(Debug)]
pub enum WireError {
    Truncated,
    BadPointer,
    BadLabel,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "dns message truncated"),
            WireError::BadPointer => write!(f, "dns name compression pointer out of range"),
            WireError::BadLabel => write!(f, "dns label exceeds 63 bytes"),
        }
    }
}

impl std::error::Error for WireError {}

pub struct Question {
    pub name: String,
}

pub struct ResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub rdata: Vec<u8>,
}

pub struct TxtRecord {
    pub name: String,
    pub strings: Vec<String>,
}

pub struct Message {
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    flags: u16,
    ttl: u32,
}

impl Message {
    pub fn query(service_name: &str) -> Self {
        Message {
            questions: vec![Question { name: service_name.to_string() }],
            answers: Vec::new(),
            flags: 0,
            ttl: 0,
        }
    }

    pub fn announcement(service_name: &str, instance_name: &str, txt_strings: &[String], ttl: u32) -> Self {
        let mut rdata = Vec::new();
        for s in txt_strings {
            write_char_string(&mut rdata, s);
        }
        Message {
            questions: Vec::new(),
            answers: vec![
                ResourceRecord { name: service_name.to_string(), rtype: TYPE_PTR, rdata: encode_name(instance_name) },
                ResourceRecord { name: instance_name.to_string(), rtype: TYPE_TXT, rdata },
            ],
            flags: FLAGS_RESPONSE,
            ttl,
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    pub fn txt_records(&self) -> Vec<TxtRecord> {
        self.answers
            .iter()
            .filter(|rr| rr.rtype == TYPE_TXT)
            .filter_map(|rr| read_char_strings(&rr.rdata).ok().map(|strings| TxtRecord { name: rr.name.clone(), strings }))
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        out[2..4].copy_from_slice(&self.flags.to_be_bytes());
        out[4..6].copy_from_slice(&(self.questions.len() as u16).to_be_bytes());
        out[6..8].copy_from_slice(&(self.answers.len() as u16).to_be_bytes());

        for q in &self.questions {
            out.extend_from_slice(&encode_name(&q.name));
            out.extend_from_slice(&TYPE_PTR.to_be_bytes());
            out.extend_from_slice(&CLASS_IN.to_be_bytes());
        }
        for rr in &self.answers {
            out.extend_from_slice(&encode_name(&rr.name));
            out.extend_from_slice(&rr.rtype.to_be_bytes());
            out.extend_from_slice(&CLASS_IN.to_be_bytes());
            out.extend_from_slice(&self.ttl.to_be_bytes());
            out.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
            out.extend_from_slice(&rr.rdata);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 12 {
            return Err(WireError::Truncated);
        }
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;
        let nscount = u16::from_be_bytes([buf[8], buf[9]]) as usize;
        let arcount = u16::from_be_bytes([buf[10], buf[11]]) as usize;

        let mut offset = 12;
        let mut questions = Vec::with_capacity(qdcount);
        for _ in 0..qdcount {
            let (name, next) = decode_name(buf, offset)?;
            offset = next + 4; // qtype + qclass
            if offset > buf.len() {
                return Err(WireError::Truncated);
            }
            questions.push(Question { name });
        }

        let mut answers = Vec::with_capacity(ancount);
        for _ in 0..ancount + nscount + arcount {
            let (name, next) = decode_name(buf, offset)?;
            offset = next;
            if offset + 10 > buf.len() {
                return Err(WireError::Truncated);
            }
            let rtype = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let rdlength = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]) as usize;
            offset += 10;
            if offset + rdlength > buf.len() {
                return Err(WireError::Truncated);
            }
            let rdata = buf[offset..offset + rdlength].to_vec();
            offset += rdlength;
            answers.push(ResourceRecord { name, rtype, rdata });
        }

        Ok(Message { questions, answers, flags, ttl: 0 })
    }
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        let bytes = label.as_bytes();
        out.push(bytes.len().min(63) as u8);
        out.extend_from_slice(&bytes[..bytes.len().min(63)]);
    }
    out.push(0);
    out
}

/// Decode a domain name starting at `offset`, following compression pointers
/// (RFC 1035 §4.1.4). Returns the decoded name and the offset immediately
/// after the name *as it appears in the message* (i.e. after the first
/// pointer encountered, not after whatever it points to).
fn decode_name(buf: &[u8], offset: usize) -> Result<(String, usize), WireError> {
    let mut labels = Vec::new();
    let mut cursor = offset;
    let mut end_offset = None;
    let mut hops = 0;

    loop {
        if cursor >= buf.len() {
            return Err(WireError::Truncated);
        }
        let len = buf[cursor];
        if len == 0 {
            if end_offset.is_none() {
                end_offset = Some(cursor + 1);
            }
            break;
        }
        if len & 0xC0 == 0xC0 {
            if cursor + 1 >= buf.len() {
                return Err(WireError::Truncated);
            }
            if end_offset.is_none() {
                end_offset = Some(cursor + 2);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(WireError::BadPointer);
            }
            let pointer = (((len & 0x3F) as usize) << 8) | buf[cursor + 1] as usize;
            if pointer >= buf.len() {
                return Err(WireError::BadPointer);
            }
            cursor = pointer;
            continue;
        }
        if len & 0xC0 != 0 {
            return Err(WireError::BadLabel);
        }
        let label_len = len as usize;
        let start = cursor + 1;
        let stop = start + label_len;
        if stop > buf.len() {
            return Err(WireError::Truncated);
        }
        labels.push(String::from_utf8_lossy(&buf[start..stop]).into_owned());
        cursor = stop;
    }

    Ok((labels.join("."), end_offset.unwrap_or(cursor)))
}

fn write_char_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(255);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
}

fn read_char_strings(mut rdata: &[u8]) -> Result<Vec<String>, WireError> {
    let mut strings = Vec::new();
    while !rdata.is_empty() {
        let len = rdata[0] as usize;
        if 1 + len > rdata.len() {
            return Err(WireError::Truncated);
        }
        strings.push(String::from_utf8_lossy(&rdata[1..1 + len]).into_owned());
        rdata = &rdata[1 + len..];
    }
    Ok(strings)
}
