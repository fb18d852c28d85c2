//! Minimal DNS message handling for captive-portal mode.
//!
//! While the device hosts its own access point every query, whatever the
//! name, is answered with the device's address. Only the first question
//! is considered; anything that is not a well-formed standard query is
//! dropped without a reply.

use std::net::Ipv4Addr;

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const OPCODE_MASK: u16 = 0x7800;

const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;

/// Answer TTL. Short, so clients re-resolve once real connectivity returns.
pub const ANSWER_TTL_SECS: u32 = 60;

/// The first question of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Dotted name without the trailing dot, e.g. `connectivitycheck.gstatic.com`.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Offset one past the question in the query message.
    end: usize,
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes = buf.get(at..at + 2)?;
    Some(u16::from_be_bytes([*bytes.first()?, *bytes.get(1)?]))
}

/// Parse the header and first question of a standard query.
pub fn parse_query(msg: &[u8]) -> Option<Question> {
    let flags = read_u16(msg, 2)?;
    let qdcount = read_u16(msg, 4)?;
    if flags & FLAG_QR != 0 || flags & OPCODE_MASK != 0 || qdcount == 0 {
        return None;
    }

    let mut pos = HEADER_LEN;
    let mut labels: Vec<String> = Vec::new();
    let mut name_len = 0usize;
    loop {
        let len = usize::from(*msg.get(pos)?);
        pos += 1;
        if len == 0 {
            break;
        }
        // Compression pointers never appear in a question we accept.
        if len > MAX_LABEL_LEN {
            return None;
        }
        name_len += len + 1;
        if name_len > MAX_NAME_LEN {
            return None;
        }
        let label = msg.get(pos..pos + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += len;
    }

    let qtype = read_u16(msg, pos)?;
    let qclass = read_u16(msg, pos + 2)?;
    Some(Question {
        name: labels.join("."),
        qtype,
        qclass,
        end: pos + 4,
    })
}

/// Build the reply to `query`, pointing every A lookup at `address`.
///
/// Non-A questions get an empty, authoritative NOERROR answer so clients
/// fall back to IPv4.
pub fn captive_response(query: &[u8], address: Ipv4Addr) -> Option<Vec<u8>> {
    let question = parse_query(query)?;
    let id = query.get(..2)?;
    let query_flags = read_u16(query, 2)?;
    let answers = question.qclass == CLASS_IN && matches!(question.qtype, TYPE_A | TYPE_ANY);

    let mut out = Vec::with_capacity(question.end + 16);
    out.extend_from_slice(id);
    let flags = FLAG_QR | FLAG_AA | FLAG_RA | (query_flags & FLAG_RD);
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    out.extend_from_slice(&u16::from(answers).to_be_bytes()); // ancount
    out.extend_from_slice(&0u16.to_be_bytes()); // nscount
    out.extend_from_slice(&0u16.to_be_bytes()); // arcount
    out.extend_from_slice(query.get(HEADER_LEN..question.end)?);

    if answers {
        // Name is a pointer back to the question at offset 12.
        out.extend_from_slice(&[0xC0, 0x0C]);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&address.octets());
    }
    Some(out)
}
