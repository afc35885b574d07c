// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Table driven parser and the matching deparser.
//!
//! A parser program is a list of states. Each state copies fields of the current header into
//! PHV words, selects the next state on a field of the header, and moves past the header.

use crate::packet::Packet;
use config::Chip;
use phv::{Phv, PhvError};
use tracing::{debug, trace};

/// Upper bound on states visited for one packet.
const MAX_PARSE_DEPTH: usize = 32;

// Words used by the Ethernet/IPv4/L4 program.
pub const INGRESS_PORT_WORD: usize = Phv::make_word_p(4, 0);
pub const ETHERTYPE_WORD: usize = Phv::make_word_p(4, 1);
pub const EGRESS_PORT_WORD: usize = Phv::make_word_p(4, 2);
pub const MIRROR_PORT_WORD: usize = Phv::make_word_p(4, 3);
pub const L4_SRC_PORT_WORD: usize = Phv::make_word_p(4, 7);
pub const L4_DST_PORT_WORD: usize = Phv::make_word_p(4, 8);
pub const IP_PROTO_WORD: usize = Phv::make_word_p(2, 0);
pub const DROP_WORD: usize = Phv::make_word_p(2, 1);
pub const RESUBMIT_WORD: usize = Phv::make_word_p(2, 2);
pub const IP_SRC_WORD: usize = Phv::make_word_p(0, 0);
pub const IP_DST_WORD: usize = Phv::make_word_p(0, 1);

/// Copy `bytes` bytes at `offset` of the current header into PHV `word`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extract {
    pub offset: usize,
    pub bytes: usize,
    pub word: usize,
}

/// How far a state moves into the packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shift {
    Fixed(usize),
    /// `((byte at offset >> shift) & mask) * scale`, e.g. the IPv4 IHL.
    Field {
        offset: usize,
        shift: u32,
        mask: u8,
        scale: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub value: u32,
    pub mask: u32,
    /// Next state, `None` to accept.
    pub next: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserState {
    pub name: &'static str,
    pub extracts: Vec<Extract>,
    /// `(offset, bytes)` of the field selecting the next state.
    pub select: Option<(usize, usize)>,
    pub transitions: Vec<Transition>,
    pub default_next: Option<usize>,
    pub shift: Shift,
}

/// Where an extracted field came from, for the deparser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLoc {
    pub word: usize,
    pub offset: usize,
    pub bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parsed {
    pub phv: Phv,
    pub fields: Vec<FieldLoc>,
    pub header_len: usize,
    /// The packet ended inside a header.
    pub error: bool,
}

fn read_be(data: &[u8], offset: usize, bytes: usize) -> Option<u32> {
    let end = offset.checked_add(bytes)?;
    if bytes == 0 || bytes > 4 {
        return None;
    }
    data.get(offset..end)
        .map(|b| b.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parser {
    chip: Chip,
    states: Vec<ParserState>,
    start: usize,
    /// Word receiving the ingress port.
    port_word: Option<usize>,
}

impl Parser {
    #[must_use]
    pub fn new(
        chip: Chip,
        states: Vec<ParserState>,
        start: usize,
        port_word: Option<usize>,
    ) -> Self {
        Self {
            chip,
            states,
            start,
            port_word,
        }
    }

    /// Ethernet, then IPv4, then TCP or UDP.
    #[must_use]
    pub fn ethernet_ipv4_l4(chip: Chip) -> Self {
        const ETHERNET: usize = 0;
        const IPV4: usize = 1;
        const TCP: usize = 2;
        const UDP: usize = 3;
        let ports = vec![
            Extract {
                offset: 0,
                bytes: 2,
                word: L4_SRC_PORT_WORD,
            },
            Extract {
                offset: 2,
                bytes: 2,
                word: L4_DST_PORT_WORD,
            },
        ];
        let exact = |value, next| Transition {
            value,
            mask: u32::MAX,
            next,
        };
        let states = vec![
            ParserState {
                name: "ethernet",
                extracts: vec![Extract {
                    offset: 12,
                    bytes: 2,
                    word: ETHERTYPE_WORD,
                }],
                select: Some((12, 2)),
                transitions: vec![exact(0x0800, Some(IPV4))],
                default_next: None,
                shift: Shift::Fixed(14),
            },
            ParserState {
                name: "ipv4",
                extracts: vec![
                    Extract {
                        offset: 9,
                        bytes: 1,
                        word: IP_PROTO_WORD,
                    },
                    Extract {
                        offset: 12,
                        bytes: 4,
                        word: IP_SRC_WORD,
                    },
                    Extract {
                        offset: 16,
                        bytes: 4,
                        word: IP_DST_WORD,
                    },
                ],
                select: Some((9, 1)),
                transitions: vec![exact(6, Some(TCP)), exact(17, Some(UDP))],
                default_next: None,
                shift: Shift::Field {
                    offset: 0,
                    shift: 0,
                    mask: 0xF,
                    scale: 4,
                },
            },
            ParserState {
                name: "tcp",
                extracts: ports.clone(),
                select: None,
                transitions: Vec::new(),
                default_next: None,
                shift: Shift::Field {
                    offset: 12,
                    shift: 4,
                    mask: 0xF,
                    scale: 4,
                },
            },
            ParserState {
                name: "udp",
                extracts: ports,
                select: None,
                transitions: Vec::new(),
                default_next: None,
                shift: Shift::Fixed(8),
            },
        ];
        Self::new(chip, states, ETHERNET, Some(INGRESS_PORT_WORD))
    }

    /// Parse the headers of `packet` into a fresh PHV.
    pub fn parse(&self, packet: &Packet) -> Result<Parsed, PhvError> {
        let data = &packet.data;
        let mut parsed = Parsed {
            phv: Phv::new(self.chip),
            fields: Vec::new(),
            header_len: 0,
            error: false,
        };
        if let Some(word) = self.port_word {
            parsed.phv.set(word, u32::from(packet.port))?;
        }
        let mut pos = 0;
        let mut next = Some(self.start);
        for _ in 0..MAX_PARSE_DEPTH {
            let Some(index) = next else {
                break;
            };
            let Some(state) = self.states.get(index) else {
                debug!("no parser state {index}, accepting");
                break;
            };
            trace!(state = state.name, pos, "parsing");
            for extract in &state.extracts {
                let offset = pos + extract.offset;
                let Some(value) = read_be(data, offset, extract.bytes) else {
                    debug!(state = state.name, "packet too short for extract at {offset}");
                    parsed.error = true;
                    parsed.header_len = pos;
                    return Ok(parsed);
                };
                parsed.phv.set_or(extract.word, value)?;
                parsed.fields.push(FieldLoc {
                    word: extract.word,
                    offset,
                    bytes: extract.bytes,
                });
            }
            next = match state.select {
                Some((offset, bytes)) => {
                    let value = read_be(data, pos + offset, bytes).unwrap_or(0);
                    state
                        .transitions
                        .iter()
                        .find(|t| value & t.mask == t.value & t.mask)
                        .map_or(state.default_next, |t| t.next)
                }
                None => state.default_next,
            };
            let shift = match state.shift {
                Shift::Fixed(n) => n,
                Shift::Field {
                    offset,
                    shift,
                    mask,
                    scale,
                } => data
                    .get(pos + offset)
                    .map_or(0, |b| usize::from((b >> shift) & mask) * scale),
            };
            pos = (pos + shift).min(data.len());
        }
        parsed.header_len = pos;
        Ok(parsed)
    }
}

/// What the deparser found in the PHV.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deparsed {
    pub packet: Packet,
    pub egress_port: Option<u16>,
    pub drop: bool,
    pub resubmit: bool,
    pub mirror: Option<u16>,
}

/// Writes PHV words back into the packet and reads the intrinsic metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deparser {
    pub egress_port_word: Option<usize>,
    pub drop_word: Option<usize>,
    pub resubmit_word: Option<usize>,
    pub mirror_word: Option<usize>,
}

impl Deparser {
    /// Ingress deparser of the Ethernet/IPv4/L4 program.
    #[must_use]
    pub fn ingress() -> Self {
        Self {
            egress_port_word: Some(EGRESS_PORT_WORD),
            drop_word: Some(DROP_WORD),
            resubmit_word: Some(RESUBMIT_WORD),
            mirror_word: Some(MIRROR_PORT_WORD),
        }
    }

    /// Egress deparser: the packet leaves on the port it arrived with.
    #[must_use]
    pub fn egress() -> Self {
        Self {
            drop_word: Some(DROP_WORD),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn deparse(&self, mut packet: Packet, fields: &[FieldLoc], phv: &Phv) -> Deparsed {
        for field in fields.iter().filter(|f| phv.is_valid(f.word)) {
            let value = phv.get(field.word).to_be_bytes();
            let Some(dst) = packet.data.get_mut(field.offset..field.offset + field.bytes) else {
                continue;
            };
            dst.copy_from_slice(&value[4 - field.bytes..]);
        }
        let read = |word: Option<usize>| word.filter(|w| phv.is_valid(*w)).map(|w| phv.get(w));
        Deparsed {
            egress_port: read(self.egress_port_word).map(|p| p as u16),
            drop: read(self.drop_word).is_some_and(|d| d != 0),
            resubmit: read(self.resubmit_word).is_some_and(|r| r != 0),
            mirror: read(self.mirror_word).map(|p| p as u16),
            packet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_packets_stop_parsing() {
        let parser = Parser::ethernet_ipv4_l4(Chip::Tofino);
        let mut data = vec![0u8; 20];
        data[12] = 0x08;
        let parsed = parser.parse(&Packet::new(3, &data)).expect("valid words");
        assert!(parsed.error);
        assert_eq!(parsed.header_len, 14);
        assert_eq!(parsed.phv.get(ETHERTYPE_WORD), 0x0800);
        assert_eq!(parsed.phv.get(INGRESS_PORT_WORD), 3);
    }

    #[test]
    fn non_ip_is_accepted_after_ethernet() {
        let parser = Parser::ethernet_ipv4_l4(Chip::JBay);
        let mut data = vec![0u8; 60];
        data[12] = 0x86;
        data[13] = 0xDD;
        let parsed = parser.parse(&Packet::new(0, &data)).expect("valid words");
        assert!(!parsed.error);
        assert_eq!(parsed.header_len, 14);
        assert!(!parsed.phv.is_valid(L4_SRC_PORT_WORD));
    }

    #[test]
    fn deparser_writes_back_modified_words() {
        let parser = Parser::ethernet_ipv4_l4(Chip::Tofino);
        let mut data = vec![0u8; 64];
        data[12] = 0x08;
        data[14] = 0x45;
        data[23] = 17;
        data[34..36].copy_from_slice(&[0x12, 0x34]);
        let mut parsed = parser.parse(&Packet::new(1, &data)).expect("valid words");
        assert_eq!(parsed.phv.get(L4_SRC_PORT_WORD), 0x1234);
        parsed.phv.set(L4_SRC_PORT_WORD, 0xBEEF).expect("valid word");
        parsed.phv.set(EGRESS_PORT_WORD, 9).expect("valid word");
        parsed.phv.set(RESUBMIT_WORD, 1).expect("valid word");
        let out = Deparser::ingress().deparse(Packet::new(1, &data), &parsed.fields, &parsed.phv);
        assert_eq!(out.packet.data[34..36], [0xBE, 0xEF]);
        assert_eq!(out.egress_port, Some(9));
        assert!(out.resubmit);
        assert!(!out.drop);
        assert_eq!(out.mirror, None);
    }
}
