//! Helpers over hickory messages shared by both front-ends.
//!
//! The wire codec itself lives in `hickory-proto`; this module adds the
//! handful of operations the bridge needs on top of it: canned replies for
//! error RCODEs, query construction, UDP truncation, and the re-stamping of
//! cached replies for the request currently being served.

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};

use crate::error::Result;

/// Largest DNS message we will carry on any transport.
pub const MAX_WIRE_SIZE: usize = 65_535;

/// UDP payload size assumed for clients that do not speak EDNS(0).
pub const DEFAULT_UDP_PAYLOAD: usize = 512;

/// Payload size advertised on queries we originate.
pub const ADVERTISED_UDP_PAYLOAD: u16 = 4096;

/// Build a header-only reply to `request` carrying the given response code.
///
/// The reply echoes the transaction ID, opcode, RD flag and question section
/// so the client can correlate it; no records are attached.
pub fn reply_with_code(request: &Message, code: ResponseCode) -> Message {
    let mut reply = Message::new();
    reply.set_id(request.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(request.op_code());
    reply.set_recursion_desired(request.recursion_desired());
    reply.set_recursion_available(true);
    reply.set_response_code(code);
    reply.add_queries(request.queries().to_vec());
    reply
}

/// Build a fresh query message for `name`/`rtype`, as used when a DoH
/// request arrives in a form that carries no wire message of its own.
pub fn query_message(name: Name, rtype: RecordType, cd: bool, dnssec_ok: bool) -> Message {
    let mut msg = Message::new();
    msg.set_id(rand::random());
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    msg.set_checking_disabled(cd);
    msg.add_query(Query::query(name, rtype));
    if dnssec_ok {
        let mut edns = Edns::new();
        edns.set_max_payload(ADVERTISED_UDP_PAYLOAD);
        edns.set_dnssec_ok(true);
        *msg.extensions_mut() = Some(edns);
    }
    msg
}

/// The largest UDP reply `request`'s sender can take, per its EDNS OPT.
pub fn max_udp_payload(request: &Message) -> usize {
    match request.extensions() {
        Some(edns) => (edns.max_payload() as usize).clamp(DEFAULT_UDP_PAYLOAD, MAX_WIRE_SIZE),
        None => DEFAULT_UDP_PAYLOAD,
    }
}

/// Encode `reply` for a UDP client that accepts at most `max_size` bytes.
///
/// Oversized replies are truncated section by section (additionals first,
/// then authorities, then answers) and marked TC so the client can retry
/// over TCP.
pub fn encode_for_udp(reply: &Message, max_size: usize) -> Result<Vec<u8>> {
    let wire = reply.to_vec()?;
    if wire.len() <= max_size {
        return Ok(wire);
    }

    let mut trimmed = reply.clone();
    trimmed.set_truncated(true);
    trimmed.take_additionals();
    let wire = trimmed.to_vec()?;
    if wire.len() <= max_size {
        return Ok(wire);
    }
    trimmed.take_name_servers();
    let wire = trimmed.to_vec()?;
    if wire.len() <= max_size {
        return Ok(wire);
    }
    trimmed.take_answers();
    Ok(trimmed.to_vec()?)
}

/// Re-stamp a stored reply for the request currently being answered.
///
/// The transaction ID, RD flag and question section (including its case) are
/// taken from `request`; record TTLs are decremented by `elapsed` seconds
/// and clamped at zero. The OPT pseudo-record is untouched because hickory
/// keeps it out of the additionals section.
pub fn restamp_reply(reply: &mut Message, request: &Message, elapsed: u32) {
    reply.set_id(request.id());
    reply.set_recursion_desired(request.recursion_desired());
    reply.take_queries();
    reply.add_queries(request.queries().to_vec());

    if elapsed == 0 {
        return;
    }
    let mut answers = reply.take_answers();
    for record in &mut answers {
        record.set_ttl(record.ttl().saturating_sub(elapsed));
    }
    reply.insert_answers(answers);

    let mut authorities = reply.take_name_servers();
    for record in &mut authorities {
        record.set_ttl(record.ttl().saturating_sub(elapsed));
    }
    reply.insert_name_servers(authorities);

    let mut additionals = reply.take_additionals();
    for record in &mut additionals {
        record.set_ttl(record.ttl().saturating_sub(elapsed));
    }
    reply.insert_additionals(additionals);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, TXT};
    use hickory_proto::rr::{RData, Record};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn sample_query(name: &str) -> Message {
        let mut msg = query_message(Name::from_str(name).unwrap(), RecordType::A, false, false);
        msg.set_id(0x1234);
        msg
    }

    #[test]
    fn reply_with_code_echoes_request() {
        let request = sample_query("www.example.com.");
        let reply = reply_with_code(&request, ResponseCode::NotImp);

        assert_eq!(reply.id(), 0x1234);
        assert_eq!(reply.response_code(), ResponseCode::NotImp);
        assert_eq!(reply.queries(), request.queries());
        assert!(reply.answers().is_empty());
    }

    #[test]
    fn max_udp_payload_defaults_without_edns() {
        let mut request = Message::new();
        request.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        assert_eq!(max_udp_payload(&request), DEFAULT_UDP_PAYLOAD);
    }

    #[test]
    fn max_udp_payload_reads_edns() {
        let mut request = Message::new();
        let mut edns = Edns::new();
        edns.set_max_payload(1400);
        *request.extensions_mut() = Some(edns);
        assert_eq!(max_udp_payload(&request), 1400);

        // Values below 512 are treated as 512.
        let mut edns = Edns::new();
        edns.set_max_payload(100);
        *request.extensions_mut() = Some(edns);
        assert_eq!(max_udp_payload(&request), DEFAULT_UDP_PAYLOAD);
    }

    #[test]
    fn oversized_reply_is_truncated_with_tc() {
        let request = sample_query("big.example.com.");
        let mut reply = reply_with_code(&request, ResponseCode::NoError);
        let name = Name::from_str("big.example.com.").unwrap();
        for _ in 0..64 {
            let strings = vec!["x".repeat(80)];
            reply.add_answer(Record::from_rdata(
                name.clone(),
                300,
                RData::TXT(TXT::new(strings)),
            ));
        }

        let wire = encode_for_udp(&reply, DEFAULT_UDP_PAYLOAD).unwrap();
        assert!(wire.len() <= DEFAULT_UDP_PAYLOAD);
        let decoded = Message::from_vec(&wire).unwrap();
        assert!(decoded.truncated());
    }

    #[test]
    fn small_reply_is_untouched() {
        let request = sample_query("www.example.com.");
        let mut reply = reply_with_code(&request, ResponseCode::NoError);
        reply.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::new(1, 2, 3, 4))),
        ));

        let wire = encode_for_udp(&reply, DEFAULT_UDP_PAYLOAD).unwrap();
        let decoded = Message::from_vec(&wire).unwrap();
        assert!(!decoded.truncated());
        assert_eq!(decoded.answers().len(), 1);
    }

    #[test]
    fn restamp_rewrites_id_rd_and_question_case() {
        let stored_request = sample_query("www.example.com.");
        let mut reply = reply_with_code(&stored_request, ResponseCode::NoError);
        reply.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::A(A(Ipv4Addr::new(1, 2, 3, 4))),
        ));

        let mut current = query_message(
            Name::from_str("WWW.Example.COM.").unwrap(),
            RecordType::A,
            false,
            false,
        );
        current.set_id(0xBEEF);
        current.set_recursion_desired(false);

        restamp_reply(&mut reply, &current, 120);

        assert_eq!(reply.id(), 0xBEEF);
        assert!(!reply.recursion_desired());
        assert_eq!(
            reply.queries()[0].name().to_string(),
            "WWW.Example.COM."
        );
        assert_eq!(reply.answers()[0].ttl(), 180);
    }

    #[test]
    fn wire_encoding_round_trips() {
        let request = sample_query("www.example.com.");
        let mut reply = reply_with_code(&request, ResponseCode::NoError);
        reply.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::A(A(Ipv4Addr::new(93, 184, 216, 34))),
        ));
        reply.add_name_server(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            3600,
            RData::TXT(TXT::new(vec!["ns-note".to_string()])),
        ));
        let mut edns = Edns::new();
        edns.set_max_payload(1232);
        edns.set_dnssec_ok(true);
        *reply.extensions_mut() = Some(edns);

        let decoded = Message::from_vec(&reply.to_vec().unwrap()).unwrap();

        assert_eq!(decoded.id(), reply.id());
        assert_eq!(decoded.response_code(), ResponseCode::NoError);
        assert_eq!(decoded.queries(), reply.queries());
        assert_eq!(decoded.answers(), reply.answers());
        assert_eq!(decoded.name_servers(), reply.name_servers());
        let edns = decoded.extensions().as_ref().expect("EDNS survives");
        assert_eq!(edns.max_payload(), 1232);
        assert!(edns.flags().dnssec_ok);
    }

    #[test]
    fn restamp_clamps_ttl_at_zero() {
        let request = sample_query("www.example.com.");
        let mut reply = reply_with_code(&request, ResponseCode::NoError);
        reply.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            30,
            RData::A(A(Ipv4Addr::new(1, 2, 3, 4))),
        ));

        restamp_reply(&mut reply, &request, 3600);
        assert_eq!(reply.answers()[0].ttl(), 0);
    }
}
