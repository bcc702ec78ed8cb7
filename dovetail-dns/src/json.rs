//! The Google-style JSON representation of DNS messages.
//!
//! One schema serves both directions: the HTTPS front-end renders replies
//! with it, and the JSON-dialect DoH client parses upstream responses from
//! it. RDATA travels in presentation form (`"1.2.3.4"`,
//! `"10 mail.example."`); RDATA with no defined presentation uses the
//! RFC 3597 generic form `\# <length> <hex>`.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, PTR, SOA, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A DNS reply in the JSON dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsJson {
    #[serde(rename = "Status")]
    pub status: u16,
    #[serde(rename = "TC", default)]
    pub tc: bool,
    #[serde(rename = "RD", default)]
    pub rd: bool,
    #[serde(rename = "RA", default)]
    pub ra: bool,
    #[serde(rename = "AD", default)]
    pub ad: bool,
    #[serde(rename = "CD", default)]
    pub cd: bool,
    #[serde(rename = "Question", default)]
    pub question: Vec<JsonQuestion>,
    #[serde(rename = "Answer", default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Vec<JsonRecord>>,
    #[serde(rename = "Authority", default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<Vec<JsonRecord>>,
    #[serde(rename = "Additional", default, skip_serializing_if = "Option::is_none")]
    pub additional: Option<Vec<JsonRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edns_client_subnet: Option<String>,
    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonQuestion {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: u16,
    #[serde(rename = "TTL", default)]
    pub ttl: u32,
    pub data: String,
}

/// Render a DNS message as a JSON reply.
///
/// `client_subnet` is echoed verbatim when the request carried one.
pub fn message_to_json(msg: &Message, client_subnet: Option<String>) -> DnsJson {
    DnsJson {
        status: u16::from(msg.response_code()),
        tc: msg.truncated(),
        rd: msg.recursion_desired(),
        ra: msg.recursion_available(),
        ad: msg.authentic_data(),
        cd: msg.checking_disabled(),
        question: msg
            .queries()
            .iter()
            .map(|q| JsonQuestion {
                name: fqdn_string(q.name()),
                record_type: u16::from(q.query_type()),
            })
            .collect(),
        answer: records_to_json(msg.answers()),
        authority: records_to_json(msg.name_servers()),
        additional: records_to_json(msg.additionals()),
        edns_client_subnet: client_subnet,
        comment: None,
    }
}

/// Build a reply message for `request` out of a JSON response body.
///
/// The reply's ID and question come from the request; flags and records come
/// from the JSON. Records whose type has no presentation parser are skipped,
/// since the JSON dialect carries nothing to rebuild them from.
pub fn reply_from_json(request: &Message, json: &DnsJson) -> Result<Message> {
    let mut reply = Message::new();
    reply.set_id(request.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(OpCode::Query);
    reply.set_recursion_desired(request.recursion_desired());
    reply.set_recursion_available(json.ra);
    reply.set_truncated(json.tc);
    reply.set_authentic_data(json.ad);
    reply.set_checking_disabled(json.cd);
    reply.set_response_code(ResponseCode::from(
        (json.status >> 4) as u8,
        (json.status & 0x0F) as u8,
    ));
    reply.add_queries(request.queries().to_vec());

    reply.insert_answers(records_from_json(&json.answer)?);
    reply.insert_name_servers(records_from_json(&json.authority)?);
    reply.insert_additionals(records_from_json(&json.additional)?);
    Ok(reply)
}

/// Parse a `type` query parameter, which may be textual (`MX`) or numeric
/// (`15`). An empty value defaults to A.
pub fn parse_record_type(value: &str) -> Result<RecordType> {
    if value.is_empty() {
        return Ok(RecordType::A);
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        let code: u16 = value
            .parse()
            .map_err(|_| Error::Malformed(format!("invalid record type {value:?}")))?;
        return Ok(RecordType::from(code));
    }
    RecordType::from_str(&value.to_ascii_uppercase())
        .map_err(|_| Error::Malformed(format!("unknown record type {value:?}")))
}

/// Parse a boolean query parameter; accepts `1/0` and `true/false`.
pub fn parse_bool_param(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => Err(Error::Malformed(format!("invalid boolean {other:?}"))),
    }
}

fn records_to_json(records: &[Record]) -> Option<Vec<JsonRecord>> {
    if records.is_empty() {
        return None;
    }
    Some(
        records
            .iter()
            .map(|r| JsonRecord {
                name: fqdn_string(r.name()),
                record_type: u16::from(r.record_type()),
                ttl: r.ttl(),
                data: rdata_presentation(r.data()),
            })
            .collect(),
    )
}

fn records_from_json(records: &Option<Vec<JsonRecord>>) -> Result<Vec<Record>> {
    let mut out = Vec::new();
    for jr in records.iter().flatten() {
        let rtype = RecordType::from(jr.record_type);
        match rdata_from_presentation(rtype, &jr.data)? {
            Some(rdata) => out.push(Record::from_rdata(parse_name(&jr.name)?, jr.ttl, rdata)),
            None => {
                tracing::debug!(rtype = jr.record_type, "no presentation parser; skipping record")
            }
        }
    }
    Ok(out)
}

/// Presentation form of an RDATA, falling back to the RFC 3597 generic form
/// for opaque payloads.
pub fn rdata_presentation(rdata: &RData) -> String {
    match rdata {
        RData::NULL(null) => generic_form(null.anything()),
        RData::Unknown { rdata, .. } => generic_form(rdata.anything()),
        other => other.to_string(),
    }
}

fn generic_form(bytes: &[u8]) -> String {
    let mut out = format!("\\# {}", bytes.len());
    if !bytes.is_empty() {
        out.push(' ');
        for byte in bytes {
            let _ = write!(out, "{byte:02x}");
        }
    }
    out
}

/// Build an RDATA from its presentation form, for the types the JSON dialect
/// can carry faithfully. Returns `Ok(None)` for everything else.
pub fn rdata_from_presentation(rtype: RecordType, data: &str) -> Result<Option<RData>> {
    let data = data.trim();
    if data.starts_with("\\#") {
        // Generic form: the original type cannot be reconstructed.
        return Ok(None);
    }
    let rdata = match rtype {
        RecordType::A => RData::A(A(data
            .parse::<Ipv4Addr>()
            .map_err(|_| bad_rdata(rtype, data))?)),
        RecordType::AAAA => RData::AAAA(AAAA(data
            .parse::<Ipv6Addr>()
            .map_err(|_| bad_rdata(rtype, data))?)),
        RecordType::CNAME => RData::CNAME(CNAME(parse_name(data)?)),
        RecordType::NS => RData::NS(NS(parse_name(data)?)),
        RecordType::PTR => RData::PTR(PTR(parse_name(data)?)),
        RecordType::MX => {
            let (preference, exchange) = data
                .split_once(char::is_whitespace)
                .ok_or_else(|| bad_rdata(rtype, data))?;
            let preference: u16 = preference.parse().map_err(|_| bad_rdata(rtype, data))?;
            RData::MX(MX::new(preference, parse_name(exchange.trim())?))
        }
        RecordType::TXT => RData::TXT(TXT::new(parse_txt(data))),
        RecordType::SOA => {
            let fields: Vec<&str> = data.split_whitespace().collect();
            if fields.len() != 7 {
                return Err(bad_rdata(rtype, data));
            }
            let serial: u32 = fields[2].parse().map_err(|_| bad_rdata(rtype, data))?;
            let refresh: i32 = fields[3].parse().map_err(|_| bad_rdata(rtype, data))?;
            let retry: i32 = fields[4].parse().map_err(|_| bad_rdata(rtype, data))?;
            let expire: i32 = fields[5].parse().map_err(|_| bad_rdata(rtype, data))?;
            let minimum: u32 = fields[6].parse().map_err(|_| bad_rdata(rtype, data))?;
            RData::SOA(SOA::new(
                parse_name(fields[0])?,
                parse_name(fields[1])?,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            ))
        }
        RecordType::SRV => {
            let fields: Vec<&str> = data.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(bad_rdata(rtype, data));
            }
            let priority: u16 = fields[0].parse().map_err(|_| bad_rdata(rtype, data))?;
            let weight: u16 = fields[1].parse().map_err(|_| bad_rdata(rtype, data))?;
            let port: u16 = fields[2].parse().map_err(|_| bad_rdata(rtype, data))?;
            RData::SRV(SRV::new(priority, weight, port, parse_name(fields[3])?))
        }
        _ => return Ok(None),
    };
    Ok(Some(rdata))
}

fn bad_rdata(rtype: RecordType, data: &str) -> Error {
    Error::Malformed(format!("invalid {rtype} record data {data:?}"))
}

fn parse_name(s: &str) -> Result<Name> {
    Name::from_str(s).map_err(|e| Error::Malformed(format!("invalid domain name {s:?}: {e}")))
}

fn fqdn_string(name: &Name) -> String {
    let s = name.to_string();
    if s.ends_with('.') {
        s
    } else {
        format!("{s}.")
    }
}

/// Split TXT presentation data into character-strings. Quoted segments are
/// honored; bare data becomes a single string.
fn parse_txt(data: &str) -> Vec<String> {
    if !data.contains('"') {
        return vec![data.to_string()];
    }
    let mut strings = Vec::new();
    let mut rest = data;
    while let Some(start) = rest.find('"') {
        let Some(len) = rest[start + 1..].find('"') else {
            break;
        };
        strings.push(rest[start + 1..start + 1 + len].to_string());
        rest = &rest[start + len + 2..];
    }
    strings
}
