//! DNS response caching with TTL expiration
//!
//! Bounded LRU cache keyed by the question fingerprint. Entries expire after
//! the smallest record TTL (capped), negative answers after the SOA MINIMUM
//! from the authority section. Replies are re-stamped for the requesting
//! client on every hit.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{DNSClass, RData, RecordType};
use lru::LruCache;
use serde::Serialize;

use crate::message;

/// Default maximum number of cache entries
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Default cap on an entry's lifetime, bounding staleness
pub const DEFAULT_TTL_CAP: Duration = Duration::from_secs(3600);

/// Cache key: the parts of a question that select a distinct answer.
///
/// The DO bit participates because upstreams answer differently when DNSSEC
/// records are requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    name: String,
    record_type: RecordType,
    class: DNSClass,
    dnssec_ok: bool,
}

impl Fingerprint {
    /// Derive the fingerprint of a request carrying exactly one question.
    pub fn from_message(msg: &Message) -> Option<Self> {
        if msg.queries().len() != 1 {
            return None;
        }
        let query = &msg.queries()[0];
        let dnssec_ok = msg
            .extensions()
            .as_ref()
            .map_or(false, |edns| edns.flags().dnssec_ok);
        Some(Self {
            name: query.name().to_string().to_lowercase(),
            record_type: query.query_type(),
            class: query.query_class(),
            dnssec_ok,
        })
    }
}

struct CacheEntry {
    reply: Message,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Counters kept by the cache, exported through the monitoring listener.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub insertions: u64,
    pub entries: usize,
}

/// One row of a cache dump, for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDumpEntry {
    pub name: String,
    pub record_type: String,
    pub dnssec_ok: bool,
    pub rcode: String,
    pub answers: usize,
    pub remaining_secs: u64,
}

/// Bounded, TTL-aware DNS reply cache.
pub struct DnsCache {
    entries: LruCache<Fingerprint, CacheEntry>,
    ttl_cap: Duration,
    stats: CacheStats,
}

impl DnsCache {
    /// Create a cache holding at most `max_entries` replies, each for at
    /// most `ttl_cap` regardless of record TTLs.
    pub fn new(max_entries: usize, ttl_cap: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_MAX_ENTRIES).expect("nonzero default"));
        Self {
            entries: LruCache::new(capacity),
            ttl_cap,
            stats: CacheStats::default(),
        }
    }

    /// Look up a reply for `request`, re-stamped for it.
    ///
    /// Expired entries are dropped on access and never returned.
    pub fn get(&mut self, request: &Message) -> Option<Message> {
        let key = Fingerprint::from_message(request)?;
        let now = Instant::now();

        let hit = match self.entries.get(&key) {
            Some(entry) if now < entry.expires_at => {
                let elapsed = now.duration_since(entry.inserted_at).as_secs() as u32;
                Some((entry.reply.clone(), elapsed))
            }
            Some(_) => None,
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        match hit {
            Some((mut reply, elapsed)) => {
                message::restamp_reply(&mut reply, request, elapsed);
                self.stats.hits += 1;
                Some(reply)
            }
            None => {
                self.entries.pop(&key);
                self.stats.expired += 1;
                self.stats.misses += 1;
                self.stats.entries = self.entries.len();
                None
            }
        }
    }

    /// Store `reply` under `request`'s fingerprint, evicting the least
    /// recently used entry when full. Uncacheable replies are ignored.
    pub fn insert(&mut self, request: &Message, reply: &Message) {
        let Some(key) = Fingerprint::from_message(request) else {
            return;
        };
        let Some(ttl) = cacheable_ttl(reply, self.ttl_cap) else {
            return;
        };
        let now = Instant::now();
        self.entries.put(
            key,
            CacheEntry {
                reply: reply.clone(),
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
        self.stats.insertions += 1;
        self.stats.entries = self.entries.len();
    }

    /// Drop every entry, returning how many were held.
    pub fn flush(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.stats.entries = 0;
        count
    }

    /// Snapshot the cache contents for the debug endpoint.
    pub fn dump(&self) -> Vec<CacheDumpEntry> {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|(key, entry)| CacheDumpEntry {
                name: key.name.clone(),
                record_type: key.record_type.to_string(),
                dnssec_ok: key.dnssec_ok,
                rcode: entry.reply.response_code().to_string(),
                answers: entry.reply.answers().len(),
                remaining_secs: entry.expires_at.saturating_duration_since(now).as_secs(),
            })
            .collect()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the fingerprint is currently cached; used by tests.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.contains(key)
    }
}

/// How long `reply` may be cached, if at all.
///
/// Positive answers live for the smallest TTL across the answer and
/// authority sections; NXDOMAIN and NODATA live for the SOA MINIMUM when the
/// authority section carries one. A zero TTL anywhere disables caching.
fn cacheable_ttl(reply: &Message, cap: Duration) -> Option<Duration> {
    let secs = match reply.response_code() {
        ResponseCode::NoError if !reply.answers().is_empty() => reply
            .answers()
            .iter()
            .chain(reply.name_servers())
            .map(|r| r.ttl())
            .min()?,
        ResponseCode::NoError | ResponseCode::NXDomain => {
            reply.name_servers().iter().find_map(|r| match r.data() {
                RData::SOA(soa) => Some(soa.minimum()),
                _ => None,
            })?
        }
        _ => return None,
    };
    if secs == 0 {
        return None;
    }
    Some(Duration::from_secs(u64::from(secs)).min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::{A, SOA};
    use hickory_proto::rr::{Name, Record};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn query(name: &str, rtype: RecordType) -> Message {
        message::query_message(Name::from_str(name).unwrap(), rtype, false, false)
    }

    fn a_reply(request: &Message, ttl: u32) -> Message {
        let mut reply = message::reply_with_code(request, ResponseCode::NoError);
        reply.add_answer(Record::from_rdata(
            request.queries()[0].name().clone(),
            ttl,
            RData::A(A(Ipv4Addr::new(1, 2, 3, 4))),
        ));
        reply
    }

    fn nxdomain_reply(request: &Message, soa_minimum: Option<u32>) -> Message {
        let mut reply = message::reply_with_code(request, ResponseCode::NXDomain);
        if let Some(minimum) = soa_minimum {
            let zone = Name::from_str("example.com.").unwrap();
            let soa = SOA::new(
                Name::from_str("ns1.example.com.").unwrap(),
                Name::from_str("hostmaster.example.com.").unwrap(),
                2024010101,
                7200,
                3600,
                1209600,
                minimum,
            );
            reply.add_name_server(Record::from_rdata(zone, 300, RData::SOA(soa)));
        }
        reply
    }

    #[test]
    fn fingerprint_is_case_insensitive() {
        let a = Fingerprint::from_message(&query("Example.COM.", RecordType::A)).unwrap();
        let b = Fingerprint::from_message(&query("example.com.", RecordType::A)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_separates_do_bit() {
        let plain = query("example.com.", RecordType::A);
        let with_do =
            message::query_message(Name::from_str("example.com.").unwrap(), RecordType::A, false, true);
        assert_ne!(
            Fingerprint::from_message(&plain).unwrap(),
            Fingerprint::from_message(&with_do).unwrap()
        );
    }

    #[test]
    fn fingerprint_requires_single_question() {
        let mut msg = query("example.com.", RecordType::A);
        msg.add_query(Query::query(
            Name::from_str("other.com.").unwrap(),
            RecordType::A,
        ));
        assert!(Fingerprint::from_message(&msg).is_none());
    }

    #[test]
    fn hit_restamps_for_current_request() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("www.example.com.", RecordType::A);
        cache.insert(&request, &a_reply(&request, 300));

        let mut second = query("WWW.example.COM.", RecordType::A);
        second.set_id(0xABCD);
        let reply = cache.get(&second).expect("cache hit");

        assert_eq!(reply.id(), 0xABCD);
        assert_eq!(reply.queries()[0].name().to_string(), "WWW.example.COM.");
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_for_other_type() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("www.example.com.", RecordType::A);
        cache.insert(&request, &a_reply(&request, 300));

        assert!(cache.get(&query("www.example.com.", RecordType::AAAA)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn zero_ttl_is_not_cached() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("www.example.com.", RecordType::A);
        cache.insert(&request, &a_reply(&request, 0));
        assert!(cache.is_empty());
    }

    #[test]
    fn servfail_is_not_cached() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("www.example.com.", RecordType::A);
        let reply = message::reply_with_code(&request, ResponseCode::ServFail);
        cache.insert(&request, &reply);
        assert!(cache.is_empty());
    }

    #[test]
    fn nxdomain_cached_only_with_soa() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);

        let without = query("gone.example.com.", RecordType::A);
        cache.insert(&without, &nxdomain_reply(&without, None));
        assert!(cache.is_empty());

        let with = query("absent.example.com.", RecordType::A);
        cache.insert(&with, &nxdomain_reply(&with, Some(60)));
        assert_eq!(cache.len(), 1);
        let hit = cache.get(&with).expect("negative hit");
        assert_eq!(hit.response_code(), ResponseCode::NXDomain);
    }

    #[test]
    fn nodata_cached_with_soa() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("empty.example.com.", RecordType::AAAA);
        let mut reply = nxdomain_reply(&request, Some(60));
        reply.set_response_code(ResponseCode::NoError);
        cache.insert(&request, &reply);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn lru_eviction_keeps_bound() {
        let mut cache = DnsCache::new(2, DEFAULT_TTL_CAP);
        let first = query("one.example.", RecordType::A);
        let second = query("two.example.", RecordType::A);
        let third = query("three.example.", RecordType::A);

        cache.insert(&first, &a_reply(&first, 300));
        cache.insert(&second, &a_reply(&second, 300));
        cache.insert(&third, &a_reply(&third, 300));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&Fingerprint::from_message(&first).unwrap()));
        assert!(cache.contains(&Fingerprint::from_message(&third).unwrap()));
    }

    #[test]
    fn expired_entry_is_never_returned() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("short.example.", RecordType::A);
        cache.insert(&request, &a_reply(&request, 1));

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&request).is_none());
        assert_eq!(cache.stats().expired, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_cap_bounds_entry_lifetime() {
        let mut cache = DnsCache::new(16, Duration::from_secs(1));
        let request = query("long.example.", RecordType::A);
        cache.insert(&request, &a_reply(&request, 86_400));

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&request).is_none());
    }

    #[test]
    fn flush_and_dump() {
        let mut cache = DnsCache::new(16, DEFAULT_TTL_CAP);
        let request = query("www.example.com.", RecordType::A);
        cache.insert(&request, &a_reply(&request, 300));

        let dump = cache.dump();
        assert_eq!(dump.len(), 1);
        assert_eq!(dump[0].name, "www.example.com.");
        assert_eq!(dump[0].record_type, "A");
        assert!(dump[0].remaining_secs <= 300);

        assert_eq!(cache.flush(), 1);
        assert!(cache.is_empty());
    }
}
