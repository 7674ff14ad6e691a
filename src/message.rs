//! Wire frame codec: encode/decode, lazy timestamp, lazy content hash.

use std::net::{SocketAddrV4, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::subject::Subject;

/// The two-byte field separator. Not a NUL byte — this is the literal ASCII
/// sequence `\0` (backslash, digit zero), preserved for wire compatibility.
pub const SEP: &[u8; 2] = b"\\0";

/// A published record. Immutable from the application's perspective once
/// published; the sender mutates only the cached timestamp and the receiver
/// mutates only the cached content hash, both behind `self.cache`.
#[derive(Debug)]
pub struct Message {
    pub stream: String,
    pub subject: Subject,
    pub data: Vec<u8>,
    pub interval: Duration,
    cache: Mutex<Cache>,
}

#[derive(Default)]
struct Cache {
    timestamp_micros: Option<i64>,
    hash: Option<[u8; 32]>,
}

impl Message {
    pub fn new(stream: impl Into<String>, subject: Subject, data: Vec<u8>, interval: Duration) -> Self {
        Self {
            stream: stream.into(),
            subject,
            data,
            interval,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Validate the fields required before publish: non-empty stream,
    /// non-empty wildcard-free subject.
    pub fn validate(&self) -> Result<()> {
        if self.stream.is_empty() {
            return Err(Error::StreamEmpty);
        }
        if self.subject.is_empty() {
            return Err(Error::SubjectEmpty);
        }
        self.subject.reject_wildcard()?;
        Ok(())
    }

    /// The timestamp assigned on first transmission, cached thereafter.
    pub fn timestamp_micros(&self) -> i64 {
        let mut cache = self.cache.lock();
        *cache.timestamp_micros.get_or_insert_with(now_micros)
    }

    /// SHA-256 over `stream || canonical-subject || data`, cached on first
    /// computation. Depends only on (stream, subject, data) — stable across
    /// re-encoding.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut cache = self.cache.lock();
        *cache.hash.get_or_insert_with(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.stream.as_bytes());
            hasher.update(self.subject.canonical().as_bytes());
            hasher.update(&self.data);
            hasher.finalize().into()
        })
    }

    /// Encode the wire frame, assigning a timestamp on first call.
    pub fn encode(&self) -> Vec<u8> {
        let ts = self.timestamp_micros();
        let subject = self.subject.canonical();

        let mut out = Vec::with_capacity(8 + self.stream.len() + subject.len() + self.data.len() + 4);
        out.extend_from_slice(&ts.to_be_bytes());
        out.extend_from_slice(self.stream.as_bytes());
        out.extend_from_slice(SEP);
        out.extend_from_slice(subject.as_bytes());
        out.extend_from_slice(SEP);
        out.extend_from_slice(&self.data);
        out
    }

    /// Encode and write the frame to `socket`, targeting `addr`.
    pub fn send(&self, socket: &UdpSocket, addr: SocketAddrV4) -> Result<()> {
        let frame = self.encode();
        socket
            .send_to(&frame, addr)
            .map(|_| ())
            .map_err(Error::Write)
    }

    /// Decode a wire frame. Rejects wildcard subjects (a decoded message is
    /// always a concrete publish, never a subscription pattern).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 8 {
            return Err(Error::InvalidSize { len: payload.len() });
        }

        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&payload[..8]);
        let timestamp_micros = i64::from_be_bytes(ts_bytes);

        let body = &payload[8..];
        let fields = split_n(body, SEP, 3);
        let [stream_bytes, subject_bytes, data] = fields.as_slice() else {
            return Err(Error::InvalidFormat);
        };

        let stream = String::from_utf8_lossy(stream_bytes).into_owned();
        let subject_str = String::from_utf8_lossy(subject_bytes).into_owned();
        let subject = Subject::parse(&subject_str)?;
        subject.reject_wildcard()?;

        let msg = Self {
            stream,
            subject,
            data: data.to_vec(),
            interval: Duration::from_secs(1),
            cache: Mutex::new(Cache {
                timestamp_micros: Some(timestamp_micros),
                hash: None,
            }),
        };

        Ok(msg)
    }
}

/// Split `haystack` on the first `max_parts - 1` occurrences of `sep`,
/// returning up to `max_parts` slices; the final slice contains any
/// remaining `sep` occurrences verbatim (mirrors Go's `bytes.SplitN`).
fn split_n<'a>(haystack: &'a [u8], sep: &[u8], max_parts: usize) -> Vec<&'a [u8]> {
    let mut out = Vec::with_capacity(max_parts);
    let mut rest = haystack;

    while out.len() + 1 < max_parts {
        match find(rest, sep) {
            Some(idx) => {
                out.push(&rest[..idx]);
                rest = &rest[idx + sep.len()..];
            }
            None => break,
        }
    }
    out.push(rest);
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn now_micros() -> i64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    d.as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subj(s: &str) -> Subject {
        Subject::parse(s).unwrap()
    }

    #[test]
    fn round_trip_preserves_fields_and_sep_inside_data() {
        let data = vec![0x5C, 0x30, 0xFF];
        let msg = Message::new("x", subj("p.q"), data.clone(), Duration::from_millis(100));
        let encoded = msg.encode();
        let decoded = Message::parse(&encoded).unwrap();

        assert_eq!(decoded.stream, "x");
        assert_eq!(decoded.subject.canonical(), "p.q");
        assert_eq!(decoded.data, data);
        assert_eq!(decoded.timestamp_micros(), msg.timestamp_micros());
    }

    #[test]
    fn invalid_size_under_eight_bytes() {
        let payload = vec![0u8; 7];
        assert!(matches!(
            Message::parse(&payload),
            Err(Error::InvalidSize { len: 7 })
        ));
    }

    #[test]
    fn invalid_format_missing_separators() {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(b"x");
        assert!(matches!(Message::parse(&payload), Err(Error::InvalidFormat)));
    }

    #[test]
    fn wildcard_in_decoded_subject_rejected() {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(b"stream");
        payload.extend_from_slice(SEP);
        payload.extend_from_slice(b"a.*");
        payload.extend_from_slice(SEP);
        payload.extend_from_slice(b"data");
        assert!(matches!(
            Message::parse(&payload),
            Err(Error::WildcardNotAllowed)
        ));
    }

    #[test]
    fn content_hash_depends_only_on_stream_subject_data() {
        let a = Message::new("s", subj("a.b"), b"hello".to_vec(), Duration::from_secs(1));
        let b = Message::new("s", subj("a.b"), b"hello".to_vec(), Duration::from_secs(5));
        assert_eq!(a.content_hash(), b.content_hash());

        let c = Message::new("s", subj("a.b"), b"other".to_vec(), Duration::from_secs(1));
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn content_hash_stable_across_reencoding() {
        let msg = Message::new("s", subj("a.b.c"), b"payload".to_vec(), Duration::from_secs(1));
        let h1 = msg.content_hash();
        let encoded = msg.encode();
        let decoded = Message::parse(&encoded).unwrap();
        assert_eq!(decoded.content_hash(), h1);
    }

    #[test]
    fn validate_rejects_empty_stream_and_wildcard_subject() {
        let m = Message::new("", subj("a"), vec![], Duration::from_secs(1));
        assert!(matches!(m.validate(), Err(Error::StreamEmpty)));

        let m = Message::new("s", subj("a.*"), vec![], Duration::from_secs(1));
        assert!(matches!(m.validate(), Err(Error::WildcardNotAllowed)));
    }
}
