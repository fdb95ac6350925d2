
use stun::chandata::SSLTCP_CLIENT_HANDSHAKE;

/// MatchFunc allows custom logic for mapping packets to a logical endpoint.
pub type MatchFunc = Box<dyn (Fn(&[u8]) -> bool) + Send + Sync>;

/// match_all always returns true.
pub fn match_all(_b: &[u8]) -> bool {
    true
}

/// match_range returns a MatchFunc that matches when the first byte is in
/// [lower..upper].
pub fn match_range(lower: u8, upper: u8) -> MatchFunc {
    Box::new(move |buf: &[u8]| -> bool {
        if buf.is_empty() {
            return false;
        }
        let b = buf[0];
        b >= lower && b <= upper
    })
}

/// match_stun is true if b looks like a STUN message (RFC 5389, with the
/// RFC 3489 length fallback).
pub fn match_stun(b: &[u8]) -> bool {
    stun::message::is_message(b)
}

/// match_dtls is true for DTLS record content types: 19 < b[0] < 64.
pub fn match_dtls(b: &[u8]) -> bool {
    !b.is_empty() && b[0] > 19 && b[0] < 64
}

/// match_rtcp is true for RTCP compound packets: version 2 and a payload
/// type in [200, 211].
pub fn match_rtcp(b: &[u8]) -> bool {
    b.len() >= 4 && b[0] >> 6 == 2 && (200..=211).contains(&b[1])
}

/// match_channel_data is true for TURN ChannelData frames.
pub fn match_channel_data(b: &[u8]) -> bool {
    stun::chandata::is_channel_data(b)
}

const HTTP_METHODS: [&[u8]; 12] = [
    b"CONNECT", b"DELETE", b"GET", b"HEAD", b"MOVE", b"OPTIONS", b"PATCH", b"POST", b"PRI",
    b"PROXY", b"TRACE", b"PUT",
];

/// match_http is true when b starts with a full HTTP method token followed
/// by a space.
pub fn match_http(b: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|method| {
        b.len() > method.len() && &b[..method.len()] == *method && b[method.len()] == b' '
    })
}

/// match_tls is true for a TLS ClientHello: record type 22, record and
/// handshake versions 3.1-3.3.
pub fn match_tls(b: &[u8]) -> bool {
    b.len() >= 11
        && b[0] == 22
        && b[1] == 3
        && (1..=3).contains(&b[2])
        && b[5] == 1
        && b[9] == 3
        && (1..=3).contains(&b[10])
}

/// match_sslv2 is true for an SSLv2 ClientHello record, except the pseudo
/// handshake Google TURN SSLTCP servers use, which must stay out of the real
/// SSL path.
pub fn match_sslv2(b: &[u8]) -> bool {
    if b.len() < 6 {
        return false;
    }
    if is_google_turn_ssltcp(b) {
        return false;
    }
    b[2] == 1 && b[3] == 3 && (1..=3).contains(&b[4])
}

/// Exact byte-for-byte prefix comparison against the Google TURN SSLTCP
/// client handshake.
pub fn is_google_turn_ssltcp(b: &[u8]) -> bool {
    let n = std::cmp::min(b.len(), SSLTCP_CLIENT_HANDSHAKE.len());
    n > 0 && b[..n] == SSLTCP_CLIENT_HANDSHAKE[..n]
}

/// match_http_tls classifies the startup bytes of a stream: the first byte
/// selects the candidate protocol (22 → TLS, high bit → SSLv2, else HTTP)
/// and the candidate's own check decides.
pub fn match_http_tls(b: &[u8]) -> bool {
    if b.is_empty() {
        return false;
    }
    match b[0] {
        22 => match_tls(b),
        x if x >= 0x80 => match_sslv2(b),
        _ => match_http(b),
    }
}
