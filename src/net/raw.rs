use crate::addr::TransportAddress;

/// RawMessage is an immutable record of one received datagram: the bytes, the
/// remote address it came from and the local address of the connector that
/// read it. The buffer is a defensive copy sized exactly to the read length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    bytes: Vec<u8>,
    remote_address: TransportAddress,
    local_address: TransportAddress,
}

impl RawMessage {
    pub fn new(
        buf: &[u8],
        len: usize,
        remote_address: TransportAddress,
        local_address: TransportAddress,
    ) -> Self {
        RawMessage {
            bytes: buf[..len].to_vec(),
            remote_address,
            local_address,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn remote_address(&self) -> TransportAddress {
        self.remote_address
    }

    pub fn local_address(&self) -> TransportAddress {
        self.local_address
    }
}
