// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::protocol::{TunnelEnvelope, TunnelResponse};
use rewire_core::RewireError;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize};

fn encode<T>(value: &T) -> Result<Vec<u8>, RewireError>
where
    T: rkyv::Serialize<AllocSerializer<256>>,
{
    rkyv::to_bytes::<_, 256>(value)
        .map(|bytes| bytes.into_vec())
        .map_err(|e| RewireError::Codec(format!("serialize: {:?}", e)))
}

fn decode<T>(bytes: &[u8]) -> Result<T, RewireError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, rkyv::Infallible>,
{
    // Frames arrive in plain Vecs; validation needs the archive aligned.
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::check_archived_root::<T>(&aligned).map_err(|e| {
        RewireError::Codec(format!("invalid archive: {:?} (len: {})", e, bytes.len()))
    })?;
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|never| match never {})
}

pub fn encode_envelope(envelope: &TunnelEnvelope) -> Result<Vec<u8>, RewireError> {
    encode(envelope)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<TunnelEnvelope, RewireError> {
    decode(bytes)
}

pub fn encode_response(response: &TunnelResponse) -> Result<Vec<u8>, RewireError> {
    encode(response)
}

pub fn decode_response(bytes: &[u8]) -> Result<TunnelResponse, RewireError> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TunnelRequest;
    use std::time::Duration;

    #[test]
    fn test_write_envelope_survives_encoding() {
        let envelope = TunnelEnvelope::new(
            TunnelRequest::Write { sid: 9, buf: vec![1, 2, 3] },
            Some(Duration::from_secs(2)),
        );
        let bytes = encode_envelope(&envelope).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        let err = decode_response(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, RewireError::Codec(_)));
    }
}
