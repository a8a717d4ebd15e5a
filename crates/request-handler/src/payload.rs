//! ABI bridging between the chain's `(bytes32 content_hash, bytes uri)` payload envelope
//! (spec §6) and `agent_core::ports::PayloadEnvelope`. This crate only moves bytes across the
//! ABI boundary, never interprets the locator scheme itself.

use alloy::primitives::{Bytes, B256};
use alloy::sol_types::SolValue;

use agent_core::PayloadEnvelope;

use crate::error::HandlerError;

/// Decode a `getComputeInputs` `PAYLOAD`-typed return value into a [`PayloadEnvelope`].
pub fn decode_envelope(data: &[u8]) -> Result<PayloadEnvelope, HandlerError> {
    let (content_hash, uri): (B256, Bytes) = SolValue::abi_decode(data)
        .map_err(|e| HandlerError::MalformedPayloadEnvelope("inputs", e.to_string()))?;
    Ok(PayloadEnvelope { content_hash, uri })
}

/// ABI-encode a resolved [`PayloadEnvelope`] as the `(bytes32, bytes)` tuple `reportComputeResult`
/// expects for `input_payload`/`output_payload`/`proof_payload`.
#[must_use]
pub fn encode_envelope(envelope: PayloadEnvelope) -> Vec<u8> {
    (envelope.content_hash, envelope.uri).abi_encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_abi_encoding() {
        let original = (B256::from([1; 32]), Bytes::from_static(b"ipfs://demo"));
        let encoded = original.clone().abi_encode();
        let decoded = decode_envelope(&encoded).unwrap();
        assert_eq!(decoded.content_hash, original.0);
        assert_eq!(decoded.uri, original.1);
    }
}
