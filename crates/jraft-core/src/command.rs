//! Canonical encoding of data requests as log commands
//!
//! The bytes produced here are what the consensus log stores and replays, so
//! replay reproduces identical apply calls on every replica.

use crate::types::DataRequest;

/// Serialize a request into log command bytes
pub fn encode_command(request: &DataRequest) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(request)
}

/// Deserialize log command bytes back into a request
pub fn decode_command(bytes: &[u8]) -> Result<DataRequest, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_deterministic() {
        let req = DataRequest::new("upsert", "r-1", b"payload".to_vec())
            .with_parameter("b", "2")
            .with_parameter("a", "1");
        assert_eq!(encode_command(&req).unwrap(), encode_command(&req.clone()).unwrap());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_command(b"not a request").is_err());
    }
}
