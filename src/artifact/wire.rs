//! Artifact map encoding for the RPC surface.
//!
//! Each entry is keyed by wire name and carries the base64 payload, the
//! hex offset and a SHA-256 digest. Decoding accepts entries without a
//! digest; when one is present it must match.

use base64::Engine;
use pixie_protocol::ops::{ArtifactMap, ArtifactPayload};

use super::{Artifact, ArtifactError, ArtifactKind, ArtifactSet};

/// Encode a set for a compile response.
pub fn encode(set: &ArtifactSet) -> ArtifactMap {
    set.iter()
        .map(|artifact| {
            let payload = ArtifactPayload {
                payload_base64: base64::engine::general_purpose::STANDARD
                    .encode(artifact.bytes()),
                offset_hex: artifact.offset_hex(),
                sha256: Some(artifact.sha256()),
            };
            (artifact.kind().wire_name().to_string(), payload)
        })
        .collect()
}

/// Decode a flash request's artifact map.
pub fn decode(map: &ArtifactMap) -> Result<ArtifactSet, ArtifactError> {
    let mut artifacts = Vec::with_capacity(map.len());
    for (name, entry) in map {
        artifacts.push(decode_entry(name, entry)?);
    }
    ArtifactSet::from_artifacts(artifacts)
}

fn decode_entry(name: &str, entry: &ArtifactPayload) -> Result<Artifact, ArtifactError> {
    let kind = ArtifactKind::from_wire_name(name)
        .ok_or_else(|| ArtifactError::UnknownName(name.to_string()))?;

    let offset = parse_offset(&entry.offset_hex).ok_or_else(|| ArtifactError::InvalidOffset {
        name: name.to_string(),
        value: entry.offset_hex.clone(),
    })?;
    if offset != kind.offset() {
        return Err(ArtifactError::OffsetMismatch {
            name: name.to_string(),
            expected: format!("{:#x}", kind.offset()),
            actual: entry.offset_hex.clone(),
        });
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(entry.payload_base64.trim())
        .map_err(|e| ArtifactError::InvalidPayload {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    let artifact = Artifact::new(kind, bytes);

    if let Some(expected) = &entry.sha256 {
        if !expected.eq_ignore_ascii_case(&artifact.sha256()) {
            return Err(ArtifactError::DigestMismatch {
                name: name.to_string(),
            });
        }
    }

    Ok(artifact)
}

/// Parse "0x8000"-style offsets. The prefix is required.
fn parse_offset(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_set() -> ArtifactSet {
        ArtifactSet::from_artifacts(vec![
            Artifact::new(ArtifactKind::Bootloader, b"boot".to_vec()),
            Artifact::new(ArtifactKind::PartitionTable, b"parts".to_vec()),
            Artifact::new(ArtifactKind::Application, b"app".to_vec()),
        ])
        .unwrap()
    }

    fn entry(bytes: &[u8], offset: &str) -> ArtifactPayload {
        ArtifactPayload {
            payload_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            offset_hex: offset.to_string(),
            sha256: None,
        }
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let map = encode(&split_set());
        let names: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["application", "bootloader", "partitions"]);
        assert_eq!(map["partitions"].offset_hex, "0x8000");
        assert_eq!(map["application"].payload_base64, "YXBw");
        assert!(map["bootloader"].sha256.is_some());
    }

    #[test]
    fn test_decode_recovers_encoded_set() {
        let set = split_set();
        assert_eq!(decode(&encode(&set)).unwrap(), set);
    }

    #[test]
    fn test_decode_without_digest() {
        let mut map = ArtifactMap::new();
        map.insert("application".to_string(), entry(b"app", "0x10000"));
        let set = decode(&map).unwrap();
        assert_eq!(set.get(ArtifactKind::Application).unwrap().bytes(), b"app");
    }

    #[test]
    fn test_decode_merged_wins() {
        let mut map = ArtifactMap::new();
        map.insert("merged".to_string(), entry(b"all", "0x0"));
        map.insert("application".to_string(), entry(b"app", "0x10000"));
        let set = decode(&map).unwrap();
        assert!(set.is_merged());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_decode_rejects_unknown_name() {
        let mut map = ArtifactMap::new();
        map.insert("firmware".to_string(), entry(b"x", "0x0"));
        assert!(matches!(decode(&map), Err(ArtifactError::UnknownName(n)) if n == "firmware"));
    }

    #[test]
    fn test_decode_rejects_wrong_offset() {
        let mut map = ArtifactMap::new();
        map.insert("partitions".to_string(), entry(b"x", "0x9000"));
        assert!(matches!(decode(&map), Err(ArtifactError::OffsetMismatch { .. })));
    }

    #[test]
    fn test_decode_rejects_unprefixed_offset() {
        let mut map = ArtifactMap::new();
        map.insert("partitions".to_string(), entry(b"x", "8000"));
        assert!(matches!(decode(&map), Err(ArtifactError::InvalidOffset { .. })));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let mut map = ArtifactMap::new();
        map.insert(
            "application".to_string(),
            ArtifactPayload {
                payload_base64: "!!not base64!!".to_string(),
                offset_hex: "0x10000".to_string(),
                sha256: None,
            },
        );
        assert!(matches!(decode(&map), Err(ArtifactError::InvalidPayload { .. })));
    }

    #[test]
    fn test_decode_rejects_digest_mismatch() {
        let mut map = encode(&split_set());
        if let Some(app) = map.get_mut("application") {
            app.sha256 = Some("00".repeat(32));
        }
        assert!(matches!(decode(&map), Err(ArtifactError::DigestMismatch { name }) if name == "application"));
    }

    #[test]
    fn test_decode_empty_map() {
        assert!(matches!(decode(&ArtifactMap::new()), Err(ArtifactError::Empty)));
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("0x0"), Some(0));
        assert_eq!(parse_offset("0X10000"), Some(0x10000));
        assert_eq!(parse_offset("0xzz"), None);
        assert_eq!(parse_offset(""), None);
    }
}
