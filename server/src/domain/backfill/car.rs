//! CAR (content-addressed archive) reading
//!
//! A repository archive is a CARv1: a varint-length-prefixed DAG-CBOR
//! header carrying the roots, followed by varint-length-prefixed sections
//! of one CID plus its block bytes. Blocks are collected into a map so the
//! merkle search tree can be walked by link.

use std::collections::HashMap;

use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

/// Parse failure while reading an archive
#[derive(Debug, thiserror::Error)]
pub enum CarError {
    #[error("Truncated archive: {0}")]
    Truncated(&'static str),

    #[error("Varint is malformed or too large")]
    BadVarint,

    #[error("Bad CID: {0}")]
    BadCid(String),

    #[error("Bad header: {0}")]
    BadHeader(String),

    #[error("Block decode failed: {0}")]
    BadBlock(String),
}

/// A parsed archive: root CIDs plus every block keyed by CID
pub struct CarReader {
    pub roots: Vec<Cid>,
    pub blocks: HashMap<Cid, Vec<u8>>,
}

impl CarReader {
    pub fn parse(bytes: &[u8]) -> Result<Self, CarError> {
        let mut pos = 0usize;

        let header_len = read_varint(bytes, &mut pos)?
            .ok_or(CarError::Truncated("missing header"))?;
        let header_bytes = take(bytes, &mut pos, header_len)?;
        let header: Ipld = serde_ipld_dagcbor::from_slice(header_bytes)
            .map_err(|e| CarError::BadHeader(e.to_string()))?;
        let roots = header_roots(&header)?;

        let mut blocks = HashMap::new();
        while let Some(section_len) = read_varint(bytes, &mut pos)? {
            let section = take(bytes, &mut pos, section_len)?;
            let mut reader = std::io::Cursor::new(section);
            let cid =
                Cid::read_bytes(&mut reader).map_err(|e| CarError::BadCid(e.to_string()))?;
            let data = section[reader.position() as usize..].to_vec();
            blocks.insert(cid, data);
        }

        Ok(Self { roots, blocks })
    }

    /// Decode one block as DAG-CBOR
    pub fn decode_block(&self, cid: &Cid) -> Result<Option<Ipld>, CarError> {
        let Some(bytes) = self.blocks.get(cid) else {
            return Ok(None);
        };
        serde_ipld_dagcbor::from_slice(bytes)
            .map(Some)
            .map_err(|e| CarError::BadBlock(e.to_string()))
    }
}

fn header_roots(header: &Ipld) -> Result<Vec<Cid>, CarError> {
    let Ipld::Map(map) = header else {
        return Err(CarError::BadHeader("header is not a map".into()));
    };
    match map.get("version") {
        Some(Ipld::Integer(1)) => {}
        other => {
            return Err(CarError::BadHeader(format!(
                "unsupported version {:?}",
                other
            )));
        }
    }
    let Some(Ipld::List(roots)) = map.get("roots") else {
        return Err(CarError::BadHeader("missing roots".into()));
    };
    roots
        .iter()
        .map(|entry| match entry {
            Ipld::Link(cid) => Ok(*cid),
            _ => Err(CarError::BadHeader("root is not a link".into())),
        })
        .collect()
}

/// Unsigned LEB128; None on clean EOF at a section boundary
fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<Option<usize>, CarError> {
    if *pos >= bytes.len() {
        return Ok(None);
    }
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos).ok_or(CarError::Truncated("inside varint"))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(value as usize));
        }
        shift += 7;
        if shift >= 64 {
            return Err(CarError::BadVarint);
        }
    }
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], CarError> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or(CarError::Truncated("inside section"))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Render a DAG-CBOR value as the JSON shape the processor consumes.
/// Links become `{"$link": cid}` and bytes `{"$bytes": base64}`.
pub fn ipld_to_json(value: &Ipld) -> serde_json::Value {
    use base64::Engine;
    match value {
        Ipld::Null => serde_json::Value::Null,
        Ipld::Bool(b) => serde_json::Value::Bool(*b),
        Ipld::Integer(i) => i64::try_from(*i)
            .map(|n| serde_json::Value::from(n))
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string())),
        Ipld::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Ipld::String(s) => serde_json::Value::String(s.clone()),
        Ipld::Bytes(b) => serde_json::json!({
            "$bytes": base64::engine::general_purpose::STANDARD.encode(b)
        }),
        Ipld::List(items) => {
            serde_json::Value::Array(items.iter().map(ipld_to_json).collect())
        }
        Ipld::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), ipld_to_json(v)))
                .collect(),
        ),
        Ipld::Link(cid) => serde_json::json!({"$link": cid.to_string()}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_varint(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn test_cid(payload: &[u8]) -> Cid {
        use ipld_core::cid::multihash::Multihash;
        // 0x12 = sha2-256; a fixed-size digest is fine for tests
        let digest: Vec<u8> = payload
            .iter()
            .cycle()
            .take(32)
            .copied()
            .collect();
        let mh = Multihash::<64>::wrap(0x12, &digest).unwrap();
        Cid::new_v1(0x71, mh) // 0x71 = dag-cbor
    }

    fn build_car(roots: &[Cid], blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
        let header = Ipld::Map(
            [
                ("version".to_string(), Ipld::Integer(1)),
                (
                    "roots".to_string(),
                    Ipld::List(roots.iter().map(|c| Ipld::Link(*c)).collect()),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let header_bytes = serde_ipld_dagcbor::to_vec(&header).unwrap();

        let mut out = Vec::new();
        write_varint(&mut out, header_bytes.len() as u64);
        out.extend_from_slice(&header_bytes);

        for (cid, data) in blocks {
            let cid_bytes = cid.to_bytes();
            write_varint(&mut out, (cid_bytes.len() + data.len()) as u64);
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_parse_roundtrip() {
        let cid_a = test_cid(b"a");
        let cid_b = test_cid(b"b");
        let block_a = serde_ipld_dagcbor::to_vec(&Ipld::String("alpha".into())).unwrap();
        let block_b = serde_ipld_dagcbor::to_vec(&Ipld::Integer(7)).unwrap();

        let car = build_car(&[cid_a], &[(cid_a, block_a), (cid_b, block_b)]);
        let reader = CarReader::parse(&car).unwrap();

        assert_eq!(reader.roots, vec![cid_a]);
        assert_eq!(reader.blocks.len(), 2);
        assert_eq!(
            reader.decode_block(&cid_a).unwrap(),
            Some(Ipld::String("alpha".into()))
        );
        assert_eq!(reader.decode_block(&cid_b).unwrap(), Some(Ipld::Integer(7)));
    }

    #[test]
    fn test_missing_block_is_none() {
        let cid_a = test_cid(b"a");
        let car = build_car(&[cid_a], &[]);
        let reader = CarReader::parse(&car).unwrap();
        assert!(reader.decode_block(&test_cid(b"zz")).unwrap().is_none());
    }

    #[test]
    fn test_truncated_archive_fails() {
        let cid_a = test_cid(b"a");
        let block = serde_ipld_dagcbor::to_vec(&Ipld::Integer(1)).unwrap();
        let mut car = build_car(&[cid_a], &[(cid_a, block)]);
        car.truncate(car.len() - 3);
        assert!(CarReader::parse(&car).is_err());
    }

    #[test]
    fn test_rejects_wrong_version() {
        let header = Ipld::Map(
            [
                ("version".to_string(), Ipld::Integer(2)),
                ("roots".to_string(), Ipld::List(vec![])),
            ]
            .into_iter()
            .collect(),
        );
        let header_bytes = serde_ipld_dagcbor::to_vec(&header).unwrap();
        let mut car = Vec::new();
        write_varint(&mut car, header_bytes.len() as u64);
        car.extend_from_slice(&header_bytes);

        assert!(matches!(CarReader::parse(&car), Err(CarError::BadHeader(_))));
    }

    #[test]
    fn test_ipld_to_json_shapes() {
        let cid = test_cid(b"x");
        let value = Ipld::Map(
            [
                ("text".to_string(), Ipld::String("hi".into())),
                ("count".to_string(), Ipld::Integer(3)),
                ("ref".to_string(), Ipld::Link(cid)),
                ("raw".to_string(), Ipld::Bytes(vec![1, 2, 3])),
            ]
            .into_iter()
            .collect(),
        );
        let json = ipld_to_json(&value);
        assert_eq!(json["text"], "hi");
        assert_eq!(json["count"], 3);
        assert_eq!(json["ref"]["$link"], cid.to_string());
        assert_eq!(json["raw"]["$bytes"], "AQID");
    }
}
