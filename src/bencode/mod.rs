mod decoder;
mod encoder;
mod value;

pub use decoder::decode;
pub use encoder::encode;
pub use value::BencodeValue;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode(b"4:spam").unwrap(), BencodeValue::from("spam"));
        assert_eq!(decode(b"0:").unwrap(), BencodeValue::Bytes(Vec::new()));
    }

    #[test]
    fn test_decode_binary_string() {
        let mut data = b"6:".to_vec();
        data.extend_from_slice(&[0xff, 0x00, 0x1a, 0xe1, 0x0b, 0x00]);
        let value = decode(&data).unwrap();
        assert_eq!(value.as_bytes().unwrap(), &[0xff, 0x00, 0x1a, 0xe1, 0x0b, 0x00]);
        assert!(value.as_str().is_none());
    }

    #[test]
    fn test_decode_nested_dict() {
        let value = decode(b"d4:infod6:lengthi10ee4:listl1:a1:bee").unwrap();
        assert_eq!(value.get(b"info").unwrap().get_u64(b"length"), Some(10));
        assert_eq!(value.get(b"list").unwrap().as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_dict_encoding_is_sorted() {
        let mut dict = BTreeMap::new();
        dict.insert(b"foo".to_vec(), BencodeValue::Integer(42));
        dict.insert(b"bar".to_vec(), BencodeValue::from("spam"));
        assert_eq!(encode(&BencodeValue::Dict(dict)), b"d3:bar4:spam3:fooi42ee");
    }

    #[test]
    fn test_reencoding_canonical_input_is_identity() {
        let raw = b"d8:announce9:udp://x:14:infod6:lengthi5e4:name1:aee";
        assert_eq!(encode(&decode(raw).unwrap()), raw.to_vec());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(decode(b"").is_err());
        assert!(decode(b"i12").is_err());
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"10:short").is_err());
        assert!(decode(b"l4:spam").is_err());
        assert!(decode(b"di1e4:spame").is_err());
        assert!(decode(b"i1ei2e").is_err());
    }
}
