//! Minimal Solidity ABI codec.
//!
//! Covers exactly the types the story contracts use: `address`, `uint256`,
//! `string`, dynamic arrays, and tuples (for struct returns). Encoding
//! follows the standard head/tail layout; decoding is recursive and bounds
//! checked so malformed payloads surface as errors instead of panics.

use sha3::{Digest, Keccak256};

use crate::types::{Address, H256, U256};
use crate::Error;

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Four-byte function selector for a canonical signature like
/// `"addStoryNode(uint256,string)"`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic-zero hash for a canonical event signature like
/// `"StoryGameCreated(address,address,string)"`.
pub fn event_topic(signature: &str) -> H256 {
    H256(keccak256(signature.as_bytes()))
}

/// A decoded or to-be-encoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    String(String),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Token::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Token::Uint(u) => Some(*u),
            _ => None,
        }
    }

    /// Convenience accessor for small counters.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_uint().and_then(U256::as_u64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Token::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Token::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Token>> {
        match self {
            Token::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_tuple(self) -> Option<Vec<Token>> {
        match self {
            Token::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Token::Address(_) | Token::Uint(_) => false,
            Token::String(_) | Token::Array(_) => true,
            Token::Tuple(fields) => fields.iter().any(Token::is_dynamic),
        }
    }
}

/// Type descriptor used to drive decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint,
    String,
    Array(Box<ParamType>),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    fn is_dynamic(&self) -> bool {
        match self {
            ParamType::Address | ParamType::Uint => false,
            ParamType::String | ParamType::Array(_) => true,
            ParamType::Tuple(fields) => fields.iter().any(ParamType::is_dynamic),
        }
    }
}

/// Encode a function call: selector followed by encoded arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(args));
    out
}

/// Encode a sequence of tokens using the standard head/tail layout.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens
        .iter()
        .map(|t| if t.is_dynamic() { 32 } else { encode_token(t).len() })
        .sum();

    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&U256::from((head_len + tail.len()) as u64).to_be_bytes());
            tail.extend(encode_token(token));
        } else {
            head.extend(encode_token(token));
        }
    }
    head.extend(tail);
    head
}

fn encode_token(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(addr) => {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(&addr.0);
            word.to_vec()
        }
        Token::Uint(value) => value.to_be_bytes().to_vec(),
        Token::String(s) => {
            let bytes = s.as_bytes();
            let mut out = U256::from(bytes.len() as u64).to_be_bytes().to_vec();
            out.extend_from_slice(bytes);
            let padding = (32 - bytes.len() % 32) % 32;
            out.extend(std::iter::repeat(0u8).take(padding));
            out
        }
        Token::Array(items) => {
            let mut out = U256::from(items.len() as u64).to_be_bytes().to_vec();
            out.extend(encode(items));
            out
        }
        Token::Tuple(fields) => encode(fields),
    }
}

/// Decode `data` against the given parameter types.
pub fn decode(data: &[u8], types: &[ParamType]) -> Result<Vec<Token>, Error> {
    decode_tuple(data, types)
}

/// Decode a single value of type `ty` from `data`.
pub fn decode_one(data: &[u8], ty: &ParamType) -> Result<Token, Error> {
    let mut tokens = decode(data, std::slice::from_ref(ty))?;
    Ok(tokens.remove(0))
}

fn decode_tuple(frame: &[u8], types: &[ParamType]) -> Result<Vec<Token>, Error> {
    let mut cursor = 0usize;
    let mut out = Vec::with_capacity(types.len());
    for ty in types {
        if ty.is_dynamic() {
            let offset = read_usize(frame, cursor)?;
            let tail = frame
                .get(offset..)
                .ok_or_else(|| Error::Decode(format!("offset {offset} out of bounds")))?;
            out.push(decode_dynamic(tail, ty)?);
            cursor += 32;
        } else {
            out.push(decode_static(frame, &mut cursor, ty)?);
        }
    }
    Ok(out)
}

fn decode_static(frame: &[u8], cursor: &mut usize, ty: &ParamType) -> Result<Token, Error> {
    match ty {
        ParamType::Address => {
            let word = read_word(frame, *cursor)?;
            *cursor += 32;
            Ok(Token::Address(Address::from_word(&word)))
        }
        ParamType::Uint => {
            let word = read_word(frame, *cursor)?;
            *cursor += 32;
            Ok(Token::Uint(U256(word)))
        }
        ParamType::Tuple(fields) => {
            // Static tuples are encoded inline.
            let mut out = Vec::with_capacity(fields.len());
            for field in fields {
                out.push(decode_static(frame, cursor, field)?);
            }
            Ok(Token::Tuple(out))
        }
        _ => Err(Error::Decode(format!("{ty:?} is not a static type"))),
    }
}

fn decode_dynamic(frame: &[u8], ty: &ParamType) -> Result<Token, Error> {
    match ty {
        ParamType::String => {
            let len = read_usize(frame, 0)?;
            let bytes = frame
                .get(32..32 + len)
                .ok_or_else(|| Error::Decode(format!("string of length {len} out of bounds")))?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| Error::Decode(format!("string is not valid UTF-8: {e}")))?;
            Ok(Token::String(s.to_string()))
        }
        ParamType::Array(inner) => {
            let len = read_usize(frame, 0)?;
            let body = frame
                .get(32..)
                .ok_or_else(|| Error::Decode("truncated array".to_string()))?;
            if len > body.len() / 32 {
                return Err(Error::Decode(format!(
                    "array length {len} exceeds available data"
                )));
            }
            let mut items = Vec::with_capacity(len);
            if inner.is_dynamic() {
                for i in 0..len {
                    let offset = read_usize(body, i * 32)?;
                    let tail = body
                        .get(offset..)
                        .ok_or_else(|| Error::Decode(format!("offset {offset} out of bounds")))?;
                    items.push(decode_dynamic(tail, inner)?);
                }
            } else {
                let mut cursor = 0usize;
                for _ in 0..len {
                    items.push(decode_static(body, &mut cursor, inner)?);
                }
            }
            Ok(Token::Array(items))
        }
        ParamType::Tuple(fields) => Ok(Token::Tuple(decode_tuple(frame, fields)?)),
        _ => Err(Error::Decode(format!("{ty:?} is not a dynamic type"))),
    }
}

fn read_word(data: &[u8], offset: usize) -> Result<[u8; 32], Error> {
    let slice = data
        .get(offset..offset + 32)
        .ok_or_else(|| Error::Decode(format!("word at {offset} out of bounds")))?;
    let mut word = [0u8; 32];
    word.copy_from_slice(slice);
    Ok(word)
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, Error> {
    let word = read_word(data, offset)?;
    U256(word)
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| Error::Decode("length or offset exceeds u64".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selector() {
        // Canonical ERC-20 vector.
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_known_event_topic() {
        let topic = event_topic("Transfer(address,address,uint256)");
        assert_eq!(
            topic.to_string(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_encode_matches_solidity_layout() {
        // ("dave", 1, [1, 2, 3]) laid out per the Solidity ABI spec:
        // offsets 0x60 and 0xa0, then the string tail, then the array tail.
        let encoded = encode(&[
            Token::String("dave".to_string()),
            Token::Uint(U256::from(1)),
            Token::Array(vec![
                Token::Uint(U256::from(1)),
                Token::Uint(U256::from(2)),
                Token::Uint(U256::from(3)),
            ]),
        ]);

        let mut expected = Vec::new();
        expected.extend(U256::from(0x60).to_be_bytes()); // offset of "dave"
        expected.extend(U256::from(1).to_be_bytes());
        expected.extend(U256::from(0xa0).to_be_bytes()); // offset of the array
        expected.extend(U256::from(4).to_be_bytes()); // string length
        let mut dave = [0u8; 32];
        dave[..4].copy_from_slice(b"dave");
        expected.extend(dave);
        expected.extend(U256::from(3).to_be_bytes()); // array length
        expected.extend(U256::from(1).to_be_bytes());
        expected.extend(U256::from(2).to_be_bytes());
        expected.extend(U256::from(3).to_be_bytes());

        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_decode_mixed_arguments() {
        let addr: Address = "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap();
        let tokens = vec![
            Token::Address(addr),
            Token::Uint(U256::from(7)),
            Token::String("Found a treasure".to_string()),
        ];
        let encoded = encode(&tokens);
        let decoded = decode(
            &encoded,
            &[ParamType::Address, ParamType::Uint, ParamType::String],
        )
        .unwrap();
        assert_eq!(decoded, tokens);
    }

    #[test]
    fn test_decode_array_of_dynamic_tuples() {
        // Mirrors the getAllStories() return shape: (address, string, address)[].
        let owner: Address = "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap();
        let story = Token::Tuple(vec![
            Token::Address(Address::ZERO),
            Token::String("The Hollow Crown".to_string()),
            Token::Address(owner),
        ]);
        let tokens = vec![Token::Array(vec![story.clone(), story])];
        let encoded = encode(&tokens);

        let shape = ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::String,
            ParamType::Address,
        ])));
        let decoded = decode(&encoded, &[shape]).unwrap();
        assert_eq!(decoded, tokens);
    }

    #[test]
    fn test_decode_rejects_truncated_data() {
        let encoded = encode(&[Token::String("hello".to_string())]);
        let truncated = &encoded[..encoded.len() - 16];
        assert!(decode(truncated, &[ParamType::String]).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut data = U256::from(32).to_be_bytes().to_vec();
        data.extend(U256::from(u64::MAX).to_be_bytes()); // absurd claimed length
        assert!(decode(&data, &[ParamType::String]).is_err());
    }

    #[test]
    fn test_encode_call_prefixes_selector() {
        let data = encode_call("makeChoice(uint256,uint256)", &[
            Token::Uint(U256::from(0)),
            Token::Uint(U256::from(1)),
        ]);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], selector("makeChoice(uint256,uint256)").as_slice());
    }
}
