//! Ad-hoc display rendering for decoded values.
//!
//! The format is for human inspection only and is not round-trippable:
//! integers print as decimal, byte strings as `"…"` with their raw bytes
//! passed through unescaped, lists as `[e1,e2]`, dictionaries as
//! `{"k1":v1,"k2":v2}`.
use super::{BencodeError, BencodeResult, BencodeValue};

/// Renders `value` into its display form as raw bytes.
///
/// Byte strings are emitted verbatim between the quotes, so the result may
/// not be valid UTF-8; write it to stdout as bytes.
///
/// # Arguments
/// * `value` - The decoded value tree to render
///
/// # Returns
/// * `Vec<u8>` - The display form; infallible, since rendering only walks
///   the tree
///
/// # Example
/// The tree decoded from `d3:foo3:bar5:helloi52ee` renders as
/// `{"foo":"bar","hello":52}`.
pub fn render(value: &BencodeValue) -> Vec<u8> {
    let mut out = Vec::new();
    render_into(&mut out, value);
    out
}

fn render_into(out: &mut Vec<u8>, value: &BencodeValue) {
    match value {
        BencodeValue::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        BencodeValue::String(s) => {
            out.push(b'"');
            out.extend_from_slice(s);
            out.push(b'"');
        }
        BencodeValue::List(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                render_into(out, item);
            }
            out.push(b']');
        }
        BencodeValue::Dict(pairs) => {
            out.push(b'{');
            for (i, (key, val)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.push(b'"');
                out.extend_from_slice(key);
                out.extend_from_slice(b"\":");
                render_into(out, val);
            }
            out.push(b'}');
        }
    }
}

/// Strict lexicographic key-order validation, recursively over every
/// dictionary in the tree.
///
/// The core decoder tolerates unsorted keys; only this display path rejects
/// them.
///
/// # Returns
/// * `BencodeResult<()>` - Ok when every dictionary's keys are in
///   non-descending order, `UnsortedKeys` otherwise
pub fn ensure_sorted_keys(value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::Integer(_) | BencodeValue::String(_) => Ok(()),
        BencodeValue::List(items) => items.iter().try_for_each(ensure_sorted_keys),
        BencodeValue::Dict(pairs) => {
            for window in pairs.windows(2) {
                if window[0].0 > window[1].0 {
                    return Err(BencodeError::UnsortedKeys);
                }
            }
            pairs.iter().try_for_each(|(_, v)| ensure_sorted_keys(v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::decode;
    use super::*;

    fn rendered(input: &[u8]) -> Vec<u8> {
        render(&decode(input).unwrap())
    }

    #[test]
    fn renders_scalars() {
        assert_eq!(rendered(b"i42e"), b"42");
        assert_eq!(rendered(b"i-7e"), b"-7");
        assert_eq!(rendered(b"5:hello"), b"\"hello\"");
    }

    #[test]
    fn renders_containers() {
        assert_eq!(rendered(b"l4:spami42ee"), b"[\"spam\",42]");
        assert_eq!(
            rendered(b"d3:foo3:bar5:helloi52ee"),
            b"{\"foo\":\"bar\",\"hello\":52}"
        );
        assert_eq!(rendered(b"le"), b"[]");
        assert_eq!(rendered(b"de"), b"{}");
    }

    #[test]
    fn sorted_key_check_is_recursive() {
        let sorted = decode(b"d1:ad1:xi1e1:yi2ee1:bi3ee").unwrap();
        assert!(ensure_sorted_keys(&sorted).is_ok());

        let unsorted_inner = decode(b"d1:ad1:yi1e1:xi2eee").unwrap();
        assert!(matches!(
            ensure_sorted_keys(&unsorted_inner),
            Err(BencodeError::UnsortedKeys)
        ));
    }
}
