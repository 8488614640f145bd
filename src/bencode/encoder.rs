use super::{BencodeResult, BencodeValue};
use std::io::Write;
use tracing::instrument;

/// Encodes a byte slice as a bencode string.
///
/// Writes the length of the byte slice, a colon, and then the bytes
/// themselves.
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

/// Encodes an integer between the `i` and `e` delimiters.
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Pairs are written in stored order. A tree decoded from well-formed input
/// already carries its keys sorted, so decode-then-encode reproduces the
/// source bytes; this function does not re-sort.
fn encode_dict<W: Write>(writer: &mut W, pairs: &[(Vec<u8>, BencodeValue)]) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    for (key, value) in pairs {
        encode_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(pairs) => encode_dict(writer, pairs),
    }
}

/// Serializes `value` back into its bencoded form.
///
/// # Arguments
/// * `writer` - The sink the encoding is written to
/// * `value` - The value tree to serialize
///
/// # Returns
/// * `BencodeResult<()>` - Ok on success, or the underlying I/O error if the
///   sink refuses a write
///
/// # Example
/// Encoding `BencodeValue::Integer(42)` writes the bytes `i42e`.
#[instrument(skip(writer, value), level = "trace")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    encode_value(writer, value)
}

#[cfg(test)]
mod tests {
    use super::super::decode;
    use super::*;

    fn round_trip(input: &[u8]) {
        let value = decode(input).unwrap();
        let mut out = Vec::new();
        encode(&mut out, &value).unwrap();
        assert_eq!(out, input, "round trip of {:?}", input);
    }

    #[test]
    fn canonical_inputs_round_trip_byte_identical() {
        round_trip(b"i42e");
        round_trip(b"i-7e");
        round_trip(b"i0e");
        round_trip(b"5:hello");
        round_trip(b"0:");
        round_trip(b"l4:spami42ee");
        round_trip(b"le");
        round_trip(b"de");
        round_trip(b"d3:foo3:bar5:helloi52ee");
        round_trip(b"d4:infod6:lengthi12e4:name4:file12:piece lengthi16e6:pieces0:ee");
    }

    #[test]
    fn preserves_source_pair_order() {
        // Unsorted input is tolerated by the decoder; encoding must hand back
        // the same bytes rather than silently reordering.
        round_trip(b"d1:bi1e1:ai2ee");
    }
}
