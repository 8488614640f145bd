use super::{BencodeError, BencodeResult, BencodeValue};
use tracing::instrument;

/// Containers nested deeper than this are rejected. Recursion depth is
/// otherwise bounded only by input length, and a few hundred bytes of `l`
/// would blow the stack long before any real torrent does.
const MAX_DEPTH: usize = 256;

/// A cursor over a bencoded buffer.
///
/// Each `decode_*` call consumes exactly one production and leaves the cursor
/// on the byte that follows it, so a caller can decode a prefix of the buffer
/// and then ask [`Decoder::position`] where that prefix ended. The raw-slice
/// locator is built on exactly that: the source bytes of a value are
/// `[position before, position after)`.
///
/// The decoder never mutates the buffer and holds no state besides the
/// cursor, so it is freely reentrant.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    /// Byte offset of the next unconsumed byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True once the whole buffer has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEoi)
    }

    fn bump(&mut self) -> BencodeResult<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    /// Decodes the next value, whatever its type.
    ///
    /// Dispatches on the leading byte: a digit starts a string, `i` an
    /// integer, `l` a list, `d` a dictionary. Anything else fails
    /// immediately.
    ///
    /// # Returns
    /// * `BencodeResult<BencodeValue>` - The decoded value, or an error if:
    ///   - The leading byte does not open any production
    ///   - The value itself is malformed
    ///   - The input ends before the value is complete
    pub fn decode_value(&mut self) -> BencodeResult<BencodeValue> {
        self.value_at_depth(0)
    }

    fn value_at_depth(&mut self, depth: usize) -> BencodeResult<BencodeValue> {
        if depth >= MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep(MAX_DEPTH));
        }
        match self.peek()? {
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list(depth).map(BencodeValue::List),
            b'd' => self.decode_dict(depth).map(BencodeValue::Dict),
            other => Err(BencodeError::InvalidFormat(format!(
                "Unexpected byte {:#04x} at offset {}",
                other, self.pos
            ))),
        }
    }

    /// Decodes a byte string in the `<length>:<bytes>` form, where:
    /// - `<length>` is a decimal number giving the payload size
    /// - `<bytes>` is exactly that many raw bytes
    ///
    /// # Returns
    /// * `BencodeResult<Vec<u8>>` - The decoded payload as a byte vector, or
    ///   an error if:
    ///   - The length prefix is empty or contains a non-digit
    ///   - The `:` separator is missing
    ///   - The buffer ends before `length` bytes have been consumed
    ///
    /// # Example
    /// For input "5:hello", this function will return a Vec<u8> containing
    /// [104, 101, 108, 108, 111]
    pub fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let digits_start = self.pos;
        while self.peek()?.is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return Err(BencodeError::InvalidStringLength);
        }
        if self.bump()? != b':' {
            return Err(BencodeError::InvalidStringLength);
        }

        let length = std::str::from_utf8(&self.buf[digits_start..self.pos - 1])
            .map_err(|_| BencodeError::InvalidStringLength)?
            .parse::<usize>()
            .map_err(|_| BencodeError::InvalidStringLength)?;

        if self.buf.len() - self.pos < length {
            return Err(BencodeError::UnexpectedEoi);
        }
        let bytes = self.buf[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(bytes)
    }

    /// Decodes an integer in the `i<number>e` form, where:
    /// - `i` is the literal byte opening an integer
    /// - `<number>` is the decimal value, optionally sign-prefixed
    /// - `e` is the literal byte closing it
    ///
    /// The payload is validated before parsing:
    /// - An empty payload or a lone `-` is rejected
    /// - A leading zero on a payload longer than one digit is rejected
    /// - `-0` is rejected
    ///
    /// # Returns
    /// * `BencodeResult<i64>` - The decoded integer value, or an error if:
    ///   - The payload fails any of the checks above
    ///   - The value does not fit in an `i64`
    ///   - The closing `e` is absent before end-of-input
    ///
    /// # Example
    /// For input "i42e", this function will return Ok(42)
    pub fn decode_integer(&mut self) -> BencodeResult<i64> {
        if self.bump()? != b'i' {
            return Err(BencodeError::InvalidFormat(
                "Integer must start with 'i'".to_string(),
            ));
        }

        let payload_start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }
        let payload = &self.buf[payload_start..self.pos];
        self.pos += 1; // consume the 'e'

        let (negative, digits) = match payload.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, payload),
        };
        if digits.is_empty() || digits.iter().any(|b| !b.is_ascii_digit()) {
            return Err(BencodeError::InvalidInteger);
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(BencodeError::InvalidInteger);
        }
        if negative && digits == b"0" {
            return Err(BencodeError::InvalidInteger);
        }

        std::str::from_utf8(payload)
            .map_err(|_| BencodeError::InvalidInteger)?
            .parse::<i64>()
            .map_err(|_| BencodeError::InvalidInteger)
    }

    /// Decodes a list in the `l<items>e` form, recursing into
    /// [`Decoder::value_at_depth`] for each element.
    ///
    /// # Returns
    /// * `BencodeResult<Vec<BencodeValue>>` - The decoded elements in order,
    ///   or an error if any element fails or the closing `e` is absent
    ///
    /// # Example
    /// For input "li42ei-1ee", this function will return
    /// Ok(vec![Integer(42), Integer(-1)])
    fn decode_list(&mut self, depth: usize) -> BencodeResult<Vec<BencodeValue>> {
        if self.bump()? != b'l' {
            return Err(BencodeError::InvalidFormat(
                "List must start with 'l'".to_string(),
            ));
        }

        let mut list = Vec::new();
        while self.peek()? != b'e' {
            list.push(self.value_at_depth(depth + 1)?);
        }
        self.pos += 1; // consume the 'e'
        Ok(list)
    }

    /// Decodes a dictionary in the `d<pairs>e` form, preserving pair order
    /// as encountered.
    ///
    /// Keys that are out of lexicographic order are accepted here; real-world
    /// torrents violate the ordering rule often enough that strict checking
    /// is left to the display path.
    ///
    /// # Returns
    /// * `BencodeResult<Vec<(Vec<u8>, BencodeValue)>>` - The decoded pairs,
    ///   or an error if a key is not a well-formed string, a value fails to
    ///   decode, or the closing `e` is absent
    ///
    /// # Example
    /// For input "d3:keyi42ee", this function will return
    /// Ok(vec![(b"key", Integer(42))])
    fn decode_dict(&mut self, depth: usize) -> BencodeResult<Vec<(Vec<u8>, BencodeValue)>> {
        if self.bump()? != b'd' {
            return Err(BencodeError::InvalidFormat(
                "Dictionary must start with 'd'".to_string(),
            ));
        }

        let mut pairs = Vec::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::DictKeyNotString);
            }
            let key = self.decode_string()?;
            let value = self.value_at_depth(depth + 1)?;
            pairs.push((key, value));
        }
        self.pos += 1; // consume the 'e'
        Ok(pairs)
    }
}

/// Decodes `buf` as a single bencoded value covering the entire buffer.
///
/// # Arguments
/// * `buf` - The bencoded input; the value must span it exactly
///
/// # Returns
/// * `BencodeResult<BencodeValue>` - The decoded value tree, or an error if
///   the input is malformed or continues past the end of the value
#[instrument(skip(buf), level = "trace")]
pub fn decode(buf: &[u8]) -> BencodeResult<BencodeValue> {
    let mut decoder = Decoder::new(buf);
    let value = decoder.decode_value()?;
    if !decoder.is_at_end() {
        return Err(BencodeError::TrailingBytes);
    }
    Ok(value)
}

/// Returns the source bytes of the value stored under `key` in the top-level
/// dictionary of `buf`.
///
/// The info digest is a SHA-1 of the *original* encoding of the `info`
/// dictionary. Re-encoding a decoded tree is not guaranteed to reproduce
/// those bytes (key order, integer canonicalization), so the slice has to be
/// carved out of the source.
///
/// # How it works
/// 1. Walks the top-level dictionary's (key, value) pairs in order.
/// 2. Skips each non-matching value by decoding it and discarding the tree.
/// 3. On a key match, the cursor sits on the first byte of the value's
///    encoding; one more decode pass marks where it ends.
/// 4. The slice between the two cursor positions is the value's canonical
///    source representation, suitable for digesting.
///
/// # Arguments
/// * `buf` - A buffer whose first byte opens the dictionary to search
/// * `key` - The dictionary key whose value's source bytes are wanted
///
/// # Returns
/// * `BencodeResult<&[u8]>` - The raw encoded value, or an error if the
///   buffer is not a dictionary, the key is absent, or any entry is
///   malformed
///
/// # Example
/// For input `d3:fooi42ee` and key `foo`, this function returns the bytes
/// `i42e`.
#[instrument(skip(buf), level = "trace")]
pub fn raw_slice<'a>(buf: &'a [u8], key: &[u8]) -> BencodeResult<&'a [u8]> {
    let mut decoder = Decoder::new(buf);
    if decoder.bump()? != b'd' {
        return Err(BencodeError::InvalidFormat(
            "Top-level value is not a dictionary".to_string(),
        ));
    }

    loop {
        if decoder.peek()? == b'e' {
            return Err(BencodeError::KeyNotFound(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        let entry_key = decoder.decode_string()?;
        if entry_key == key {
            let start = decoder.position();
            decoder.decode_value()?;
            return Ok(&buf[start..decoder.position()]);
        }
        // Not ours; skip the value by decoding and dropping it.
        decoder.decode_value()?;
    }
}
