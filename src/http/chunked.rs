//! `Transfer-Encoding: chunked` decoding.

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkError {
    /// More bytes are needed to finish the body.
    Incomplete,
    /// The framing is not valid chunked encoding.
    Invalid,
}

/// Decodes a chunked body at the start of `buf`.
///
/// Returns the de-chunked payload and the number of bytes consumed,
/// trailers included. Trailer fields are discarded.
pub fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ChunkError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ChunkError::Incomplete)? + pos;
        let line = std::str::from_utf8(&buf[pos..line_end]).map_err(|_| ChunkError::Invalid)?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ChunkError::Invalid)?;
        pos = line_end + 2;

        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let end = find_crlf(&buf[pos..]).ok_or(ChunkError::Incomplete)? + pos;
                let empty = end == pos;
                pos = end + 2;
                if empty {
                    return Ok((body, pos));
                }
            }
        }

        let data_end = pos.checked_add(size).ok_or(ChunkError::Invalid)?;
        if buf.len() < data_end + 2 {
            return Err(ChunkError::Incomplete);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ChunkError::Invalid);
        }

        body.extend_from_slice(&buf[pos..data_end]);
        pos = data_end + 2;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chunks_and_skips_extensions() {
        let raw = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let (body, consumed) = decode_chunked(raw).unwrap();

        assert_eq!(body, b"Wikipedia");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn trailers_are_consumed() {
        let raw = b"3\r\nabc\r\n0\r\nX-Trailer: yes\r\n\r\nNEXT";
        let (body, consumed) = decode_chunked(raw).unwrap();

        assert_eq!(body, b"abc");
        assert_eq!(&raw[consumed..], b"NEXT");
    }

    #[test]
    fn partial_input_is_incomplete() {
        assert_eq!(decode_chunked(b"a\r\nshort"), Err(ChunkError::Incomplete));
        assert_eq!(decode_chunked(b"3\r\nabc\r\n0\r\n"), Err(ChunkError::Incomplete));
    }

    #[test]
    fn bad_size_line_is_invalid() {
        assert_eq!(decode_chunked(b"zz\r\n"), Err(ChunkError::Invalid));
        assert_eq!(decode_chunked(b"3\r\nabcXX"), Err(ChunkError::Invalid));
    }
}
