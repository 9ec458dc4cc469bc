//! Binary primitive codec.
//!
//! All integers are little-endian u64. Strings are length-prefixed and padded
//! with zeroes to the next multiple of 8 bytes. Reads never validate anything
//! beyond the caller's length limit; the padding content is ignored.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_LIST_ITEM_LEN;
use crate::error::{RelayError, Result};

/// Number of zero bytes that follow a string of `len` bytes.
#[inline]
pub fn padding_len(len: u64) -> usize {
    ((8 - len % 8) % 8) as usize
}

/// Append a u64 to `buf`.
pub fn put_u64(buf: &mut BytesMut, value: u64) {
    buf.put_u64_le(value);
}

/// Append a boolean to `buf`.
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u64_le(u64::from(value));
}

/// Append a padded byte string to `buf`.
pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    let len = value.len() as u64;
    buf.reserve(8 + value.len() + 7);
    buf.put_u64_le(len);
    buf.put_slice(value);
    buf.put_bytes(0, padding_len(len));
}

/// Append a list of strings to `buf`.
pub fn put_strings<S: AsRef<str>>(buf: &mut BytesMut, values: &[S]) {
    buf.put_u64_le(values.len() as u64);
    for value in values {
        put_bytes(buf, value.as_ref().as_bytes());
    }
}

pub async fn read_u64<R>(r: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(r.read_u64_le().await?)
}

/// Read a u64, or `None` if the stream ends before its first byte.
///
/// A stream that ends part-way through the value is an `UnexpectedEof` error.
pub async fn read_u64_or_eof<R>(r: &mut R) -> Result<Option<u64>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {filled} of 8 bytes"),
            )
            .into());
        }
        filled += n;
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

pub async fn write_u64<W>(w: &mut W, value: u64) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    w.write_u64_le(value).await?;
    Ok(())
}

/// Read a boolean; any nonzero value is `true`.
pub async fn read_bool<R>(r: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(read_u64(r).await? != 0)
}

pub async fn write_bool<W>(w: &mut W, value: bool) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_u64(w, u64::from(value)).await
}

/// Read a padded byte string of at most `max` bytes.
pub async fn read_bytes<R>(r: &mut R, max: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_u64(r).await?;
    if len > max {
        return Err(RelayError::StringTooLong { len, max });
    }

    let mut value = vec![0u8; len as usize];
    r.read_exact(&mut value).await?;

    let mut padding = [0u8; 8];
    r.read_exact(&mut padding[..padding_len(len)]).await?;

    Ok(value)
}

/// Read a padded UTF-8 string of at most `max` bytes.
pub async fn read_string<R>(r: &mut R, max: u64) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let bytes = read_bytes(r, max).await?;
    String::from_utf8(bytes).map_err(|_| RelayError::InvalidUtf8)
}

/// Read a list of strings, each at most `MAX_LIST_ITEM_LEN` bytes.
pub async fn read_strings<R>(r: &mut R) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = read_u64(r).await?;
    // The count is peer-controlled; grow as elements actually arrive.
    let mut values = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        values.push(read_string(r, MAX_LIST_ITEM_LEN).await?);
    }
    Ok(values)
}

pub async fn write_bytes<W>(w: &mut W, value: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    put_bytes(&mut buf, value);
    w.write_all(&buf).await?;
    Ok(())
}

pub async fn write_string<W>(w: &mut W, value: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_bytes(w, value.as_bytes()).await
}

pub async fn write_strings<W, S>(w: &mut W, values: &[S]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    S: AsRef<str>,
{
    let mut buf = BytesMut::new();
    put_strings(&mut buf, values);
    w.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_up_to_eight() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(1), 7);
        assert_eq!(padding_len(7), 1);
        assert_eq!(padding_len(8), 0);
        assert_eq!(padding_len(13), 3);
    }

    #[test]
    fn string_frame_layout() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"abc");
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..8], &3u64.to_le_bytes());
        assert_eq!(&buf[8..11], b"abc");
        assert_eq!(&buf[11..], &[0u8; 5]);
    }

    #[test]
    fn empty_string_is_length_only() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"");
        assert_eq!(&buf[..], &0u64.to_le_bytes());
    }

    #[tokio::test]
    async fn string_over_limit_is_rejected() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"/nix/store/too-long");
        let mut reader = &buf[..];
        let err = read_string(&mut reader, 4).await.unwrap_err();
        assert!(matches!(err, RelayError::StringTooLong { len: 19, max: 4 }));
    }

    #[tokio::test]
    async fn string_at_limit_is_accepted() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"abcd");
        let mut reader = &buf[..];
        assert_eq!(read_string(&mut reader, 4).await.unwrap(), "abcd");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn truncated_string_is_eof() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 10);
        buf.put_slice(b"short");
        let mut reader = &buf[..];
        let err = read_bytes(&mut reader, 64).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn u64_or_eof_separates_clean_end_from_short_read() {
        let mut empty: &[u8] = &[];
        assert!(read_u64_or_eof(&mut empty).await.unwrap().is_none());

        let mut whole: &[u8] = &44u64.to_le_bytes();
        assert_eq!(read_u64_or_eof(&mut whole).await.unwrap(), Some(44));

        let mut short: &[u8] = &[44, 0, 0];
        let err = read_u64_or_eof(&mut short).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn bool_accepts_any_nonzero() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 0);
        put_u64(&mut buf, 1);
        put_u64(&mut buf, 7);
        let mut reader = &buf[..];
        assert!(!read_bool(&mut reader).await.unwrap());
        assert!(read_bool(&mut reader).await.unwrap());
        assert!(read_bool(&mut reader).await.unwrap());
    }

    #[tokio::test]
    async fn string_list_round_trip() {
        let mut out = Vec::new();
        write_strings(&mut out, &["/a", "/nix/store/bbbb-hello"]).await.unwrap();
        let mut reader = &out[..];
        let values = read_strings(&mut reader).await.unwrap();
        assert_eq!(values, vec!["/a".to_string(), "/nix/store/bbbb-hello".to_string()]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_reported() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xff, 0xfe]);
        let mut reader = &buf[..];
        assert!(matches!(
            read_string(&mut reader, 16).await,
            Err(RelayError::InvalidUtf8)
        ));
    }
}
