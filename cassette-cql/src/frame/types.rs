//! Protocol notations: `[int]`, `[string]`, `[bytes]`, `[inet]` and friends.
//!
//! Readers take `&mut &[u8]` and advance it past what they consumed. Writers
//! append big-endian encodings to any [`BufMut`]; the ones that can overflow a
//! length prefix return `TryFromIntError`.

use super::frame_errors::LowLevelDeserializationError;
use super::TryFromPrimitiveError;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::num::TryFromIntError;
use uuid::Uuid;

/// Consistency level of a request.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    #[default]
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}

impl Consistency {
    const LEVELS: [(Consistency, &'static str); 11] = [
        (Consistency::Any, "ANY"),
        (Consistency::One, "ONE"),
        (Consistency::Two, "TWO"),
        (Consistency::Three, "THREE"),
        (Consistency::Quorum, "QUORUM"),
        (Consistency::All, "ALL"),
        (Consistency::LocalQuorum, "LOCAL_QUORUM"),
        (Consistency::EachQuorum, "EACH_QUORUM"),
        (Consistency::Serial, "SERIAL"),
        (Consistency::LocalSerial, "LOCAL_SERIAL"),
        (Consistency::LocalOne, "LOCAL_ONE"),
    ];

    /// Name used by the server in messages and by CQL shells.
    pub fn as_str(self) -> &'static str {
        Self::LEVELS[self as usize].1
    }
}

impl TryFrom<u16> for Consistency {
    type Error = TryFromPrimitiveError<u16>;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::LEVELS
            .get(value as usize)
            .map(|(level, _)| *level)
            .ok_or(TryFromPrimitiveError {
                enum_name: "Consistency",
                primitive: value,
            })
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits off exactly `count` bytes.
pub(crate) fn read_raw_bytes<'a>(
    count: usize,
    buf: &mut &'a [u8],
) -> Result<&'a [u8], LowLevelDeserializationError> {
    if buf.len() < count {
        return Err(LowLevelDeserializationError::TooFewBytesReceived {
            expected: count,
            received: buf.len(),
        });
    }
    let (taken, rest) = buf.split_at(count);
    *buf = rest;
    Ok(taken)
}

fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], LowLevelDeserializationError> {
    Ok(read_raw_bytes(N, buf)?.try_into()?)
}

pub fn read_byte(buf: &mut &[u8]) -> Result<u8, LowLevelDeserializationError> {
    Ok(buf.read_u8()?)
}

pub fn read_short(buf: &mut &[u8]) -> Result<u16, LowLevelDeserializationError> {
    Ok(buf.read_u16::<BigEndian>()?)
}

pub fn write_short(v: u16, buf: &mut impl BufMut) {
    buf.put_u16(v);
}

pub fn read_int(buf: &mut &[u8]) -> Result<i32, LowLevelDeserializationError> {
    Ok(buf.read_i32::<BigEndian>()?)
}

pub fn write_int(v: i32, buf: &mut impl BufMut) {
    buf.put_i32(v);
}

pub fn read_long(buf: &mut &[u8]) -> Result<i64, LowLevelDeserializationError> {
    Ok(buf.read_i64::<BigEndian>()?)
}

pub fn write_long(v: i64, buf: &mut impl BufMut) {
    buf.put_i64(v);
}

/// An `[int]` that must not be negative.
pub fn read_int_length(buf: &mut &[u8]) -> Result<usize, LowLevelDeserializationError> {
    Ok(usize::try_from(read_int(buf)?)?)
}

fn write_int_length(len: usize, buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_int(i32::try_from(len)?, buf);
    Ok(())
}

fn read_short_length(buf: &mut &[u8]) -> Result<usize, LowLevelDeserializationError> {
    read_short(buf).map(usize::from)
}

fn write_short_length(len: usize, buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_short(u16::try_from(len)?, buf);
    Ok(())
}

/// `[bytes]`; any negative length stands for null.
pub fn read_bytes_opt<'a>(
    buf: &mut &'a [u8],
) -> Result<Option<&'a [u8]>, LowLevelDeserializationError> {
    match usize::try_from(read_int(buf)?) {
        Ok(len) => read_raw_bytes(len, buf).map(Some),
        Err(_) => Ok(None),
    }
}

/// `[bytes]` where null is an error.
pub fn read_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LowLevelDeserializationError> {
    let len = read_int_length(buf)?;
    read_raw_bytes(len, buf)
}

pub fn write_bytes(v: &[u8], buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_int_length(v.len(), buf)?;
    buf.put_slice(v);
    Ok(())
}

pub fn write_bytes_opt(
    v: Option<impl AsRef<[u8]>>,
    buf: &mut impl BufMut,
) -> Result<(), TryFromIntError> {
    let Some(v) = v else {
        write_int(-1, buf);
        return Ok(());
    };
    write_bytes(v.as_ref(), buf)
}

pub fn read_short_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    read_raw_bytes(len, buf)
}

pub fn write_short_bytes(v: &[u8], buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_short_length(v.len(), buf)?;
    buf.put_slice(v);
    Ok(())
}

pub fn read_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, LowLevelDeserializationError> {
    Ok(std::str::from_utf8(read_short_bytes(buf)?)?)
}

pub fn write_string(v: &str, buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_short_bytes(v.as_bytes(), buf)
}

pub fn read_long_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, LowLevelDeserializationError> {
    Ok(std::str::from_utf8(read_bytes(buf)?)?)
}

pub fn write_long_string(v: &str, buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_bytes(v.as_bytes(), buf)
}

/// Reads a `[short]` count followed by that many elements.
fn read_counted<'a, T, C: FromIterator<T>>(
    buf: &mut &'a [u8],
    mut element: impl FnMut(&mut &'a [u8]) -> Result<T, LowLevelDeserializationError>,
) -> Result<C, LowLevelDeserializationError> {
    let count = read_short_length(buf)?;
    (0..count).map(|_| element(buf)).collect()
}

fn write_counted<I, B>(
    items: I,
    buf: &mut B,
    mut element: impl FnMut(I::Item, &mut B) -> Result<(), TryFromIntError>,
) -> Result<(), TryFromIntError>
where
    I: IntoIterator,
    I::IntoIter: ExactSizeIterator,
    B: BufMut,
{
    let mut items = items.into_iter();
    write_short_length(items.len(), buf)?;
    items.try_for_each(|item| element(item, buf))
}

pub fn read_string_list(buf: &mut &[u8]) -> Result<Vec<String>, LowLevelDeserializationError> {
    read_counted(buf, |buf| read_string(buf).map(str::to_owned))
}

pub fn write_string_list(v: &[impl AsRef<str>], buf: &mut impl BufMut) -> Result<(), TryFromIntError> {
    write_counted(v, buf, |s, buf| write_string(s.as_ref(), buf))
}

pub fn read_string_map(
    buf: &mut &[u8],
) -> Result<HashMap<String, String>, LowLevelDeserializationError> {
    read_counted(buf, |buf| {
        let key = read_string(buf)?.to_owned();
        Ok((key, read_string(buf)?.to_owned()))
    })
}

pub fn write_string_map(
    v: &HashMap<impl AsRef<str>, impl AsRef<str>>,
    buf: &mut impl BufMut,
) -> Result<(), TryFromIntError> {
    write_counted(v, buf, |(key, value), buf| {
        write_string(key.as_ref(), buf)?;
        write_string(value.as_ref(), buf)
    })
}

pub fn read_string_multimap(
    buf: &mut &[u8],
) -> Result<HashMap<String, Vec<String>>, LowLevelDeserializationError> {
    read_counted(buf, |buf| {
        let key = read_string(buf)?.to_owned();
        Ok((key, read_string_list(buf)?))
    })
}

pub fn write_string_multimap(
    v: &HashMap<String, Vec<String>>,
    buf: &mut impl BufMut,
) -> Result<(), TryFromIntError> {
    write_counted(v, buf, |(key, values), buf| {
        write_string(key, buf)?;
        write_string_list(values.as_slice(), buf)
    })
}

pub fn read_uuid(buf: &mut &[u8]) -> Result<Uuid, LowLevelDeserializationError> {
    read_array(buf).map(Uuid::from_bytes)
}

pub fn write_uuid(uuid: &Uuid, buf: &mut impl BufMut) {
    buf.put_slice(uuid.as_bytes());
}

pub fn read_consistency(buf: &mut &[u8]) -> Result<Consistency, LowLevelDeserializationError> {
    Ok(Consistency::try_from(read_short(buf)?)?)
}

pub fn write_consistency(c: Consistency, buf: &mut impl BufMut) {
    write_short(c as u16, buf);
}

/// `[inet]`: a one byte address size, the address, then the port as `[int]`.
pub fn read_inet(buf: &mut &[u8]) -> Result<SocketAddr, LowLevelDeserializationError> {
    let ip = match read_byte(buf)? {
        4 => IpAddr::V4(Ipv4Addr::from(read_array::<4>(buf)?)),
        16 => IpAddr::V6(Ipv6Addr::from(read_array::<16>(buf)?)),
        other => return Err(LowLevelDeserializationError::InvalidInetLength(other)),
    };
    let port = read_int(buf)?;
    Ok(SocketAddr::new(ip, port as u16))
}

pub fn write_inet(addr: SocketAddr, buf: &mut impl BufMut) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(4);
            buf.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(16);
            buf.put_slice(&ip.octets());
        }
    }
    write_int(i32::from(addr.port()), buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::BytesMut;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = Vec::new();
        write_int(0x0102_0304, &mut buf);
        write_short(0x0506, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);

        let mut slice = &buf[..];
        assert_eq!(read_int(&mut slice).unwrap(), 0x0102_0304);
        assert_eq!(read_short(&mut slice).unwrap(), 0x0506);

        buf.clear();
        write_long(-2, &mut buf);
        assert_eq!(read_long(&mut &buf[..]).unwrap(), -2);
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut buf = Vec::new();
        write_int(-3, &mut buf);
        assert_matches!(
            read_int_length(&mut &buf[..]),
            Err(LowLevelDeserializationError::TryFromIntError(_))
        );
        assert_eq!(read_bytes_opt(&mut &buf[..]).unwrap(), None);
    }

    #[test]
    fn strings() {
        for val in ["", "keyspace", "zażółć gęślą jaźń"] {
            let mut buf = Vec::new();
            write_string(val, &mut buf).unwrap();
            write_long_string(val, &mut buf).unwrap();
            assert_eq!(buf.len(), 2 + 4 + 2 * val.len());

            let mut slice = &buf[..];
            assert_eq!(read_string(&mut slice).unwrap(), val);
            assert_eq!(read_long_string(&mut slice).unwrap(), val);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn bytes_and_null() {
        let mut buf = BytesMut::new();
        write_bytes(&[0xDE, 0xAD], &mut buf).unwrap();
        write_short_bytes(&[], &mut buf).unwrap();
        write_bytes_opt(None::<&[u8]>, &mut buf).unwrap();

        let mut slice = &buf[..];
        assert_eq!(read_bytes(&mut slice).unwrap(), &[0xDE_u8, 0xAD][..]);
        assert!(read_short_bytes(&mut slice).unwrap().is_empty());
        assert_eq!(read_bytes_opt(&mut slice).unwrap(), None);
        assert!(slice.is_empty());
    }

    #[test]
    fn oversized_short_string() {
        let val = "x".repeat(usize::from(u16::MAX) + 1);
        assert!(write_string(&val, &mut Vec::new()).is_err());
    }

    #[test]
    fn truncated_string() {
        let buf = [0x00, 0x05, b'a', b'b'];
        assert_matches!(
            read_string(&mut &buf[..]),
            Err(LowLevelDeserializationError::TooFewBytesReceived {
                expected: 5,
                received: 2
            })
        );
    }

    #[test]
    fn string_collections() {
        let list = vec!["TOPOLOGY_CHANGE".to_owned(), String::new()];
        let map = HashMap::from([
            ("CQL_VERSION".to_owned(), "3.0.0".to_owned()),
            ("COMPRESSION".to_owned(), "snappy".to_owned()),
        ]);
        let multimap = HashMap::from([
            ("COMPRESSION".to_owned(), vec!["snappy".to_owned(), "lz4".to_owned()]),
            ("EMPTY".to_owned(), vec![]),
        ]);

        let mut buf = Vec::new();
        write_string_list(&list, &mut buf).unwrap();
        write_string_map(&map, &mut buf).unwrap();
        write_string_multimap(&multimap, &mut buf).unwrap();

        let mut slice = &buf[..];
        assert_eq!(read_string_list(&mut slice).unwrap(), list);
        assert_eq!(read_string_map(&mut slice).unwrap(), map);
        assert_eq!(read_string_multimap(&mut slice).unwrap(), multimap);
        assert!(slice.is_empty());
    }

    #[test]
    fn consistency_levels() {
        let mut buf = Vec::new();
        write_consistency(Consistency::LocalQuorum, &mut buf);
        assert_eq!(buf, [0x00, 0x06]);
        assert_eq!(
            read_consistency(&mut &buf[..]).unwrap(),
            Consistency::LocalQuorum
        );
        assert_eq!(Consistency::LocalQuorum.to_string(), "LOCAL_QUORUM");
        assert_eq!(Consistency::try_from(0x000A_u16), Ok(Consistency::LocalOne));

        assert_matches!(
            read_consistency(&mut &[0x12u8, 0x34][..]),
            Err(LowLevelDeserializationError::UnknownConsistency(_))
        );
    }

    #[test]
    fn inet() {
        let v4: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        let v6: SocketAddr = "[::1]:9043".parse().unwrap();
        let mut buf = Vec::new();
        write_inet(v4, &mut buf);
        write_inet(v6, &mut buf);
        assert_eq!(buf.len(), (1 + 4 + 4) + (1 + 16 + 4));

        let mut slice = &buf[..];
        assert_eq!(read_inet(&mut slice).unwrap(), v4);
        assert_eq!(read_inet(&mut slice).unwrap(), v6);

        assert_matches!(
            read_inet(&mut &[4u8, 127, 0][..]),
            Err(LowLevelDeserializationError::TooFewBytesReceived { .. })
        );
        assert_matches!(
            read_inet(&mut &[5u8, 0, 0, 0, 0, 0][..]),
            Err(LowLevelDeserializationError::InvalidInetLength(5))
        );
    }
}
