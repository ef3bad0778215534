//! Fixed-width binary persistence.
//!
//! All records are written as a flat stream of little-endian fields with no
//! version tag, so a reader must know which record type comes next.

use std::io::{ self, Read, Write };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    /// Returned when the underlying stream fails.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Returned when attempting to write a leg with no identity.
    #[error("error in persistence: cannot write a null leg")]
    NullLeg,

    /// Returned when a stored category code is not recognized.
    #[error("error in persistence: unknown leg category code {0}")]
    UnknownCategory(i32),

    /// Returned when a stored arrow code is neither -1 nor +1.
    #[error("error in persistence: unknown arrow code {0}")]
    UnknownArrow(i32),

    /// Returned when a real/imaginary leg is read with a prime level other
    /// than 0, 1, or 2.
    #[error("error in persistence: illegal prime level {0} for a ReIm leg")]
    IllegalReImPrime(i32),

    /// Returned when a stored length or dimension is negative.
    #[error("error in persistence: negative size {0}")]
    NegativeSize(i64),

    /// Returned when a stored name is not valid UTF-8.
    #[error("error in persistence: leg name is not valid UTF-8")]
    BadName,

    /// Returned when a stored record violates one of its own invariants.
    #[error("error in persistence: inconsistent record: {0}")]
    Inconsistent(String),
}
use PersistError::*;
pub type PersistResult<T> = Result<T, PersistError>;

/// A type with a fixed binary layout.
pub trait Persist: Sized {
    /// Write `self` to a byte stream.
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized;

    /// Read a value of `Self` from a byte stream.
    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized;

    /// Write `self` to a new byte buffer.
    fn to_bytes(&self) -> PersistResult<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Read a value from the front of a byte slice.
    fn from_bytes(mut bytes: &[u8]) -> PersistResult<Self> {
        Self::read_from(&mut bytes)
    }
}

pub(crate) fn write_i32<W>(w: &mut W, x: i32) -> PersistResult<()>
where W: Write + ?Sized
{
    w.write_all(&x.to_le_bytes())?;
    Ok(())
}

pub(crate) fn read_i32<R>(r: &mut R) -> PersistResult<i32>
where R: Read + ?Sized
{
    let mut buf = [0_u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn write_u64<W>(w: &mut W, x: u64) -> PersistResult<()>
where W: Write + ?Sized
{
    w.write_all(&x.to_le_bytes())?;
    Ok(())
}

pub(crate) fn read_u64<R>(r: &mut R) -> PersistResult<u64>
where R: Read + ?Sized
{
    let mut buf = [0_u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn write_f64<W>(w: &mut W, x: f64) -> PersistResult<()>
where W: Write + ?Sized
{
    w.write_all(&x.to_le_bytes())?;
    Ok(())
}

pub(crate) fn read_f64<R>(r: &mut R) -> PersistResult<f64>
where R: Read + ?Sized
{
    let mut buf = [0_u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub(crate) fn write_bool<W>(w: &mut W, x: bool) -> PersistResult<()>
where W: Write + ?Sized
{
    w.write_all(&[x as u8])?;
    Ok(())
}

pub(crate) fn read_bool<R>(r: &mut R) -> PersistResult<bool>
where R: Read + ?Sized
{
    let mut buf = [0_u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

// dimensions and counts are stored as i32 like the rest of the header fields
pub(crate) fn write_len<W>(w: &mut W, n: usize) -> PersistResult<()>
where W: Write + ?Sized
{
    let n = i32::try_from(n)
        .map_err(|_| Inconsistent(format!("length {n} overflows i32")))?;
    write_i32(w, n)
}

pub(crate) fn read_len<R>(r: &mut R) -> PersistResult<usize>
where R: Read + ?Sized
{
    let n = read_i32(r)?;
    usize::try_from(n).map_err(|_| NegativeSize(n as i64))
}

/// Write a length-prefixed sequence of reals.
pub(crate) fn write_vec<W>(w: &mut W, v: &[f64]) -> PersistResult<()>
where W: Write + ?Sized
{
    write_len(w, v.len())?;
    v.iter().try_for_each(|x| write_f64(w, *x))
}

/// Read a length-prefixed sequence of reals.
pub(crate) fn read_vec<R>(r: &mut R) -> PersistResult<Vec<f64>>
where R: Read + ?Sized
{
    let n = read_len(r)?;
    (0..n).map(|_| read_f64(r)).collect()
}

/// Write a string as its length followed by its bytes and a NUL terminator.
pub(crate) fn write_name<W>(w: &mut W, name: &str) -> PersistResult<()>
where W: Write + ?Sized
{
    write_len(w, name.len())?;
    w.write_all(name.as_bytes())?;
    w.write_all(&[0])?;
    Ok(())
}

pub(crate) fn read_name<R>(r: &mut R) -> PersistResult<String>
where R: Read + ?Sized
{
    let n = read_len(r)?;
    let mut buf: Vec<u8> = vec![0; n + 1];
    r.read_exact(&mut buf)?;
    buf.pop();
    String::from_utf8(buf).map_err(|_| BadName)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_roundtrip() {
        let mut buf: Vec<u8> = Vec::new();
        write_i32(&mut buf, -7).unwrap();
        write_f64(&mut buf, 0.125).unwrap();
        write_bool(&mut buf, true).unwrap();
        write_name(&mut buf, "link").unwrap();
        write_vec(&mut buf, &[1.0, 0.5]).unwrap();
        // 4 + 8 + 1 + (4 + 4 + 1) + (4 + 16)
        assert_eq!(buf.len(), 42);

        let mut r: &[u8] = &buf;
        assert_eq!(read_i32(&mut r).unwrap(), -7);
        assert_eq!(read_f64(&mut r).unwrap(), 0.125);
        assert!(read_bool(&mut r).unwrap());
        assert_eq!(read_name(&mut r).unwrap(), "link");
        assert_eq!(read_vec(&mut r).unwrap(), vec![1.0, 0.5]);
        assert!(r.is_empty());
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut buf: Vec<u8> = Vec::new();
        write_i32(&mut buf, -3).unwrap();
        let mut r: &[u8] = &buf;
        assert!(matches!(read_len(&mut r), Err(NegativeSize(-3))));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let buf = [1_u8, 2];
        let mut r: &[u8] = &buf;
        assert!(matches!(read_i32(&mut r), Err(Io(_))));
    }
}
