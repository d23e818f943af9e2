//! Scalar wire forms shared by requests and replies.
//!
//! Everything here round-trips exactly: `get_*(put_*(x)) == x` for any
//! value the encode side can produce.

use bytes::{Buf, BufMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Address family tag values on the wire.
pub const FAMILY_UNSPEC: u16 = 0;
pub const FAMILY_INET4: u16 = 1;
pub const FAMILY_INET6: u16 = 2;

/// An IP address as carried on the wire: 16 address bytes (IPv4 in the
/// first four), a family tag, and two pad bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    /// No address. Also the decoding of any unrecognized family tag.
    Unspec,
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Addr {
    /// Encoded size in bytes.
    pub const WIRE_LEN: usize = 20;

    pub fn family(&self) -> u16 {
        match self {
            Addr::Unspec => FAMILY_UNSPEC,
            Addr::V4(_) => FAMILY_INET4,
            Addr::V6(_) => FAMILY_INET6,
        }
    }

    pub fn put<B: BufMut>(&self, buf: &mut B) {
        let mut bytes = [0u8; 16];
        match self {
            Addr::Unspec => {}
            Addr::V4(a) => bytes[..4].copy_from_slice(&a.octets()),
            Addr::V6(a) => bytes.copy_from_slice(&a.octets()),
        }
        buf.put_slice(&bytes);
        buf.put_u16(self.family());
        buf.put_u16(0);
    }

    pub fn get<B: Buf>(buf: &mut B) -> Addr {
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        let family = buf.get_u16();
        buf.get_u16();
        match family {
            FAMILY_INET4 => {
                Addr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            FAMILY_INET6 => Addr::V6(Ipv6Addr::from(bytes)),
            _ => Addr::Unspec,
        }
    }
}

impl Default for Addr {
    fn default() -> Self {
        Addr::Unspec
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Unspec => write!(f, "[UNSPEC]"),
            Addr::V4(a) => a.fmt(f),
            Addr::V6(a) => a.fmt(f),
        }
    }
}

impl From<std::net::IpAddr> for Addr {
    fn from(ip: std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(a) => Addr::V4(a),
            std::net::IpAddr::V6(a) => Addr::V6(a),
        }
    }
}

/// A (seconds, microseconds) pair in network order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireTimestamp {
    pub sec: u32,
    pub usec: u32,
}

impl WireTimestamp {
    /// Encoded size in bytes.
    pub const WIRE_LEN: usize = 8;

    pub fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.sec);
        buf.put_u32(self.usec);
    }

    pub fn get<B: Buf>(buf: &mut B) -> WireTimestamp {
        WireTimestamp {
            sec: buf.get_u32(),
            usec: buf.get_u32(),
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH
            + Duration::from_secs(u64::from(self.sec))
            + Duration::from_micros(u64::from(self.usec))
    }
}

impl From<SystemTime> for WireTimestamp {
    fn from(t: SystemTime) -> Self {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        WireTimestamp {
            sec: d.as_secs() as u32,
            usec: d.subsec_micros(),
        }
    }
}

/// Number of exponent bits in the packed float word.
const FLOAT_EXP_BITS: u32 = 7;
/// Number of coefficient bits in the packed float word.
const FLOAT_COEF_BITS: u32 = 32 - FLOAT_EXP_BITS;

const FLOAT_EXP_MIN: i32 = -(1 << (FLOAT_EXP_BITS - 1));
const FLOAT_EXP_MAX: i32 = -FLOAT_EXP_MIN - 1;
const FLOAT_COEF_MAX: i32 = (1 << (FLOAT_COEF_BITS - 1)) - 1;
const FLOAT_COEF_MASK: u32 = (1 << FLOAT_COEF_BITS) - 1;

/// Pack a value into the 32-bit wire float: a signed 7-bit exponent over a
/// signed 25-bit coefficient, value = coef * 2^exp.
///
/// The encoding keeps the largest coefficient that fits, so precision is
/// maximal for the magnitude. Values beyond the representable range
/// saturate at the signed extremes; magnitudes below ~1e-100 collapse to
/// zero.
pub fn pack_float(x: f64) -> u32 {
    let neg = i64::from(x < 0.0);
    let ax = x.abs();
    let mut exp: i32;
    let mut coef: i64;

    if ax < 1.0e-100 {
        exp = 0;
        coef = 0;
    } else if ax > 1.0e100 {
        exp = FLOAT_EXP_MAX;
        coef = i64::from(FLOAT_COEF_MAX) + neg;
    } else {
        exp = ax.log2().floor() as i32 + 1 - FLOAT_COEF_BITS as i32;
        coef = (ax * 2f64.powi(-exp) + 0.5) as i64;

        // rounding can carry past the top bit
        while coef > i64::from(FLOAT_COEF_MAX) + neg {
            coef >>= 1;
            exp += 1;
        }

        if exp > FLOAT_EXP_MAX {
            exp = FLOAT_EXP_MAX;
            coef = i64::from(FLOAT_COEF_MAX) + neg;
        } else if exp < FLOAT_EXP_MIN {
            if exp + FLOAT_COEF_BITS as i32 >= FLOAT_EXP_MIN {
                coef >>= (FLOAT_EXP_MIN - exp) as u32;
                exp = FLOAT_EXP_MIN;
            } else {
                exp = 0;
                coef = 0;
            }
        }
    }

    if neg != 0 {
        coef = -coef;
    }

    ((exp as u32) << FLOAT_COEF_BITS) | (coef as u32 & FLOAT_COEF_MASK)
}

/// Inverse of [`pack_float`].
pub fn unpack_float(word: u32) -> f64 {
    let exp = (word as i32) >> FLOAT_COEF_BITS;
    let coef = ((word as i32) << FLOAT_EXP_BITS) >> FLOAT_EXP_BITS;
    f64::from(coef) * 2f64.powi(exp)
}

pub fn put_float<B: BufMut>(buf: &mut B, x: f64) {
    buf.put_u32(pack_float(x));
}

pub fn get_float<B: Buf>(buf: &mut B) -> f64 {
    unpack_float(buf.get_u32())
}
