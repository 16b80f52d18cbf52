//! Flow cookie codec.
//!
//! A cookie is the 64-bit identifier stamped on every rule the controller
//! installs. Besides identifying the rule it encodes the flow direction.
//!
//! Two layouts coexist on live networks:
//!
//! | Layout | Detection | Forward | Reverse |
//! |--------|-----------|---------|---------|
//! | Controller | any bit of `0xE000_0000_0000_0000` set | `0x4000_0000_0000_0000` set | `0x2000_0000_0000_0000` set |
//! | Legacy | top three bits clear | `0x0080_0000_0000_0000` clear | `0x0080_0000_0000_0000` set |
//!
//! The graph store keeps cookies as signed 64-bit integers while switches
//! report them unsigned; [`Cookie`] holds the raw bit pattern so both views
//! compare equal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits that mark a controller-produced cookie.
pub const COOKIE_TYPE_MASK: u64 = 0xE000_0000_0000_0000;
/// Direction bit for forward controller cookies.
pub const FORWARD_FLOW_FLAG: u64 = 0x4000_0000_0000_0000;
/// Direction bit for reverse controller cookies.
pub const REVERSE_FLOW_FLAG: u64 = 0x2000_0000_0000_0000;
/// Direction bit for legacy cookies (set = reverse).
pub const LEGACY_REVERSE_FLAG: u64 = 0x0080_0000_0000_0000;

/// Error returned when a display-form cookie cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid cookie {input:?}: expected 0x-prefixed hexadecimal")]
pub struct CookieParseError {
    input: String,
}

/// Direction of a flow as encoded in its cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Source to destination.
    Forward,
    /// Destination back to source.
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// 64-bit rule cookie.
///
/// Serializes as an unsigned integer. Ordering is by unsigned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(u64);

impl Cookie {
    /// Wrap a raw unsigned cookie.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Reinterpret a signed store value as a cookie (two's complement).
    pub const fn from_signed(value: i64) -> Self {
        Self(value as u64)
    }

    /// Raw unsigned value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Signed value as persisted by the graph store.
    pub const fn as_signed(self) -> i64 {
        self.0 as i64
    }

    /// True when the cookie uses the controller layout.
    pub const fn is_controller_cookie(self) -> bool {
        self.0 & COOKIE_TYPE_MASK != 0
    }

    /// True when the cookie marks a forward flow.
    pub const fn is_forward(self) -> bool {
        if self.is_controller_cookie() {
            self.0 & FORWARD_FLOW_FLAG != 0
        } else {
            self.0 & LEGACY_REVERSE_FLAG == 0
        }
    }

    /// True when the cookie marks a reverse flow.
    pub const fn is_reverse(self) -> bool {
        if self.is_controller_cookie() {
            self.0 & REVERSE_FLOW_FLAG != 0
        } else {
            self.0 & LEGACY_REVERSE_FLAG != 0
        }
    }

    /// Decoded direction.
    ///
    /// Returns `None` for cookies that are not valid flow cookies: controller
    /// cookies with both or neither direction bit set (system rules such as
    /// `0x8000000000000001` fall in this bucket).
    pub const fn direction(self) -> Option<Direction> {
        match (self.is_forward(), self.is_reverse()) {
            (true, false) => Some(Direction::Forward),
            (false, true) => Some(Direction::Reverse),
            _ => None,
        }
    }

    /// Parse the `0x…` display form produced by [`Cookie`]'s `Display`.
    pub fn parse_display(s: &str) -> Result<Self, CookieParseError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| CookieParseError { input: s.to_string() })?;
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| CookieParseError { input: s.to_string() })
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Cookie {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<i64> for Cookie {
    fn from(value: i64) -> Self {
        Self::from_signed(value)
    }
}

/// True when the signed store cookie marks a forward flow.
pub fn is_forward(cookie: i64) -> bool {
    Cookie::from_signed(cookie).is_forward()
}

/// True when the signed store cookie marks a reverse flow.
pub fn is_reverse(cookie: i64) -> bool {
    Cookie::from_signed(cookie).is_reverse()
}

/// True when both cookies are forward or both are reverse.
pub fn same_direction(first: Cookie, second: Cookie) -> bool {
    (first.is_forward() && second.is_forward()) || (first.is_reverse() && second.is_reverse())
}

/// Render a signed store cookie the way switches report it.
///
/// Negative values map to their unsigned two's-complement pattern, so
/// `-1` renders as `0xffffffffffffffff`.
pub fn cookie_to_display(cookie: i64) -> String {
    Cookie::from_signed(cookie).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_controller_cookie_direction() {
        let forward = Cookie::new(0x4000_0000_0000_0001);
        let reverse = Cookie::new(0x2000_0000_0000_0001);

        assert!(forward.is_forward());
        assert!(!forward.is_reverse());
        assert!(reverse.is_reverse());
        assert!(!reverse.is_forward());
        assert_eq!(forward.direction(), Some(Direction::Forward));
        assert_eq!(reverse.direction(), Some(Direction::Reverse));
    }

    #[test]
    fn test_legacy_cookie_direction() {
        assert!(is_forward(0x0000_0000_0000_0042));
        assert!(is_reverse(0x0080_0000_0000_0042));
        assert!(!is_forward(0x0080_0000_0000_0042));
    }

    #[test]
    fn test_system_cookie_has_no_direction() {
        let system = Cookie::new(0x8000_0000_0000_0001);
        assert!(system.is_controller_cookie());
        assert_eq!(system.direction(), None);
    }

    #[test]
    fn test_same_direction() {
        let f1 = Cookie::new(0x4000_0000_0000_0001);
        let f2 = Cookie::new(0x0000_0000_0000_0002);
        let r1 = Cookie::new(0x2000_0000_0000_0001);

        assert!(same_direction(f1, f2));
        assert!(!same_direction(f1, r1));
        assert!(same_direction(r1, Cookie::new(0x0080_0000_0000_0007)));
    }

    #[test]
    fn test_display_negative() {
        assert_eq!(cookie_to_display(-1), "0xffffffffffffffff");
        assert_eq!(
            cookie_to_display(0x8000_0000_0000_0001_u64 as i64),
            "0x8000000000000001"
        );
        assert_eq!(cookie_to_display(0x10), "0x10");
    }

    #[test]
    fn test_parse_display_rejects_garbage() {
        assert!(Cookie::parse_display("42").is_err());
        assert!(Cookie::parse_display("0xzz").is_err());
        assert_eq!(
            Cookie::parse_display("0X4000000000000001").unwrap(),
            Cookie::new(0x4000_0000_0000_0001)
        );
    }

    fn valid_cookie() -> impl Strategy<Value = u64> {
        prop_oneof![
            // legacy layout: top three bits clear
            any::<u64>().prop_map(|v| v & !COOKIE_TYPE_MASK),
            // controller layout, forward
            any::<u64>().prop_map(|v| (v & !(FORWARD_FLOW_FLAG | REVERSE_FLOW_FLAG)) | FORWARD_FLOW_FLAG),
            // controller layout, reverse
            any::<u64>().prop_map(|v| (v & !(FORWARD_FLOW_FLAG | REVERSE_FLOW_FLAG)) | REVERSE_FLOW_FLAG),
        ]
    }

    proptest! {
        #[test]
        fn prop_exactly_one_direction(raw in valid_cookie()) {
            let cookie = Cookie::new(raw);
            prop_assert!(cookie.is_forward() ^ cookie.is_reverse());
            prop_assert!(cookie.direction().is_some());
        }

        #[test]
        fn prop_display_round_trip(signed in any::<i64>()) {
            let shown = cookie_to_display(signed);
            let parsed = u64::from_str_radix(shown.trim_start_matches("0x"), 16).unwrap();
            prop_assert_eq!(parsed, signed as u64);
            prop_assert_eq!(Cookie::parse_display(&shown).unwrap(), Cookie::from_signed(signed));
        }
    }
}
