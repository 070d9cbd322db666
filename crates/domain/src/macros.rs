//! Macro for string conversions on record state enums
//!
//! Record states are stored as lowercase strings and parsed back
//! case-insensitively, so every state enum shares the same `Display`,
//! `FromStr` and `as_str` implementations.
//!
//! # Example
//!
//! ```rust
//! use marketpulse_domain::impl_state_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum FeedState {
//!     Idle,
//!     Polling,
//! }
//!
//! impl_state_conversions!(FeedState {
//!     Idle => "idle",
//!     Polling => "polling",
//! });
//!
//! assert_eq!(FeedState::Polling.as_str(), "polling");
//! assert_eq!("IDLE".parse::<FeedState>().unwrap(), FeedState::Idle);
//! ```

/// Implements `as_str`, `Display` and `FromStr` for a state enum
///
/// Parsing is case-insensitive; unknown values yield
/// `MarketPulseError::InvalidInput` naming the enum.
#[macro_export]
macro_rules! impl_state_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical lowercase name
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::errors::MarketPulseError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($str) {
                        return Ok(Self::$variant);
                    }
                )+
                Err($crate::errors::MarketPulseError::InvalidInput(format!(
                    "invalid {}: {}",
                    stringify!($enum_name),
                    s
                )))
            }
        }
    };
}
