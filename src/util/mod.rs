//! Utilities used by the barrier generator.

/// Address arithmetic.
pub mod address;
/// Size constants.
pub mod constants;
/// Alignment and unit conversions.
pub mod conversions;
/// The built-in logger.
pub mod logger;
/// Runtime options.
pub mod options;
/// Emission statistics.
pub mod statistics;
/// Test helpers: the mock assembler, the mock machine and fixtures.
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
