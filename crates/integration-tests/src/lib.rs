//! Shared library code for the integration test binary.
//!
//! Tests register themselves into a `linkme` distributed slice so `main.rs`
//! doesn't need a hand-maintained list of test functions.

// Needed here to work with linkme.
#![allow(unsafe_code)]

use linkme::distributed_slice;

/// A test function that returns a `Result`.
pub type TestFn = fn() -> color_eyre::Result<()>;

/// Metadata for a registered integration test.
#[derive(Debug)]
pub struct IntegrationTest {
    /// Name of the integration test.
    pub name: &'static str,
    /// Test function to execute.
    pub f: TestFn,
}

impl IntegrationTest {
    /// Create a new integration test with the given name and function.
    pub const fn new(name: &'static str, f: TestFn) -> Self {
        Self { name, f }
    }
}

/// Distributed slice holding all registered integration tests.
#[distributed_slice]
pub static INTEGRATION_TESTS: [IntegrationTest];

/// Register an integration test with less boilerplate.
///
/// # Examples
///
/// ```ignore
/// fn test_estimate_reports_per_disk_totals() -> Result<()> {
///     let output = run_v2kvm(&["--print-estimate", "--json", fixture.as_str()])?;
///     output.assert_success("print-estimate");
///     Ok(())
/// }
/// integration_test!(test_estimate_reports_per_disk_totals);
/// ```
#[macro_export]
macro_rules! integration_test {
    ($fn_name:ident) => {
        ::paste::paste! {
            #[distributed_slice($crate::INTEGRATION_TESTS)]
            static [<$fn_name:upper>]: $crate::IntegrationTest =
                $crate::IntegrationTest::new(stringify!($fn_name), $fn_name);
        }
    };
}
