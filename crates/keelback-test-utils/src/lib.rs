// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Test utilities shared between the workspace crates.

/// A result type useful in tests, that wraps any error implementation.
pub type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Macro for creating parametrized *synchronous* tests.
///
/// Takes the name of an existing function followed by a list of case names
/// with their arguments, and expands to a module containing one `#[test]`
/// per case. An optional return type (e.g. a [`Result`]) can be given after
/// the function name, and attributes such as `#[ignore]` can be attached to
/// individual cases.
///
/// ```
/// # use keelback_test_utils::param_test;
/// param_test! {
///     test_sum: [
///         positive: (10, 7, 17),
///         negative: (-5, -3, -8),
///     ]
/// }
/// fn test_sum(lhs: i32, rhs: i32, sum: i32) {
///     assert_eq!(lhs + rhs, sum);
/// }
/// # fn main() {}
/// ```
#[macro_export]
macro_rules! param_test {
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$attrs:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $(
                #[test]
                $(#[$attrs])*
                fn $case_name() -> $return_ty {
                    $func_name($($args),*)
                }
            )*
        }
    };
    ($func_name:ident: [
        $( $(#[$attrs:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        $crate::param_test!(
            $func_name -> (): [ $( $(#[$attrs])* $case_name: ( $($args),* ) ),+ ]
        );
    };
}

/// Macro for creating parametrized `async` tests, the [`param_test`]
/// counterpart for `#[tokio::test]` functions.
///
/// Attributes placed before a case name are applied to the generated test
/// function, after the `#[tokio::test]` attribute.
#[macro_export]
macro_rules! async_param_test {
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$attrs:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $(
                #[tokio::test]
                $(#[$attrs])*
                async fn $case_name() -> $return_ty {
                    $func_name($($args),*).await
                }
            )*
        }
    };
    ($func_name:ident: [
        $( $(#[$attrs:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        $crate::async_param_test!(
            $func_name -> (): [ $( $(#[$attrs])* $case_name: ( $($args),* ) ),+ ]
        );
    };
}

#[cfg(test)]
mod tests {
    param_test! {
        adds_up -> crate::Result: [
            small: (1, 2, 3),
            zero: (0, 0, 0),
        ]
    }
    fn adds_up(lhs: u32, rhs: u32, sum: u32) -> crate::Result {
        assert_eq!(lhs + rhs, sum);
        Ok(())
    }

    async_param_test! {
        yields_back: [
            once: (1),
            twice: (2),
        ]
    }
    async fn yields_back(times: usize) {
        for _ in 0..times {
            tokio::task::yield_now().await;
        }
    }
}
