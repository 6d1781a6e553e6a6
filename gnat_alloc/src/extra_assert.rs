//! Heavyweight checks behind the `extra_assertions` feature.
//!
//! Both macros forward to the std assertion of the same name when the
//! feature is on. When it is off the check still parses and type-checks —
//! it just sits in an `if cfg!(...)` branch the compiler deletes — so a
//! disabled assertion can never drift out of date.

macro_rules! extra_assert {
    ( $( $check:tt )+ ) => {
        if cfg!(feature = "extra_assertions") {
            assert!( $( $check )+ );
        }
    };
}

macro_rules! extra_assert_eq {
    ( $( $check:tt )+ ) => {
        if cfg!(feature = "extra_assertions") {
            assert_eq!( $( $check )+ );
        }
    };
}
