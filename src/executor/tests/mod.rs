//! Tests for the net executor
//!
//! Organized by operator family

mod do_tests;
mod helpers;
mod if_tests;
