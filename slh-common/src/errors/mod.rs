//! Error catalog for the suite lifecycle harness.
//!
//! Every diagnostic the harness emits maps to a stable code, grouped to
//! mirror how failures propagate:
//!
//! | Range      | Category    | Stops the suite? |
//! |------------|-------------|------------------|
//! | E001-E099  | Setup       | yes (failure)    |
//! | E100-E199  | Assumption  | yes (skip)       |
//! | E200-E299  | Teardown    | no               |
//! | E300-E399  | Reap        | no               |
//! | E400-E499  | Budget      | no               |
//! | E500-E599  | Internal    | caller misuse    |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
