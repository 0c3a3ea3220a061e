//! Operational transformation for plain-text documents.
//!
//! This crate provides the value types and pure functions that the
//! collaboration server builds on:
//!
//! - [`Operation`]: an ordered sequence of retain/insert/delete primitives
//!   describing an edit against a known document length
//! - [`Operation::apply`]: materialize an edit against document content
//! - [`transform`]: rewrite one of two concurrent operations so that both
//!   orders of application converge (the TP1 property)
//!
//! All offsets are counted in Unicode code points, never bytes, so the same
//! arithmetic is valid on both sides of the wire.
//!
//! # Example
//!
//! ```
//! use ot::{Operation, Side, transform};
//!
//! let base = "abc";
//! let a = Operation::new().insert("x").retain(3);
//! let b = Operation::new().insert("y").retain(3);
//!
//! let b_at_a = transform(&b, &a, Side::Left).unwrap();
//! let doc = a.apply(base).unwrap();
//! assert_eq!(b_at_a.apply(&doc).unwrap(), "xyabc");
//! ```

pub mod operation;
pub mod transform;

pub use operation::{Operation, OtError, Prim};
pub use transform::{transform, Side};
