#![doc(test(attr(deny(warnings))))]

//! Contains the merge-join algorithms of the execution engine.
//!
//! All algorithms operate on inputs that are sorted on their join columns and implement the
//! compatibility semantics of SPARQL, where UNDEF matches every value.

pub mod join;
