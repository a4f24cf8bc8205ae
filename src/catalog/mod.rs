//! Function catalog: declared compute-function contracts and the
//! immutable compiled snapshot the resolver queries.

pub mod compiled;
pub mod descriptor;
