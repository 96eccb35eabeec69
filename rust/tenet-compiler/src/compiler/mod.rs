pub mod ast;
pub mod cfg;
pub mod dataflow;
pub mod effects;
pub mod error_codes;
pub mod tokens;
pub mod verification;
