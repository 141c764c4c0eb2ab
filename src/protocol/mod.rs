pub(crate) mod error_shapes;
pub mod gemini;
