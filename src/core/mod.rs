// Core modules implementing buffering, piping, encoding, and error modeling.
pub mod active;
pub mod buffered;
pub mod error;
pub mod mime;
pub mod multipart;
pub mod pipe;
