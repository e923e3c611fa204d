pub mod canon;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod exclusion;
pub mod fields;
pub mod handler;
pub mod headers;
pub mod http;
pub mod meta;
pub mod parser;
pub mod record;
pub mod stream;
pub mod writer;

pub use canon::{IdentityCanonicalizer, UrlKey};
pub use dispatch::DispatchMode;
pub use error::CdxError;
pub use exclusion::{Exclusion, PrefixExclusion};
pub use stream::{open_stream, CodecKind, RecordStream};
pub use writer::{CdxOptions, CdxWriter, Stats, Tolerance, DEFAULT_FORMAT};
