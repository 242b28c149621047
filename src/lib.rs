pub mod cli;
pub mod collectors;
pub mod emitter;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod source;

pub mod built_info {
    #![allow(clippy::doc_markdown)]
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
