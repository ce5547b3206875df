//! `rkllm` is a semi-idiomatic wrapper for the rkllm on-device LLM runtime.
//!
//! The runtime does all of the heavy lifting (model loading, tokenization, sampling, NPU
//! scheduling); this crate only owns the handle, translates parameters into the C structs and
//! turns the runtime's result callback into a stream of [RunEvent]s delivered to a closure.
//!
//! A model is loaded with [Llm::load] and prompted with [Llm::run]. Dropping the [Llm]
//! destroys the underlying handle.
#![deny(missing_docs)]

use std::{ffi::NulError, path::PathBuf};

use thiserror::Error;

mod event;
mod input;
mod llm;
mod params;

pub use event::{HiddenLayer, RunEvent};
pub use input::Input;
pub use llm::Llm;
pub use params::{
    InferMode, InferParameters, LoraAdapter, Mirostat, ModelParameters, PromptCacheParameters,
};

pub use rkllm_sys as sys;


/// The status code returned by the runtime. Zero is success.
pub type Status = i32;

#[derive(Error, Debug)]
/// Errors encountered while talking to the runtime.
pub enum RkllmError {
    #[error("the runtime failed to initialize the model (status {status})")]
    /// `rkllm_init` returned a non-zero status, or did not produce a handle.
    Init {
        /// The status returned by the runtime.
        status: Status,
    },
    #[error("the runtime failed to run inference (status {status})")]
    /// `rkllm_run` returned a non-zero status.
    Run {
        /// The status returned by the runtime.
        status: Status,
    },
    #[error("could not load LoRA adapter `{name}` (status {status})")]
    /// `rkllm_load_lora` returned a non-zero status.
    LoadLora {
        /// The name the adapter was registered under.
        name: String,
        /// The status returned by the runtime.
        status: Status,
    },
    #[error("could not load prompt cache from {path:?} (status {status})")]
    /// `rkllm_load_prompt_cache` returned a non-zero status.
    PromptCache {
        /// The prompt cache that was requested.
        path: PathBuf,
        /// The status returned by the runtime.
        status: Status,
    },
    #[error("could not release the prompt cache (status {status})")]
    /// `rkllm_release_prompt_cache` returned a non-zero status.
    ReleasePromptCache {
        /// The status returned by the runtime.
        status: Status,
    },
    #[error("string contains an interior nul byte")]
    /// A string passed to the runtime contained a nul byte.
    InvalidString(#[from] NulError),
    #[error("path {0:?} is not valid UTF-8")]
    /// A path passed to the runtime was not valid UTF-8.
    NonUtf8Path(PathBuf),
    #[error("{field} = {value} does not fit in the runtime's parameter type")]
    /// A numeric parameter was out of range for the C type it is stored in.
    OutOfRange {
        /// The name of the offending parameter.
        field: &'static str,
        /// The value that was provided.
        value: usize,
    },
    #[error("embedding of {len} values cannot be split evenly into {n_tokens} tokens")]
    /// An embedding input whose length is not a multiple of its token count.
    InvalidEmbedding {
        /// The number of values in the embedding.
        len: usize,
        /// The number of tokens the embedding claims to contain.
        n_tokens: usize,
    },
}

/// Maps a runtime status code to a `Result`, keeping the status on failure.
pub(crate) fn check(status: Status) -> Result<(), Status> {
    if status == 0 {
        Ok(())
    } else {
        Err(status)
    }
}

pub(crate) fn usize_to_i32(field: &'static str, value: usize) -> Result<i32, RkllmError> {
    i32::try_from(value).map_err(|_| RkllmError::OutOfRange { field, value })
}

pub(crate) fn path_to_cstring(path: &std::path::Path) -> Result<std::ffi::CString, RkllmError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RkllmError::NonUtf8Path(path.to_path_buf()))?;
    Ok(std::ffi::CString::new(path_str)?)
}
