use std::{
    ffi::CStr,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::sys;

#[derive(Debug, Clone, PartialEq)]
/// A single invocation of the runtime's result callback during [crate::Llm::run].
pub enum RunEvent {
    /// A chunk of generated text.
    Token(String),
    /// The runtime is holding back an incomplete UTF-8 sequence.
    Waiting,
    /// Generation finished.
    Finished,
    /// The runtime reported an error. The run is over.
    Error,
    /// The final hidden layer for the input, when running in
    /// [crate::InferMode::LastHiddenLayer] mode.
    LastHiddenLayer(HiddenLayer),
    /// A callback state this crate does not know about.
    Unknown(i32),
}
impl RunEvent {
    /// Decodes a callback invocation.
    ///
    /// Returns `None` for a hidden-layer callback that carries no data.
    ///
    /// # Safety
    ///
    /// `result` must be null or point to a `RKLLMResult` whose pointers are valid for the
    /// duration of this call, as they are inside the runtime's callback.
    pub(crate) unsafe fn from_raw(
        result: *const sys::RKLLMResult,
        state: sys::LLMCallState,
    ) -> Option<Self> {
        let result = result.as_ref();
        Some(match state {
            sys::LLMCallState_RKLLM_RUN_NORMAL => RunEvent::Token(
                result
                    .filter(|r| !r.text.is_null())
                    .map(|r| CStr::from_ptr(r.text).to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            sys::LLMCallState_RKLLM_RUN_WAITING => RunEvent::Waiting,
            sys::LLMCallState_RKLLM_RUN_FINISH => RunEvent::Finished,
            sys::LLMCallState_RKLLM_RUN_ERROR => RunEvent::Error,
            sys::LLMCallState_RKLLM_RUN_GET_LAST_HIDDEN_LAYER => {
                RunEvent::LastHiddenLayer(HiddenLayer::from_raw(&result?.last_hidden_layer)?)
            }
            other => RunEvent::Unknown(other),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The last hidden layer of the model, one row of `embedding_size` values per input token.
pub struct HiddenLayer {
    embedding_size: usize,
    token_count: usize,
    states: Vec<f32>,
}
impl HiddenLayer {
    /// Creates a hidden layer from row-major `states`.
    ///
    /// Returns `None` if there are no states, or they do not divide evenly into rows of
    /// `embedding_size`.
    pub fn from_states(embedding_size: usize, states: Vec<f32>) -> Option<Self> {
        if embedding_size == 0 || states.is_empty() || states.len() % embedding_size != 0 {
            return None;
        }
        Some(Self {
            embedding_size,
            token_count: states.len() / embedding_size,
            states,
        })
    }

    /// Copies the hidden states out of the runtime's buffer, which is freed by the next callback.
    ///
    /// # Safety
    ///
    /// `hidden_states` must point to `embd_size * num_tokens` floats.
    unsafe fn from_raw(raw: &sys::RKLLMResultLastHiddenLayer) -> Option<Self> {
        let embedding_size = usize::try_from(raw.embd_size).ok()?;
        let token_count = usize::try_from(raw.num_tokens).ok()?;
        if raw.hidden_states.is_null() {
            return None;
        }

        let len = element_count(embedding_size, token_count)?;
        let states = std::slice::from_raw_parts(raw.hidden_states, len).to_vec();
        Self::from_states(embedding_size, states)
    }

    /// The width of each row.
    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    /// The number of rows.
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// All hidden states, row-major.
    pub fn states(&self) -> &[f32] {
        &self.states
    }

    /// The hidden state for the `index`th input token.
    pub fn token(&self, index: usize) -> Option<&[f32]> {
        self.states.chunks_exact(self.embedding_size).nth(index)
    }

    /// The size of the raw dump written by [HiddenLayer::write_to].
    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.states.as_slice())
    }

    /// Writes the states as raw native-endian `f32`s.
    pub fn write_to(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        for value in &self.states {
            writer.write_all(&value.to_ne_bytes())?;
        }
        Ok(())
    }

    /// Writes the states to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()
    }
}

/// The number of floats in a hidden layer, or `None` if it is empty or not addressable.
pub(crate) fn element_count(embedding_size: usize, token_count: usize) -> Option<usize> {
    let count = embedding_size.checked_mul(token_count)?;
    if count == 0 || count > isize::MAX as usize / std::mem::size_of::<f32>() {
        return None;
    }
    Some(count)
}
