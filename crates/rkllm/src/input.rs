use std::{
    ffi::CString,
    os::raw::c_char,
    ptr,
};

use crate::{sys, RkllmError};

#[derive(Debug, Clone, PartialEq)]
/// What to feed the model for a single run. Mirrors `RKLLMInput`.
pub enum Input {
    /// Plain text. Any chat template must already be applied.
    Prompt(String),
    /// Pre-tokenized input.
    Tokens(Vec<i32>),
    /// Token embeddings, `n_tokens` rows laid out contiguously.
    Embedding {
        /// The embedding values.
        data: Vec<f32>,
        /// How many tokens `data` covers.
        n_tokens: usize,
    },
    /// A text prompt accompanied by image embeddings from a vision encoder.
    Multimodal {
        /// The text part of the input.
        prompt: String,
        /// The image embedding values.
        image_embedding: Vec<f32>,
        /// How many tokens `image_embedding` covers.
        n_image_tokens: usize,
    },
}
impl Input {
    pub(crate) fn to_raw(&self) -> Result<RawInput, RkllmError> {
        let mut owned = RawInput {
            text: None,
            tokens: Vec::new(),
            embedding: Vec::new(),
            embedding_tokens: 0,
            raw: sys::RKLLMInput {
                input_type: sys::RKLLMInputType_RKLLM_INPUT_PROMPT,
                __bindgen_anon_1: sys::RKLLMInput__bindgen_ty_1 {
                    prompt_input: ptr::null(),
                },
            },
        };

        match self {
            Input::Prompt(prompt) => {
                owned.text = Some(CString::new(prompt.as_str())?);
            }
            Input::Tokens(tokens) => {
                owned.raw.input_type = sys::RKLLMInputType_RKLLM_INPUT_TOKEN;
                owned.tokens = tokens.clone();
            }
            Input::Embedding { data, n_tokens } => {
                check_embedding(data.len(), *n_tokens)?;
                owned.raw.input_type = sys::RKLLMInputType_RKLLM_INPUT_EMBED;
                owned.embedding = data.clone();
                owned.embedding_tokens = *n_tokens;
            }
            Input::Multimodal {
                prompt,
                image_embedding,
                n_image_tokens,
            } => {
                check_embedding(image_embedding.len(), *n_image_tokens)?;
                owned.raw.input_type = sys::RKLLMInputType_RKLLM_INPUT_MULTIMODAL;
                owned.text = Some(CString::new(prompt.as_str())?);
                owned.embedding = image_embedding.clone();
                owned.embedding_tokens = *n_image_tokens;
            }
        }

        Ok(owned)
    }

    /// The number of tokens this input covers, if it is known without tokenizing.
    pub fn token_count(&self) -> Option<usize> {
        match self {
            Input::Prompt(_) | Input::Multimodal { .. } => None,
            Input::Tokens(tokens) => Some(tokens.len()),
            Input::Embedding { n_tokens, .. } => Some(*n_tokens),
        }
    }
}
impl From<String> for Input {
    fn from(prompt: String) -> Self {
        Input::Prompt(prompt)
    }
}
impl From<&str> for Input {
    fn from(prompt: &str) -> Self {
        Input::Prompt(prompt.to_owned())
    }
}

fn check_embedding(len: usize, n_tokens: usize) -> Result<(), RkllmError> {
    if n_tokens == 0 || len % n_tokens != 0 {
        return Err(RkllmError::InvalidEmbedding { len, n_tokens });
    }
    Ok(())
}

/// Owns the buffers a `RKLLMInput` points into.
pub(crate) struct RawInput {
    text: Option<CString>,
    tokens: Vec<i32>,
    embedding: Vec<f32>,
    embedding_tokens: usize,
    raw: sys::RKLLMInput,
}
impl RawInput {
    /// Wires up the union for the current input type. The result is valid until `self` is
    /// moved or dropped.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut sys::RKLLMInput {
        let text = self
            .text
            .as_ref()
            .map_or(ptr::null(), |text| text.as_ptr());

        self.raw.__bindgen_anon_1 = match self.raw.input_type {
            sys::RKLLMInputType_RKLLM_INPUT_TOKEN => sys::RKLLMInput__bindgen_ty_1 {
                token_input: sys::RKLLMTokenInput {
                    input_ids: self.tokens.as_mut_ptr(),
                    n_tokens: self.tokens.len(),
                },
            },
            sys::RKLLMInputType_RKLLM_INPUT_EMBED => sys::RKLLMInput__bindgen_ty_1 {
                embed_input: sys::RKLLMEmbedInput {
                    embed: self.embedding.as_mut_ptr(),
                    n_tokens: self.embedding_tokens,
                },
            },
            sys::RKLLMInputType_RKLLM_INPUT_MULTIMODAL => sys::RKLLMInput__bindgen_ty_1 {
                multimodal_input: sys::RKLLMMultiModelInput {
                    // The runtime never writes through this pointer.
                    prompt: text as *mut c_char,
                    image_embed: self.embedding.as_mut_ptr(),
                    n_image_tokens: self.embedding_tokens,
                },
            },
            _ => sys::RKLLMInput__bindgen_ty_1 { prompt_input: text },
        };

        &mut self.raw
    }
}
