use std::{
    ffi::{CStr, CString},
    path::PathBuf,
    ptr,
};

use crate::{path_to_cstring, sys, usize_to_i32, RkllmError};

#[derive(Debug, Clone, PartialEq)]
/// The parameters used to load a model. Mirrors `RKLLMParam`.
///
/// Anything not modelled here keeps the value from `rkllm_createDefaultParam`.
pub struct ModelParameters {
    /// The `.rkllm` model to load.
    pub model_path: PathBuf,
    /// The size of the context window, in tokens.
    pub max_context_len: usize,
    /// The maximum number of tokens to generate per run.
    pub max_new_tokens: usize,
    /// The top K words by score are kept during sampling.
    pub top_k: usize,
    /// The cumulative probability after which no more words are kept for sampling.
    pub top_p: f32,
    /// Temperature (randomness) used for sampling. A higher number is more random.
    pub temperature: f32,
    /// The penalty for repeating tokens.
    pub repeat_penalty: f32,
    /// Penalty proportional to how often a token has already appeared.
    pub frequency_penalty: f32,
    /// Penalty applied once a token has appeared at all.
    pub presence_penalty: f32,
    /// Mirostat sampling, replacing top-k/top-p when enabled.
    pub mirostat: Mirostat,
    /// Whether special tokens are stripped from the generated text.
    pub skip_special_token: bool,
    /// The IOMMU domain to place the model in. Only relevant when loading several models.
    pub base_domain_id: i32,
}
impl ModelParameters {
    /// Creates parameters for the model at `model_path` with the chat demo's sampling defaults.
    pub fn new(model_path: impl Into<PathBuf>, max_new_tokens: usize, max_context_len: usize) -> Self {
        Self {
            model_path: model_path.into(),
            max_context_len,
            max_new_tokens,
            top_k: 1,
            top_p: 0.95,
            temperature: 0.8,
            repeat_penalty: 1.1,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: Mirostat::Disabled,
            skip_special_token: true,
            base_domain_id: 0,
        }
    }

    /// Overwrites the modelled fields of `raw`, which should come from `rkllm_createDefaultParam`.
    ///
    /// `model_path` must outlive every use of `raw`.
    pub(crate) fn apply(&self, raw: &mut sys::RKLLMParam, model_path: &CStr) -> Result<(), RkllmError> {
        raw.model_path = model_path.as_ptr();
        raw.max_context_len = usize_to_i32("max_context_len", self.max_context_len)?;
        raw.max_new_tokens = usize_to_i32("max_new_tokens", self.max_new_tokens)?;
        raw.top_k = usize_to_i32("top_k", self.top_k)?;
        raw.top_p = self.top_p;
        raw.temperature = self.temperature;
        raw.repeat_penalty = self.repeat_penalty;
        raw.frequency_penalty = self.frequency_penalty;
        raw.presence_penalty = self.presence_penalty;
        raw.skip_special_token = self.skip_special_token;
        raw.extend_param.base_domain_id = self.base_domain_id;

        match self.mirostat {
            Mirostat::Disabled => raw.mirostat = 0,
            Mirostat::V1 { tau, eta } | Mirostat::V2 { tau, eta } => {
                raw.mirostat = self.mirostat.version();
                raw.mirostat_tau = tau;
                raw.mirostat_eta = eta;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
/// [Mirostat](https://arxiv.org/abs/2007.14966) sampling.
pub enum Mirostat {
    #[default]
    /// Use top-k/top-p sampling.
    Disabled,
    /// Mirostat.
    V1 {
        /// Target surprise.
        tau: f32,
        /// Learning rate.
        eta: f32,
    },
    /// Mirostat 2.0.
    V2 {
        /// Target surprise.
        tau: f32,
        /// Learning rate.
        eta: f32,
    },
}
impl Mirostat {
    fn version(&self) -> i32 {
        match self {
            Mirostat::Disabled => 0,
            Mirostat::V1 { .. } => 1,
            Mirostat::V2 { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A [LoRA](https://arxiv.org/abs/2106.09685) adapter to register with a loaded model.
pub struct LoraAdapter {
    /// The adapter file.
    pub path: PathBuf,
    /// The name used to select the adapter in [InferParameters::lora].
    pub name: String,
    /// Scaling to apply to the adapter weights.
    pub scale: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// What a run produces.
pub enum InferMode {
    #[default]
    /// Generate text.
    Generate,
    /// Return the final hidden layer for the input instead of generating.
    LastHiddenLayer,
}
impl From<InferMode> for sys::RKLLMInferMode {
    fn from(mode: InferMode) -> Self {
        match mode {
            InferMode::Generate => sys::RKLLMInferMode_RKLLM_INFER_GENERATE,
            InferMode::LastHiddenLayer => sys::RKLLMInferMode_RKLLM_INFER_GET_LAST_HIDDEN_LAYER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where to store the prompt cache produced by a run.
pub struct PromptCacheParameters {
    /// The file the cache is written to.
    pub path: PathBuf,
    /// Whether the runtime should save the cache at all.
    pub save: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
/// The parameters for a single run. Mirrors `RKLLMInferParam`.
pub struct InferParameters {
    /// What the run produces.
    pub mode: InferMode,
    /// The name of a previously loaded LoRA adapter to apply.
    pub lora: Option<String>,
    /// Prompt cache output for this run.
    pub prompt_cache: Option<PromptCacheParameters>,
}
impl InferParameters {
    pub(crate) fn to_raw(&self) -> Result<RawInferParameters, RkllmError> {
        let lora_name = self.lora.as_deref().map(CString::new).transpose()?;
        let prompt_cache = self
            .prompt_cache
            .as_ref()
            .map(|cache| Ok::<_, RkllmError>((path_to_cstring(&cache.path)?, cache.save)))
            .transpose()?;

        Ok(RawInferParameters {
            mode: self.mode.into(),
            lora: lora_name.map(|name| {
                (
                    sys::RKLLMLoraParam {
                        lora_adapter_name: ptr::null(),
                    },
                    name,
                )
            }),
            prompt_cache: prompt_cache.map(|(path, save)| {
                (
                    sys::RKLLMPromptCacheParam {
                        save_prompt_cache: save.into(),
                        prompt_cache_path: ptr::null(),
                    },
                    path,
                )
            }),
            raw: sys::RKLLMInferParam {
                mode: sys::RKLLMInferMode_RKLLM_INFER_GENERATE,
                lora_params: ptr::null_mut(),
                prompt_cache_params: ptr::null_mut(),
            },
        })
    }
}

/// Owns everything a `RKLLMInferParam` points at.
pub(crate) struct RawInferParameters {
    mode: sys::RKLLMInferMode,
    lora: Option<(sys::RKLLMLoraParam, CString)>,
    prompt_cache: Option<(sys::RKLLMPromptCacheParam, CString)>,
    raw: sys::RKLLMInferParam,
}
impl RawInferParameters {
    /// Wires up the internal pointers. The result is valid until `self` is moved or dropped.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut sys::RKLLMInferParam {
        self.raw.mode = self.mode;
        self.raw.lora_params = match &mut self.lora {
            Some((param, name)) => {
                param.lora_adapter_name = name.as_ptr();
                param as *mut _
            }
            None => ptr::null_mut(),
        };
        self.raw.prompt_cache_params = match &mut self.prompt_cache {
            Some((param, path)) => {
                param.prompt_cache_path = path.as_ptr();
                param as *mut _
            }
            None => ptr::null_mut(),
        };
        &mut self.raw
    }
}
