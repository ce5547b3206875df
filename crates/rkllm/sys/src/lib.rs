//! Raw bindings to `rkllm.h`, the C interface of the rkllm runtime (`librkllmrt`).
//!
//! These mirror the 1.1.x ABI of the header. Use the `rkllm` crate for a safe interface.
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]

use std::os::raw::{c_char, c_int, c_void};

pub type LLMHandle = *mut c_void;

pub type LLMCallState = c_int;
pub const LLMCallState_RKLLM_RUN_NORMAL: LLMCallState = 0;
pub const LLMCallState_RKLLM_RUN_WAITING: LLMCallState = 1;
pub const LLMCallState_RKLLM_RUN_FINISH: LLMCallState = 2;
pub const LLMCallState_RKLLM_RUN_ERROR: LLMCallState = 3;
pub const LLMCallState_RKLLM_RUN_GET_LAST_HIDDEN_LAYER: LLMCallState = 4;

pub type RKLLMInputType = c_int;
pub const RKLLMInputType_RKLLM_INPUT_PROMPT: RKLLMInputType = 0;
pub const RKLLMInputType_RKLLM_INPUT_TOKEN: RKLLMInputType = 1;
pub const RKLLMInputType_RKLLM_INPUT_EMBED: RKLLMInputType = 2;
pub const RKLLMInputType_RKLLM_INPUT_MULTIMODAL: RKLLMInputType = 3;

pub type RKLLMInferMode = c_int;
pub const RKLLMInferMode_RKLLM_INFER_GENERATE: RKLLMInferMode = 0;
pub const RKLLMInferMode_RKLLM_INFER_GET_LAST_HIDDEN_LAYER: RKLLMInferMode = 1;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMExtendParam {
    pub base_domain_id: i32,
    pub reserved: [u8; 112usize],
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMParam {
    pub model_path: *const c_char,
    pub max_context_len: i32,
    pub max_new_tokens: i32,
    pub top_k: i32,
    pub top_p: f32,
    pub temperature: f32,
    pub repeat_penalty: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub mirostat: i32,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    pub skip_special_token: bool,
    pub is_async: bool,
    pub img_start: *const c_char,
    pub img_end: *const c_char,
    pub img_content: *const c_char,
    pub extend_param: RKLLMExtendParam,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMLoraAdapter {
    pub lora_adapter_path: *const c_char,
    pub lora_adapter_name: *const c_char,
    pub scale: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMEmbedInput {
    pub embed: *mut f32,
    pub n_tokens: usize,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMTokenInput {
    pub input_ids: *mut i32,
    pub n_tokens: usize,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMMultiModelInput {
    pub prompt: *mut c_char,
    pub image_embed: *mut f32,
    pub n_image_tokens: usize,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union RKLLMInput__bindgen_ty_1 {
    pub prompt_input: *const c_char,
    pub embed_input: RKLLMEmbedInput,
    pub token_input: RKLLMTokenInput,
    pub multimodal_input: RKLLMMultiModelInput,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct RKLLMInput {
    pub input_type: RKLLMInputType,
    pub __bindgen_anon_1: RKLLMInput__bindgen_ty_1,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMLoraParam {
    pub lora_adapter_name: *const c_char,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMPromptCacheParam {
    pub save_prompt_cache: c_int,
    pub prompt_cache_path: *const c_char,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMInferParam {
    pub mode: RKLLMInferMode,
    pub lora_params: *mut RKLLMLoraParam,
    pub prompt_cache_params: *mut RKLLMPromptCacheParam,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMResultLastHiddenLayer {
    pub hidden_states: *const f32,
    pub embd_size: c_int,
    pub num_tokens: c_int,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RKLLMResult {
    pub text: *const c_char,
    pub token_id: i32,
    pub last_hidden_layer: RKLLMResultLastHiddenLayer,
}

pub type LLMResultCallback = Option<
    unsafe extern "C" fn(result: *mut RKLLMResult, userdata: *mut c_void, state: LLMCallState),
>;

extern "C" {
    pub fn rkllm_createDefaultParam() -> RKLLMParam;

    pub fn rkllm_init(
        handle: *mut LLMHandle,
        param: *mut RKLLMParam,
        callback: LLMResultCallback,
    ) -> c_int;

    pub fn rkllm_load_lora(handle: LLMHandle, lora_adapter: *mut RKLLMLoraAdapter) -> c_int;

    pub fn rkllm_load_prompt_cache(handle: LLMHandle, prompt_cache_path: *const c_char) -> c_int;

    pub fn rkllm_release_prompt_cache(handle: LLMHandle) -> c_int;

    pub fn rkllm_destroy(handle: LLMHandle) -> c_int;

    pub fn rkllm_run(
        handle: LLMHandle,
        rkllm_input: *mut RKLLMInput,
        rkllm_infer_params: *mut RKLLMInferParam,
        userdata: *mut c_void,
    ) -> c_int;

    pub fn rkllm_run_async(
        handle: LLMHandle,
        rkllm_input: *mut RKLLMInput,
        rkllm_infer_params: *mut RKLLMInferParam,
        userdata: *mut c_void,
    ) -> c_int;

    pub fn rkllm_abort(handle: LLMHandle) -> c_int;

    pub fn rkllm_is_running(handle: LLMHandle) -> c_int;
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn bindgen_test_layout_RKLLMExtendParam() {
        assert_eq!(size_of::<RKLLMExtendParam>(), 116usize);
        assert_eq!(align_of::<RKLLMExtendParam>(), 4usize);
    }

    #[test]
    fn bindgen_test_layout_RKLLMResult() {
        assert_eq!(size_of::<RKLLMResultLastHiddenLayer>(), 16usize);
        assert_eq!(size_of::<RKLLMResult>(), 32usize);
        assert_eq!(align_of::<RKLLMResult>(), 8usize);
    }

    #[test]
    fn bindgen_test_layout_RKLLMInput() {
        // The largest union member is the multimodal input: two pointers and a size.
        assert_eq!(size_of::<RKLLMInput__bindgen_ty_1>(), 24usize);
        assert_eq!(size_of::<RKLLMInput>(), 32usize);
    }

    #[test]
    fn bindgen_test_layout_RKLLMInferParam() {
        assert_eq!(size_of::<RKLLMInferParam>(), 24usize);
        assert_eq!(size_of::<RKLLMLoraAdapter>(), 24usize);
        assert_eq!(size_of::<RKLLMPromptCacheParam>(), 16usize);
    }
}
