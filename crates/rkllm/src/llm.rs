use std::{
    any::Any,
    ffi::{c_void, CString},
    panic::{self, AssertUnwindSafe},
    path::Path,
    ptr::{self, NonNull},
};

use crate::{
    check, path_to_cstring, sys, InferParameters, Input, LoraAdapter, ModelParameters,
    RkllmError, RunEvent,
};

/// Acts as a RAII-guard over a runtime handle, created via `rkllm_init` and
/// dropped via `rkllm_destroy`.
pub struct Llm {
    handle: NonNull<c_void>,
    /// Kept alive for as long as the handle, as the runtime may hold on to it.
    _model_path: CString,
}

// SAFETY: the handle is not tied to the thread that created it. Every call that touches it
// takes `&mut self`, so it is never used from two threads at once.
unsafe impl Send for Llm {}

impl Llm {
    /// Loads the model described by `params`. This blocks until the runtime has finished
    /// loading the model onto the device.
    pub fn load(params: &ModelParameters) -> Result<Self, RkllmError> {
        let model_path = path_to_cstring(&params.model_path)?;

        // SAFETY: plain constructor with no preconditions.
        let mut raw = unsafe { sys::rkllm_createDefaultParam() };
        params.apply(&mut raw, &model_path)?;

        let mut handle: sys::LLMHandle = ptr::null_mut();
        // SAFETY: `raw` and `model_path` outlive the call, and `result_callback` is valid for
        // the lifetime of the program.
        let status = unsafe { sys::rkllm_init(&mut handle, &mut raw, Some(result_callback)) };
        check(status).map_err(|status| RkllmError::Init { status })?;
        let handle = NonNull::new(handle).ok_or(RkllmError::Init { status })?;

        log::debug!("Initialized runtime for {:?}", params.model_path);
        Ok(Self {
            handle,
            _model_path: model_path,
        })
    }

    /// Runs the model on `input`, blocking until the runtime is done.
    ///
    /// `callback` is invoked for every [RunEvent] the runtime reports. If it panics, the
    /// remaining events of the run are discarded and the panic resumes once the runtime
    /// returns.
    pub fn run(
        &mut self,
        input: &Input,
        parameters: &InferParameters,
        mut callback: impl FnMut(RunEvent),
    ) -> Result<(), RkllmError> {
        let mut raw_input = input.to_raw()?;
        let mut raw_parameters = parameters.to_raw()?;
        let mut state = RunState {
            callback: &mut callback,
            panic: None,
        };

        // SAFETY: the raw structs and `state` outlive the call; the runtime only invokes the
        // callback before `rkllm_run` returns.
        let status = unsafe {
            sys::rkllm_run(
                self.handle.as_ptr(),
                raw_input.as_mut_ptr(),
                raw_parameters.as_mut_ptr(),
                &mut state as *mut RunState as *mut c_void,
            )
        };

        if let Some(payload) = state.panic.take() {
            panic::resume_unwind(payload);
        }
        check(status).map_err(|status| RkllmError::Run { status })
    }

    /// Loads a LoRA adapter, which can then be selected by name through [InferParameters::lora].
    pub fn load_lora(&mut self, adapter: &LoraAdapter) -> Result<(), RkllmError> {
        let path = path_to_cstring(&adapter.path)?;
        let name = CString::new(adapter.name.as_str())?;
        let mut raw = sys::RKLLMLoraAdapter {
            lora_adapter_path: path.as_ptr(),
            lora_adapter_name: name.as_ptr(),
            scale: adapter.scale,
        };

        // SAFETY: `raw` and the strings it points to outlive the call.
        let status = unsafe { sys::rkllm_load_lora(self.handle.as_ptr(), &mut raw) };
        check(status).map_err(|status| RkllmError::LoadLora {
            name: adapter.name.clone(),
            status,
        })?;

        log::debug!("Loaded LoRA adapter `{}` from {:?}", adapter.name, adapter.path);
        Ok(())
    }

    /// Loads a prompt cache previously saved through [InferParameters::prompt_cache].
    pub fn load_prompt_cache(&mut self, path: &Path) -> Result<(), RkllmError> {
        let raw_path = path_to_cstring(path)?;
        // SAFETY: `raw_path` outlives the call.
        let status =
            unsafe { sys::rkllm_load_prompt_cache(self.handle.as_ptr(), raw_path.as_ptr()) };
        check(status).map_err(|status| RkllmError::PromptCache {
            path: path.to_path_buf(),
            status,
        })
    }

    /// Releases a prompt cache loaded with [Llm::load_prompt_cache].
    pub fn release_prompt_cache(&mut self) -> Result<(), RkllmError> {
        // SAFETY: the handle is valid until drop.
        let status = unsafe { sys::rkllm_release_prompt_cache(self.handle.as_ptr()) };
        check(status).map_err(|status| RkllmError::ReleasePromptCache { status })
    }
}

impl Drop for Llm {
    fn drop(&mut self) {
        // SAFETY: the handle is not accessible after this drop call.
        let status = unsafe { sys::rkllm_destroy(self.handle.as_ptr()) };
        if let Err(status) = check(status) {
            log::warn!("Failed to destroy runtime handle (status {status})");
        } else {
            log::debug!("Destroyed runtime handle");
        }
    }
}

/// Passed to the runtime as the `userdata` of a run.
pub(crate) struct RunState<'a> {
    pub(crate) callback: &'a mut dyn FnMut(RunEvent),
    pub(crate) panic: Option<Box<dyn Any + Send>>,
}

/// The callback registered with every handle. Forwards to the [RunState] of the current run.
///
/// # Safety
///
/// `userdata` must be null or point to a live [RunState].
pub(crate) unsafe extern "C" fn result_callback(
    result: *mut sys::RKLLMResult,
    userdata: *mut c_void,
    state: sys::LLMCallState,
) {
    let Some(run) = (userdata as *mut RunState).as_mut() else {
        return;
    };
    // Unwinding into C is undefined behaviour, so later events are dropped after a panic.
    if run.panic.is_some() {
        return;
    }

    let forwarded = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(event) = RunEvent::from_raw(result, state) {
            (run.callback)(event);
        }
    }));
    if let Err(payload) = forwarded {
        run.panic = Some(payload);
    }
}
