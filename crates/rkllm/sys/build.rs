use std::env;
use std::path::{Path, PathBuf};

// The runtime ships as a prebuilt shared library, so there is nothing to compile here.
// We only need to tell the linker where `librkllmrt.so` lives. Set `RKLLM_LIB_DIR` if it
// is not installed in one of the usual system locations.
const LIBRARY_NAME: &str = "rkllmrt";
const DEFAULT_SEARCH_DIRS: &[&str] = &["/usr/lib", "/usr/local/lib", "/usr/lib/aarch64-linux-gnu"];

fn main() {
    println!("cargo:rerun-if-env-changed=RKLLM_LIB_DIR");
    println!("cargo:rerun-if-changed=build.rs");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();
    if target_os != "linux" && target_os != "android" {
        println!("cargo:warning=the rkllm runtime is only distributed for Linux and Android targets");
    }

    match find_library() {
        Some(dir) => {
            println!("cargo:rustc-link-search=native={}", dir.display());
            println!("cargo:rustc-link-lib=dylib={LIBRARY_NAME}");
            // Exposed to dependents as DEP_RKLLMRT_LIB_DIR.
            println!("cargo:lib_dir={}", dir.display());
        }
        None => {
            // Not fatal: crates that never call into the runtime (e.g. unit tests of the
            // parameter and event plumbing) still link without it.
            println!(
                "cargo:warning=lib{LIBRARY_NAME}.so was not found; set RKLLM_LIB_DIR to link against the runtime"
            );
        }
    }
}

fn find_library() -> Option<PathBuf> {
    let file_name = format!("lib{LIBRARY_NAME}.so");

    if let Some(dir) = env::var_os("RKLLM_LIB_DIR").map(PathBuf::from) {
        if dir.join(&file_name).exists() {
            return Some(dir);
        }
        println!(
            "cargo:warning=RKLLM_LIB_DIR is set to {}, but it does not contain {file_name}",
            dir.display()
        );
    }

    DEFAULT_SEARCH_DIRS
        .iter()
        .map(Path::new)
        .find(|dir| dir.join(&file_name).exists())
        .map(Path::to_path_buf)
}
