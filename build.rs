use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Only the demo firmware needs a linker script and the kernel library
    if env::var_os("CARGO_FEATURE_DEMO").is_none() {
        return;
    }

    // Copy memory.x into OUT_DIR so the linker can find it
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::copy("memory.x", out_dir.join("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");

    // FreeRTOS kernel + taskkit shim, prebuilt by the firmware's C toolchain
    println!("cargo:rerun-if-env-changed=FREERTOS_LIB_DIR");
    if let Some(dir) = env::var_os("FREERTOS_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", PathBuf::from(dir).display());
        println!("cargo:rustc-link-lib=static=freertos");
    }
}
