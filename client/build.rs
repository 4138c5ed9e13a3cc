use std::{env, fs, path::Path};

// stamp `<package version>-<profile>` into the binary, e.g. `0.3.0-release`
fn main() {
    let version = env::var("CARGO_PKG_VERSION").expect("CARGO_PKG_VERSION not set by cargo");
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set by cargo");
    let target = Path::new(&out_dir).join("version.rs");
    fs::write(&target, format!("pub const VERSION: &str = \"{version}-{profile}\";\n"))
        .expect("fail to write version.rs");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PROFILE");
}
