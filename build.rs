use std::env;

fn main() {
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/membership.proto"], &["proto"])
        .expect("failed to compile proto/membership.proto");

    let version = env::var("AGENT_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));
    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rerun-if-env-changed=AGENT_VERSION");
    println!("cargo:rerun-if-changed=proto/membership.proto");
}
