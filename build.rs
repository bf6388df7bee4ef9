const IDENTITY_PROTO: &str = "proto/idresolve.proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={IDENTITY_PROTO}");

    // The IdentityService stubs are only compiled into `transport-grpc` builds.
    if std::env::var_os("CARGO_FEATURE_TRANSPORT_GRPC").is_none() {
        return Ok(());
    }

    let protoc = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| format!("vendored protoc unavailable: {e}"))?;
    std::env::set_var("PROTOC", protoc);

    // The crate only serves Identify; callers bring their own client.
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&[IDENTITY_PROTO], &["proto"])?;
    Ok(())
}
