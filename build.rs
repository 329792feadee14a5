fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc binary so no system installation is required.
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);

    println!("cargo:rerun-if-changed=proto/landing.proto");
    tonic_build::configure()
        // relay-cli prints responses as JSON.
        .type_attribute(".org.feuyeux.grpc", "#[derive(serde::Serialize)]")
        .compile_protos(&["proto/landing.proto"], &["proto/"])?;
    Ok(())
}
