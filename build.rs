fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only rerun if proto files change
    println!("cargo:rerun-if-changed=proto/etcd/kv.proto");
    println!("cargo:rerun-if-changed=proto/etcd/rpc.proto");

    // Fall back to a vendored protoc when none is configured in the environment.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/etcd/kv.proto", "proto/etcd/rpc.proto"], &["proto"])?;
    Ok(())
}
