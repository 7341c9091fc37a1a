fn main() {
    // option_env!() values are cached by cargo unless declared here.
    println!("cargo:rerun-if-env-changed=OFFLINE_SYNC_DEFAULT_API_URL");
    println!("cargo:rerun-if-env-changed=OFFLINE_SYNC_DEFAULT_PROBE_URL");
}
