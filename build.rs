//! Build script for iptacl
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! and links libip4tc when the `libiptc` feature is enabled.

fn main() {
    // Re-run build if the library search path changes
    println!("cargo:rerun-if-env-changed=IPTACL_LIBIPTC_DIR");

    if std::env::var_os("CARGO_FEATURE_LIBIPTC").is_some()
        && let Ok(dir) = std::env::var("IPTACL_LIBIPTC_DIR")
    {
        println!("cargo:rustc-link-search=native={dir}");
    }

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
