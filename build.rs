//! Build script for nlfw
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `nlfw --version`.

fn main() {
    // Packagers may pin the default netlink family at build time
    println!("cargo:rerun-if-env-changed=NLFW_DEFAULT_FAMILY");

    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
