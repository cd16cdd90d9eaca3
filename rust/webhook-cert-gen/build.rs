//! Records build-time information (git revision, rustc version, build time) for the startup banner.

fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");
}
