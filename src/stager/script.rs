//! Generated staging command
//!
//! Detect, compile and release run as one `sh` script inside the build container. The
//! script's exit status tells the stager which phase failed.

use crate::config::StagerConfig;
use std::fmt::Write;

/// No buildpack's detect step succeeded
pub const EXIT_NOT_DETECTED: i64 = 222;
/// The selected buildpack's compile step failed
pub const EXIT_COMPILE_FAILED: i64 = 223;
/// The selected buildpack's release step failed
pub const EXIT_RELEASE_FAILED: i64 = 224;

/// Written by release into the output directory
pub const RELEASE_FILE: &str = "release.yml";
/// Holds the identifier of the buildpack that staged the app
pub const BUILDPACK_FILE: &str = "buildpack";

/// Directory name a buildpack is installed under
pub fn buildpack_key(id: &str) -> String {
    format!("{:x}", md5::compute(id.as_bytes()))
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Renders the script for `buildpacks`, which must be non-empty.
pub fn staging_script(buildpacks: &[String], config: &StagerConfig) -> String {
    let build = quote(&config.build_dir);
    let cache = quote(&config.cache_dir);
    let output = quote(&config.output_dir);
    let dir = |id: &str| quote(&format!("{}/{}", config.buildpacks_dir, buildpack_key(id)));

    let mut script = String::new();
    let _ = writeln!(script, "mkdir -p {} {} || exit 1", output, cache);

    match buildpacks {
        [only] => {
            let _ = writeln!(script, "buildpack={}", dir(only));
            let _ = writeln!(script, "buildpack_id={}", quote(only));
        }
        _ => {
            script.push_str("buildpack=''\n");
            for id in buildpacks {
                let _ = writeln!(
                    script,
                    "if [ -z \"$buildpack\" ] && {dir}/bin/detect {build}; then buildpack={dir}; buildpack_id={id}; fi",
                    dir = dir(id),
                    build = build,
                    id = quote(id),
                );
            }
            let _ = writeln!(script, "[ -n \"$buildpack\" ] || exit {}", EXIT_NOT_DETECTED);
        }
    }

    let _ = writeln!(
        script,
        "\"$buildpack/bin/compile\" {} {} || exit {}",
        build, cache, EXIT_COMPILE_FAILED
    );
    let _ = writeln!(
        script,
        "\"$buildpack/bin/release\" {} > {}/{} || exit {}",
        build, output, RELEASE_FILE, EXIT_RELEASE_FAILED
    );
    let _ = writeln!(
        script,
        "printf '%s' \"$buildpack_id\" > {}/{}",
        output, BUILDPACK_FILE
    );
    script
}

/// Container command running `script`
pub fn command(script: String) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}
