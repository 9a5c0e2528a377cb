// build.rs
// Compiles the sandbox's GLSL shaders to SPIR-V with glslc

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGE_EXTENSIONS: &[&str] = &["vert", "frag", "comp", "geom", "tesc", "tese"];

/// `terrain.vert` compiles to `terrain_vert.spv`
fn output_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let extension = path.extension()?.to_str()?;
    STAGE_EXTENSIONS
        .contains(&extension)
        .then(|| format!("{stem}_{extension}.spv"))
}

fn is_stale(source: &Path, output: &Path) -> bool {
    match (
        std::fs::metadata(source).and_then(|m| m.modified()),
        std::fs::metadata(output).and_then(|m| m.modified()),
    ) {
        (Ok(source_time), Ok(output_time)) => source_time > output_time,
        _ => true,
    }
}

fn compile_shaders(shader_dir: &Path, include_dir: &Path, target_dir: &Path, glslc: &str, compiled: &mut u32) {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {shader_dir:?}");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            compile_shaders(&path, include_dir, target_dir, glslc, compiled);
            continue;
        }
        // Include files (.glsl) are not standalone shaders
        let Some(name) = output_name(&path) else {
            continue;
        };
        let output = target_dir.join(name);
        if !is_stale(&path, &output) {
            continue;
        }

        let status = Command::new(glslc)
            .arg("-I")
            .arg(include_dir)
            .arg(&path)
            .arg("-o")
            .arg(&output)
            .status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {path:?} -> {output:?}");
                *compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {path:?} with exit code {}", s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {path:?}: {e}"),
        }
    }
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        println!("cargo:warning=VULKAN_SDK not set, shader compilation skipped");
        return;
    };
    let glslc = if cfg!(target_os = "windows") {
        format!("{vulkan_sdk}\\Bin\\glslc.exe")
    } else {
        format!("{vulkan_sdk}/bin/glslc")
    };
    if !Path::new(&glslc).exists() {
        panic!("Shader compiler not found at {glslc}");
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let shader_dir = manifest_dir.join("resources/shaders");
    // Shared with render_core's default shader directory when run from the workspace root
    let target_dir = manifest_dir.join("../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=Failed to create {target_dir:?}: {e}");
        return;
    }

    let mut compiled = 0;
    compile_shaders(&shader_dir, &shader_dir, &target_dir, &glslc, &mut compiled);
    eprintln!("info: Compiled {compiled} shader(s)");
}
