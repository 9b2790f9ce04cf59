use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADERS: [(&str, &str); 4] = [
    ("fullscreen.vert.glsl", "vertex"),
    ("convert.frag.glsl", "fragment"),
    ("present.vert.glsl", "vertex"),
    ("present.frag.glsl", "fragment"),
];

fn main() {
    let dest = env::var("OUT_DIR").unwrap();

    let shader_dir = Path::new("shaders");
    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).unwrap();

    let glslc = find_glslc();

    if glslc.is_none() {
        println!(
            "cargo:warning=glslc not found, shaders are not compiled. \
             Install the Vulkan SDK or put glslc on PATH to run the demo."
        );
    }

    for (filename, stage) in SHADERS.iter() {
        println!("cargo:rerun-if-changed=shaders/{filename}");

        let spv_path = spirv_dir.join(filename.replace(".glsl", ".spv"));

        let compiled = match &glslc {
            Some(glslc) => compile_shader(glslc, &shader_dir.join(filename), &spv_path, stage),
            None => false,
        };

        // the renderer reports empty modules at pipeline creation
        if !compiled {
            fs::write(&spv_path, b"").unwrap();
        }
    }

    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
}

fn compile_shader(glslc: &Path, src_path: &Path, spv_path: &Path, stage: &str) -> bool {
    let output = Command::new(glslc)
        .arg(format!("-fshader-stage={stage}"))
        .args(["--target-env=vulkan1.2", "-O", "-o"])
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) if result.status.success() => true,
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            println!("cargo:warning=glslc FAILED {}: {stderr}", src_path.display());
            false
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {}: {e}", src_path.display());
            false
        }
    }
}

fn find_glslc() -> Option<PathBuf> {
    let exe = if cfg!(windows) { "glslc.exe" } else { "glslc" };

    if let Ok(path) = env::var("PATH") {
        for dir in env::split_paths(&path) {
            let candidate = dir.join(exe);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    env::var("VULKAN_SDK")
        .ok()
        .map(|sdk| Path::new(&sdk).join("bin").join(exe))
        .filter(|candidate| candidate.is_file())
}
