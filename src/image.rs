//! Image generation relay.
//!
//! Generation runs in an external subprocess (typically a Python script
//! driving a local diffusion backend). The relay passes the prompt and LoRA
//! parameters on the command line and reads the generated file paths back
//! from stdout, one per line.

use crate::config::ImageConfig;
use crate::error::{Error, Result};
use crate::presets::LoraParams;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Cap on stderr included in an error, to keep log lines bounded.
const STDERR_LIMIT: usize = 500;

pub struct ImageGenerator {
    config: ImageConfig,
}

impl ImageGenerator {
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }

    /// Run one generation. Returns the paths of the generated files.
    ///
    /// A nonzero exit maps to `Error::ImageGen` carrying a truncated stderr
    /// diagnostic; an empty stdout on success is also an error since there is
    /// nothing to deliver.
    pub async fn generate(&self, prompt: &str, params: &LoraParams) -> Result<Vec<PathBuf>> {
        tracing::info!(
            script = %self.config.script,
            lora1 = %params.lora1_name,
            "Starting image generation"
        );

        let output = Command::new(&self.config.program)
            .arg(&self.config.script)
            .arg("--prompt")
            .arg(prompt)
            .arg("--api_file")
            .arg(&self.config.api_file)
            .arg("--lora1_name")
            .arg(&params.lora1_name)
            .arg("--lora1_strength")
            .arg(params.lora1_strength.to_string())
            .arg("--lora2_name")
            .arg(&params.lora2_name)
            .arg("--lora2_strength")
            .arg(params.lora2_strength.to_string())
            .output()
            .await
            .map_err(|e| {
                Error::ImageGen(format!(
                    "failed to launch {} {}: {e}",
                    self.config.program, self.config.script
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let truncated: String = stderr.chars().take(STDERR_LIMIT).collect();
            return Err(Error::ImageGen(format!(
                "generation exited with {}: {truncated}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let paths: Vec<PathBuf> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();

        if paths.is_empty() {
            return Err(Error::ImageGen(
                "generation succeeded but produced no output paths".into(),
            ));
        }

        tracing::info!(count = paths.len(), "Image generation finished");
        Ok(paths)
    }
}

/// Recreate the storage directory whenever it disappears. Generation scripts
/// write into it blindly; an external cleanup deleting the directory must not
/// start failing every generation.
pub async fn keep_storage_dir(dir: PathBuf) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if !dir.exists() {
            match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => tracing::info!(dir = %dir.display(), "Recreated image storage directory"),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to recreate storage directory")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn generator_for_script(dir: &TempDir, body: &str) -> ImageGenerator {
        let script = dir.path().join("gen.sh");
        std::fs::write(&script, body).unwrap();
        let config = ImageConfig {
            enabled: true,
            program: "sh".into(),
            script: script.to_string_lossy().into_owned(),
            api_file: dir.path().join("workflow.json"),
            storage_dir: dir.path().join("images"),
        };
        ImageGenerator::new(config)
    }

    #[tokio::test]
    async fn successful_run_returns_stdout_paths() {
        let dir = TempDir::new().unwrap();
        let gen = generator_for_script(&dir, "printf '/tmp/a.png\\n/tmp/b.png\\n'\n");
        let paths = gen.generate("a forest", &LoraParams::default()).await.unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("/tmp/a.png"), PathBuf::from("/tmp/b.png")]
        );
    }

    #[tokio::test]
    async fn blank_stdout_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let gen = generator_for_script(&dir, "printf '\\n/tmp/only.png\\n\\n'\n");
        let paths = gen.generate("x", &LoraParams::default()).await.unwrap();
        assert_eq!(paths, vec![PathBuf::from("/tmp/only.png")]);
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let dir = TempDir::new().unwrap();
        let gen = generator_for_script(&dir, "echo 'model file missing' >&2; exit 3\n");
        let err = gen.generate("x", &LoraParams::default()).await.unwrap_err();
        match err {
            Error::ImageGen(msg) => assert!(msg.contains("model file missing"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn long_stderr_is_truncated() {
        let dir = TempDir::new().unwrap();
        let gen = generator_for_script(
            &dir,
            "head -c 2000 /dev/zero | tr '\\0' 'e' >&2; exit 1\n",
        );
        let err = gen.generate("x", &LoraParams::default()).await.unwrap_err();
        match err {
            Error::ImageGen(msg) => assert!(msg.len() < 700, "stderr not truncated: {}", msg.len()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_stdout_on_success_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gen = generator_for_script(&dir, "exit 0\n");
        assert!(matches!(
            gen.generate("x", &LoraParams::default()).await,
            Err(Error::ImageGen(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let config = ImageConfig {
            enabled: true,
            program: "/nonexistent/interpreter".into(),
            script: "gen.py".into(),
            api_file: PathBuf::from("workflow.json"),
            storage_dir: PathBuf::from("images"),
        };
        let gen = ImageGenerator::new(config);
        assert!(matches!(
            gen.generate("x", &LoraParams::default()).await,
            Err(Error::ImageGen(_))
        ));
    }

    #[tokio::test]
    async fn lora_params_are_passed_on_the_command_line() {
        let dir = TempDir::new().unwrap();
        // Echo the arguments back as the "generated path" so we can inspect them
        let gen = generator_for_script(&dir, "echo \"$@\"\n");
        let params = LoraParams {
            lora1_name: "forest.safetensors".into(),
            lora1_strength: 0.9,
            lora2_name: "mist.safetensors".into(),
            lora2_strength: 0.4,
        };
        let paths = gen.generate("tall trees", &params).await.unwrap();
        let line = paths[0].to_string_lossy().into_owned();
        assert!(line.contains("--prompt tall trees"));
        assert!(line.contains("--lora1_name forest.safetensors"));
        assert!(line.contains("--lora1_strength 0.9"));
        assert!(line.contains("--lora2_strength 0.4"));
    }
}
