use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command as TokioCommand;

use crate::config::SeparationConfig;
use crate::job::{SeparationModel, StemMode};

/// Fully resolved invocation of the external separation tool.
#[derive(Debug, Clone)]
pub struct SeparationCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

impl SeparationCommand {
    /// `<program> <program_args..> --out <out_dir> --name <model> [--two-stems vocals] <input>`
    pub fn build(
        settings: &SeparationConfig,
        model: SeparationModel,
        stem_mode: StemMode,
        input: &Path,
        out_dir: &Path,
    ) -> Self {
        let mut args: Vec<OsString> = settings.program_args.iter().map(OsString::from).collect();
        args.push("--out".into());
        args.push(out_dir.as_os_str().to_owned());
        args.push("--name".into());
        args.push(model.as_str().into());
        if let Some(stem) = stem_mode.two_stems() {
            args.push("--two-stems".into());
            args.push(stem.as_str().into());
        }
        args.push(input.as_os_str().to_owned());

        let mut env: Vec<(String, String)> = settings
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        Self {
            program: settings.program.clone(),
            args,
            env,
        }
    }

    /// Process with piped output, null stdin, killed when the handle drops.
    pub fn to_tokio(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}
