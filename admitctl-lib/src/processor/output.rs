use crate::Result;
use crate::engine::{EngineResponse, OutputSink};
use crate::resource::Resource;
use camino::{Utf8Path, Utf8PathBuf};
use core::fmt::Debug;
use ohno::IntoAppError;
use std::fs::{self, OpenOptions};
use std::io::Write;

/// Where mutated and generated resources are logged instead of the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutateLog {
    path: Utf8PathBuf,
    is_dir: bool,
}

impl MutateLog {
    /// Prepare a log location
    ///
    /// A path without an extension is a directory receiving one file per
    /// resource and is created when missing. Otherwise every resource is
    /// appended to the file, whose parent directories are created.
    pub fn prepare(path: &Utf8Path) -> Result<Self> {
        let is_dir = path.extension().is_none();
        let dir = if is_dir { Some(path) } else { path.parent() };
        if let Some(dir) = dir.filter(|dir| !dir.as_str().is_empty()) {
            fs::create_dir_all(dir).into_app_err_with(|| format!("creating mutate log directory '{dir}'"))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            is_dir,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn file_for(&self, resource: &Resource, response: &EngineResponse, is_generate: bool) -> Utf8PathBuf {
        if !self.is_dir {
            return self.path.clone();
        }
        if is_generate {
            self.path.join(format!("{}-generated.yaml", response.policy_name()))
        } else {
            self.path.join(format!("{}-mutated.yaml", resource.name()))
        }
    }
}

/// An [`OutputSink`] writing resources as YAML documents
///
/// Without a [`MutateLog`] each resource is written to the writer under a
/// `policy <name> applied to <path>:` header. With one, resources are appended
/// to the log instead. Notes always go to the writer.
#[derive(Debug)]
pub struct YamlOutput<W> {
    writer: W,
    mutate_log: Option<MutateLog>,
}

impl<W: Write + Debug + Send + Sync> YamlOutput<W> {
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer, mutate_log: None }
    }

    #[must_use]
    pub fn with_mutate_log(mut self, mutate_log: MutateLog) -> Self {
        self.mutate_log = Some(mutate_log);
        self
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Debug + Send + Sync> OutputSink for YamlOutput<W> {
    fn emit(&mut self, resource: &Resource, response: &EngineResponse, resource_path: &str, is_generate: bool) -> Result<()> {
        let document = to_yaml(resource)?;
        let targets = response
            .rules()
            .iter()
            .filter_map(|rule| rule.patched_target())
            .map(to_yaml)
            .collect::<Result<Vec<_>>>()?;

        let Some(log) = &self.mutate_log else {
            let text = format!("{document}\n---");
            if text.trim().is_empty() {
                return Ok(());
            }
            write!(self.writer, "\npolicy {} applied to {resource_path}:", response.policy_name())?;
            writeln!(self.writer, "\n{text}")?;
            if !targets.is_empty() {
                writeln!(self.writer, "patched targets: ")?;
                for target in &targets {
                    writeln!(self.writer, "\n{target}\n---\n")?;
                }
            }
            return Ok(());
        };

        let file = log.file_for(resource, response, is_generate);
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
            .into_app_err_with(|| format!("opening mutate log '{file}'"))?;
        writeln!(out, "{document}\n---\n").into_app_err_with(|| format!("writing to mutate log '{file}'"))?;
        for target in &targets {
            writeln!(out, "{target}\n---\n").into_app_err_with(|| format!("writing to mutate log '{file}'"))?;
        }
        Ok(())
    }

    fn note(&mut self, message: &str) -> Result<()> {
        write!(self.writer, "{message}")?;
        Ok(())
    }
}

fn to_yaml(resource: &Resource) -> Result<String> {
    serde_yaml::to_string(resource).into_app_err("failed to marshal resource to YAML")
}
