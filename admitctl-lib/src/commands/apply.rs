use super::Host;
use super::common::{ColorMode, LogLevel, init_logging};
use super::config::Config;
use super::summary::{write_details, write_summary};
use crate::Result;
use crate::context::RequestInfo;
use crate::engine::{EngineResponse, RuleStatus};
use crate::policy::{PolicySet, load_resources};
use crate::processor::{Collaborators, EvaluationRequest, MutateLog, PolicyProcessor, ResultCounts, YamlOutput};
use crate::resource::Resource;
use crate::variables::{Values, Variables};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ohno::{IntoAppError, app_err, bail};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;

const LOG_TARGET: &str = "     apply";

#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Policy files, or directories of `.yaml`/`.yml` policy files
    #[arg(value_name = "POLICY", required = true)]
    pub policies: Vec<Utf8PathBuf>,

    /// Resource files to evaluate; each may hold several YAML documents
    #[arg(long = "resource", short = 'r', value_name = "PATH")]
    pub resources: Vec<Utf8PathBuf>,

    /// A JSON payload evaluated by JSON-mode CEL policies
    #[arg(long, value_name = "PATH")]
    pub json: Option<Utf8PathBuf>,

    /// Values file with global, per-policy and per-resource variables
    #[arg(long, short = 'f', value_name = "PATH", help_heading = "Variables")]
    pub values_file: Option<Utf8PathBuf>,

    /// Variables as `key=value` pairs, comma-separated or repeated
    #[arg(long, short = 's', value_name = "KEY=VALUE", help_heading = "Variables")]
    pub set: Vec<String>,

    /// Request information: roles, cluster roles and user info
    #[arg(long, short = 'u', value_name = "PATH", help_heading = "Variables")]
    pub userinfo: Option<Utf8PathBuf>,

    /// Context document describing cluster state for CEL policies
    #[arg(long, value_name = "PATH", help_heading = "Variables")]
    pub context: Option<Utf8PathBuf>,

    /// Resource copied by a generate rule's clone, as `RULE=PATH`
    #[arg(long = "clone-source", value_name = "RULE=PATH", help_heading = "Variables")]
    pub clone_sources: Vec<String>,

    /// Write mutated and generated resources to this file or directory
    #[arg(long, short = 'o', value_name = "PATH", help_heading = "Report Output")]
    pub mutate_log: Option<Utf8PathBuf>,

    /// Report failures of `Audit` policies as warnings
    #[arg(long, help_heading = "Report Output")]
    pub audit_warn: bool,

    /// List every rule outcome and the counts of each phase
    #[arg(long, help_heading = "Report Output")]
    pub detailed: bool,

    /// Exit with status code 1 if any rule failed
    #[arg(long)]
    pub error_on_fail: bool,

    /// Path to configuration file (default is `admitctl.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,
}

pub fn apply_policies<H: Host>(host: &mut H, args: &ApplyArgs) -> Result<()> {
    init_logging(args.log_level);

    let config = Config::load(Utf8Path::new("."), args.config.as_ref())?;
    let audit_warn = args.audit_warn || config.audit_warn;
    let detailed = args.detailed || config.detailed_results;

    let policies = PolicySet::load_files(&args.policies)?;
    if policies.is_empty() {
        bail!("no policies found in {}", join_paths(&args.policies));
    }

    let resources = load_resource_files(&args.resources)?;
    let json_payload = args.json.as_deref().map(load_json_payload).transpose()?;
    if resources.is_empty() && json_payload.is_none() {
        bail!("no resources to evaluate, pass --resource or --json");
    }

    let values = args.values_file.as_deref().map(Values::load).transpose()?;
    let variables = Variables::new(values, Variables::parse_set(&args.set)?);
    let request_info = args.userinfo.as_deref().map(RequestInfo::load).transpose()?;
    let clone_sources = load_clone_sources(&args.clone_sources)?;
    let mutate_log = args
        .mutate_log
        .as_ref()
        .or(config.mutate_log_path.as_ref())
        .map(|path| MutateLog::prepare(path))
        .transpose()?;

    let template = EvaluationRequest {
        request_info,
        namespace_labels: variables.namespace_labels(),
        subresources: variables.subresources().to_vec(),
        variables: Some(Arc::new(variables)),
        clone_sources,
        context_path: args.context.clone().or_else(|| config.context_path.clone()),
        audit_warn,
        ..EvaluationRequest::default()
    }
    .with_policies(&policies);

    let rule_count = policies.policies.iter().map(|policy| policy.rules().len()).sum::<usize>()
        + policies.admission_policies.len()
        + policies.cel_policies.len();
    let input_count = resources.len() + usize::from(json_payload.is_some());
    let _ = writeln!(host.output(), "Applying {rule_count} policy rule(s) to {input_count} resource(s)...");

    let mut inputs: Vec<(Option<Resource>, Option<Resource>)> = resources.into_iter().map(|resource| (Some(resource), None)).collect();
    if let Some(payload) = json_payload {
        inputs.push((None, Some(payload)));
    }

    let collaborators = Collaborators::builtin()?;
    let mut counts = ResultCounts::new();
    let mut responses: Vec<EngineResponse> = Vec::new();
    for (resource, json_payload) in inputs {
        let request = EvaluationRequest {
            resource,
            json_payload,
            ..template.clone()
        };

        let mut sink = YamlOutput::new(Vec::new());
        if let Some(log) = &mutate_log {
            sink = sink.with_mutate_log(log.clone());
        }

        let mut processor = PolicyProcessor::new(request, collaborators.clone());
        let result = processor.apply_policies_on_resource(&mut sink);
        let _ = host.output().write_all(&sink.into_inner());
        responses.extend(result?);
        counts.merge(processor.counts());
    }

    let use_colors = args.color.use_colors();
    let mut report = String::new();
    if detailed {
        write_details(&mut report, &responses, use_colors)?;
    }
    write_summary(&mut report, &counts, detailed, use_colors)?;
    let _ = write!(host.output(), "{report}");

    let failures = counts.status(RuleStatus::Fail);
    log::info!(target: LOG_TARGET, "Evaluated {} response(s), {failures} failure(s)", responses.len());
    if args.error_on_fail && failures > 0 {
        let _ = writeln!(host.error(), "❌ {failures} rule(s) failed");
        host.exit(1);
        return Err(ohno::AppError::new("one or more policy rules failed"));
    }

    Ok(())
}

fn join_paths(paths: &[Utf8PathBuf]) -> String {
    paths.iter().map(|path| path.as_str()).collect::<Vec<_>>().join(", ")
}

fn load_resource_files(paths: &[Utf8PathBuf]) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for path in paths {
        let text = fs::read_to_string(path).into_app_err_with(|| format!("reading resource file '{path}'"))?;
        let loaded = load_resources(&text).map_err(|e| app_err!("loading resources from '{path}': {e}"))?;
        log::debug!(target: LOG_TARGET, "Loaded {} resource(s) from '{path}'", loaded.len());
        resources.extend(loaded);
    }
    Ok(resources)
}

fn load_json_payload(path: &Utf8Path) -> Result<Resource> {
    let bytes = fs::read(path).into_app_err_with(|| format!("reading JSON payload '{path}'"))?;
    Resource::from_json(&bytes).map_err(|e| app_err!("parsing JSON payload '{path}': {e}"))
}

/// Parse `RULE=PATH` pairs, keeping the first document of each file
fn load_clone_sources(pairs: &[String]) -> Result<BTreeMap<String, Resource>> {
    let mut sources = BTreeMap::new();
    for pair in pairs {
        let Some((rule, path)) = pair.split_once('=') else {
            bail!("invalid clone source '{pair}', expected RULE=PATH");
        };
        let (rule, path) = (rule.trim(), Utf8Path::new(path.trim()));
        if rule.is_empty() {
            bail!("invalid clone source '{pair}', the rule name is empty");
        }

        let Some(resource) = load_resource_files(&[path.to_path_buf()])?.into_iter().next() else {
            bail!("clone source '{path}' for rule '{rule}' holds no resource");
        };
        let _ = sources.insert(rule.to_string(), resource);
    }
    Ok(sources)
}
