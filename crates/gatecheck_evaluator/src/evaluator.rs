// SPDX-License-Identifier: Apache-2.0

//! The evaluation coordinator.
//!
//! A run is single-threaded and ordered: inputs are produced per kind,
//! enabled policies are selected once, and every `(input, policy)` pair is
//! dispatched through target-type and target-module matching before the
//! engine is invoked. Results accumulate in `(input_kind, input_index,
//! policy_index)` order.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use gatecheck_common::Logger;
use gatecheck_compiler::install::{Source, SourceKind};
use gatecheck_engine::meta::PolicyMetadata;
use gatecheck_engine::OpaEngine;

use crate::config::{list_enabled_policies, match_str_expression, Config, PolicyPattern};
use crate::input::{
    inputs_from_event, inputs_from_rest, inputs_from_scan_result, inputs_from_task_result,
    load_galaxy_data, process_inputs_with_external_data, ApiRequest, Event, PolicyInput,
    PolicyInputSet, RuntimeData, ScanResult, Variables, INPUT_TYPE_TASK, INPUT_TYPE_TASK_RESULT,
};
use crate::jobdata::prepare_project_dir_from_jobdata;
use crate::lines::{find_play_block, find_task_block, CodeBlock};
use crate::result::EvaluationResult;
use crate::Error;

/// The default file name of the external scanner's output inside a project.
pub const DEFAULT_SCAN_RESULT_FILE: &str = "scan_result.json";

/// The kind of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalType {
    /// Evaluate a scanned project directory.
    Project,
    /// Evaluate a runner jobdata stream.
    Jobdata,
    /// Evaluate a single task result.
    TaskResult,
    /// Evaluate a runtime event.
    Event,
    /// Evaluate a REST request.
    Rest,
}

impl EvalType {
    /// Parses an evaluation type name.
    pub fn parse(name: &str) -> Result<EvalType, Error> {
        match name {
            "project" => Ok(EvalType::Project),
            "jobdata" => Ok(EvalType::Jobdata),
            "task_result" => Ok(EvalType::TaskResult),
            "event" => Ok(EvalType::Event),
            "rest" => Ok(EvalType::Rest),
            other => Err(Error::EvalError {
                error: format!("eval type `{other}` is not supported"),
            }),
        }
    }
}

/// What to evaluate in one run.
#[derive(Debug, Clone, Default)]
pub struct EvalRequest {
    /// The project directory (`project` runs; also the display base).
    pub project_dir: Option<PathBuf>,
    /// Explicit scan-result path; defaults to `scan_result.json` inside the
    /// project directory.
    pub scan_result_path: Option<PathBuf>,
    /// The raw jobdata stream (`jobdata` runs).
    pub jobdata: Option<String>,
    /// The task result object (`task_result` runs).
    pub task_result: Option<Value>,
    /// The event (`event` runs).
    pub event: Option<Event>,
    /// The REST request (`rest` runs).
    pub rest: Option<ApiRequest>,
    /// The external data file (galaxy module mappings).
    pub external_data_path: Option<PathBuf>,
    /// A variables file of explicit overrides.
    pub variables_path: Option<PathBuf>,
}

/// The top-level evaluation coordinator.
pub struct PolicyEvaluator {
    patterns: Vec<PolicyPattern>,
    root_dir: PathBuf,
    utility_library: PathBuf,
    engine: OpaEngine,
    // Keeps the default installation root alive for the evaluator's
    // lifetime; dropped (and removed) with it.
    _tmp_root: Option<tempfile::TempDir>,
}

impl PolicyEvaluator {
    /// Creates an evaluator from a config file: sources install under
    /// `root_dir` (a temporary directory when not given) and the `[policy]`
    /// patterns drive selection.
    pub fn from_config(
        config_path: &Path,
        root_dir: Option<PathBuf>,
        engine: OpaEngine,
        logger: &impl Logger,
    ) -> Result<PolicyEvaluator, Error> {
        let config = Config::load(config_path)?;
        Self::build(
            config.policy.patterns,
            config.source.sources,
            root_dir,
            engine,
            logger,
        )
    }

    /// Creates an evaluator for a bare policybook directory: a single
    /// enabled `path` source named `policy`.
    pub fn from_policy_dir(
        policy_dir: &Path,
        root_dir: Option<PathBuf>,
        engine: OpaEngine,
        logger: &impl Logger,
    ) -> Result<PolicyEvaluator, Error> {
        let patterns = vec![PolicyPattern {
            name: "policy".to_owned(),
            tags: None,
            enabled: true,
        }];
        let sources = vec![Source {
            name: "policy".to_owned(),
            location: policy_dir.display().to_string(),
            kind: SourceKind::Path,
        }];
        Self::build(patterns, sources, root_dir, engine, logger)
    }

    fn build(
        patterns: Vec<PolicyPattern>,
        sources: Vec<Source>,
        root_dir: Option<PathBuf>,
        engine: OpaEngine,
        logger: &impl Logger,
    ) -> Result<PolicyEvaluator, Error> {
        engine.validate_installation()?;

        let (root_dir, tmp_root) = match root_dir {
            Some(dir) => (dir, None),
            None => {
                let tmp = tempfile::tempdir().map_err(|e| Error::EvalError {
                    error: format!("failed to create an installation root: {e}"),
                })?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        for source in &sources {
            _ = source.install(&root_dir, false, logger)?;
        }
        let utility_library =
            gatecheck_compiler::install::write_utility_library(&root_dir)?;

        Ok(PolicyEvaluator {
            patterns,
            root_dir,
            utility_library,
            engine,
            _tmp_root: tmp_root,
        })
    }

    /// The compiled policies enabled by the selection patterns.
    #[must_use]
    pub fn enabled_policies(&self) -> Vec<PathBuf> {
        list_enabled_policies(&self.root_dir, &self.patterns)
    }

    /// The installation root.
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Runs one evaluation.
    pub fn run(
        &self,
        eval_type: EvalType,
        request: &EvalRequest,
        logger: &impl Logger,
    ) -> Result<EvaluationResult, Error> {
        let policy_files = self.enabled_policies();
        if policy_files.is_empty() {
            logger.warn("No policies are loaded!");
        }

        let variables = match &request.variables_path {
            Some(path) => Some(Variables::from_file(path)?),
            None => None,
        };

        // Jobdata payloads extract into a scoped temporary directory that
        // is removed when the run returns, on every exit path.
        let mut jobdata_workdir: Option<tempfile::TempDir> = None;
        let mut inputs = self.build_inputs(
            eval_type,
            request,
            variables.as_ref(),
            &mut jobdata_workdir,
        )?;

        if let Some(external_data_path) = &request.external_data_path {
            let galaxy = load_galaxy_data(external_data_path)?;
            process_inputs_with_external_data(&mut inputs, &galaxy);
        }

        let external_data = request.external_data_path.as_deref();
        let mut result = EvaluationResult::default();
        for (input_kind, inputs_per_kind) in &inputs {
            for input in inputs_per_kind {
                let (filepath, lines, metadata) =
                    self.locate_input(eval_type, input, request, logger);

                for policy_file in &policy_files {
                    let meta = PolicyMetadata::from_file(policy_file)?;
                    let decision = self.eval_single_policy(
                        &meta,
                        policy_file,
                        input_kind,
                        input,
                        external_data,
                        logger,
                    );
                    let (decision_value, message) = match decision {
                        Some((value, message)) => (Some(value), message),
                        None => (None, None),
                    };
                    result.add_single_result(
                        decision_value.as_ref(),
                        &meta.package,
                        meta.target.as_deref().unwrap_or_default(),
                        input.object_name(),
                        &filepath,
                        lines,
                        message,
                        metadata.clone(),
                    );
                }
            }
        }

        Ok(result)
    }

    fn build_inputs(
        &self,
        eval_type: EvalType,
        request: &EvalRequest,
        variables: Option<&Variables>,
        jobdata_workdir: &mut Option<tempfile::TempDir>,
    ) -> Result<PolicyInputSet, Error> {
        match eval_type {
            EvalType::Project => {
                let project_dir =
                    request.project_dir.as_ref().ok_or_else(|| Error::EvalError {
                        error: "a project evaluation requires a project directory".to_owned(),
                    })?;
                let scan_path = request
                    .scan_result_path
                    .clone()
                    .unwrap_or_else(|| project_dir.join(DEFAULT_SCAN_RESULT_FILE));
                let scan = ScanResult::from_file(scan_path)?;
                let runtime_data = RuntimeData::load(project_dir);
                Ok(inputs_from_scan_result(
                    &scan,
                    Some(&runtime_data),
                    variables,
                ))
            }
            EvalType::Jobdata => {
                let jobdata = request.jobdata.as_ref().ok_or_else(|| Error::EvalError {
                    error: "a jobdata evaluation requires the jobdata stream".to_owned(),
                })?;
                let workdir = tempfile::tempdir().map_err(|e| Error::EvalError {
                    error: format!("failed to create a jobdata work directory: {e}"),
                })?;
                prepare_project_dir_from_jobdata(jobdata, workdir.path())?;
                let scan_path = find_scan_result(workdir.path()).ok_or_else(|| {
                    Error::ScanError {
                        path: workdir.path().display().to_string(),
                        error: format!(
                            "the jobdata payload carries no {DEFAULT_SCAN_RESULT_FILE}"
                        ),
                    }
                })?;
                let scan = ScanResult::from_file(scan_path)?;
                let runtime_data = RuntimeData::load(workdir.path());
                let inputs = inputs_from_scan_result(&scan, Some(&runtime_data), variables);
                *jobdata_workdir = Some(workdir);
                Ok(inputs)
            }
            EvalType::TaskResult => {
                let task_result =
                    request.task_result.clone().ok_or_else(|| Error::EvalError {
                        error: "a task_result evaluation requires the task result object"
                            .to_owned(),
                    })?;
                let extra_vars = variables.map(|v| v.extra_vars.clone()).unwrap_or_default();
                Ok(inputs_from_task_result(task_result, extra_vars))
            }
            EvalType::Event => {
                let event = request.event.clone().ok_or_else(|| Error::EvalError {
                    error: "an event evaluation requires the event object".to_owned(),
                })?;
                Ok(inputs_from_event(event))
            }
            EvalType::Rest => {
                let rest = request.rest.clone().ok_or_else(|| Error::EvalError {
                    error: "a rest evaluation requires the request object".to_owned(),
                })?;
                Ok(inputs_from_rest(rest))
            }
        }
    }

    /// Resolves the display path, line block and metadata of one input.
    fn locate_input(
        &self,
        eval_type: EvalType,
        input: &PolicyInput,
        request: &EvalRequest,
        logger: &impl Logger,
    ) -> (String, Option<CodeBlock>, Map<String, Value>) {
        if let PolicyInput::Event { event } = input {
            let lines = event.line.map(|line| CodeBlock {
                begin: line,
                end: None,
            });
            let metadata = match serde_json::to_value(event) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            return (event.uuid.clone(), lines, metadata);
        }

        let filepath = input
            .object_filepath()
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| "__no_filepath__".to_owned());
        let display_path = match &request.project_dir {
            Some(project_dir) if !filepath.starts_with('/') => {
                project_dir.join(&filepath).display().to_string()
            }
            _ => filepath,
        };

        if eval_type == EvalType::Rest {
            return (display_path, None, Map::new());
        }

        let mut lines = None;
        match input {
            PolicyInput::Task { task, .. } => match fs::read_to_string(&display_path) {
                Ok(body) => lines = find_task_block(&body, task),
                Err(e) => logger.trace(&format!(
                    "cannot attribute lines for `{display_path}`: {e}"
                )),
            },
            PolicyInput::Play { play, .. } => match fs::read_to_string(&display_path) {
                Ok(body) => lines = find_play_block(&body, play),
                Err(e) => logger.trace(&format!(
                    "cannot attribute lines for `{display_path}`: {e}"
                )),
            },
            _ => {}
        }
        (display_path, lines, Map::new())
    }

    /// Evaluates one `(input, policy)` pair.
    ///
    /// Returns `None` when the policy's target type does not match the
    /// input kind ("not applicable"); otherwise the decision value and
    /// message. An engine failure is recorded as an applicable decision
    /// with no value and the error as its message.
    fn eval_single_policy(
        &self,
        meta: &PolicyMetadata,
        policy_file: &Path,
        input_kind: &str,
        input: &PolicyInput,
        external_data: Option<&Path>,
        logger: &impl Logger,
    ) -> Option<(Value, Option<String>)> {
        // `task_result` policies are written against `task` inputs.
        let target_kind = if input_kind == INPUT_TYPE_TASK_RESULT {
            INPUT_TYPE_TASK
        } else {
            input_kind
        };
        let target_pattern = meta.target.as_deref().unwrap_or_default();
        if !match_str_expression(target_pattern, target_kind) {
            return None;
        }

        if input_kind == INPUT_TYPE_TASK {
            if let (Some(module_pattern), PolicyInput::Task { task, .. }) =
                (&meta.target_module, input)
            {
                if !match_str_expression(module_pattern, &task.module_fqcn) {
                    // Applicable input kind, but the module is not governed
                    // by this policy.
                    return Some((Value::Object(Map::new()), None));
                }
            }
        }

        let input_json = match input.to_json() {
            Ok(json) => json,
            Err(e) => {
                logger.error(&format!("failed to serialize input: {e}"));
                return Some((Value::Object(Map::new()), Some(e.to_string())));
            }
        };

        match self.engine.eval_policy(
            &self.utility_library,
            policy_file,
            external_data,
            &meta.package,
            &input_json,
        ) {
            Ok(output) => {
                let message = if output.message.is_empty() {
                    None
                } else {
                    Some(output.message)
                };
                Some((output.value, message))
            }
            Err(e) => {
                logger.error(&format!(
                    "engine failure on `{}`: {e}",
                    policy_file.display()
                ));
                Some((Value::Object(Map::new()), Some(e.to_string())))
            }
        }
    }
}

fn find_scan_result(workdir: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = walkdir::WalkDir::new(workdir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name() == DEFAULT_SCAN_RESULT_FILE)
        .map(|entry| entry.path().to_path_buf())
        .collect();
    found.sort();
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Play, Playbook, Task};
    use gatecheck_common::in_memory;
    use serde_json::json;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    const POLICYBOOK: &str = r#"
- name: Package policy
  hosts: all
  vars:
    allowed_packages:
      - mysql
  policies:
    - name: Check for banned packages
      target: task
      condition: input["ansible.builtin.package"].name not in allowed_packages
      action:
        deny:
          msg: The package {{ input["ansible.builtin.package"].name }} is not allowed
"#;

    /// A stand-in engine binary: always reports `deny: true`.
    fn write_stub_engine(dir: &Path) -> PathBuf {
        let path = dir.join("stub-opa");
        let script = "#!/bin/sh\n\
            if [ \"$1\" = \"version\" ]; then echo stub; exit 0; fi\n\
            cat > /dev/null\n\
            echo '{\"result\":[{\"expressions\":[{\"value\":{\"deny\":true,\"p_0_1\":true}}]}]}'\n\
            echo 'The package nginx is not allowed' >&2\n";
        let mut file = fs::File::create(&path).expect("create stub");
        file.write_all(script.as_bytes()).expect("write stub");
        let mut perms = file.metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    fn write_project(dir: &Path) {
        let playbook_body = "- name: web\n  hosts: all\n  tasks:\n    - name: Install nginx\n      ansible.builtin.package:\n        name: nginx\n        state: present\n";
        fs::write(dir.join("site.yml"), playbook_body).expect("write playbook");

        let task = Task {
            r#type: "task".to_owned(),
            name: "Install nginx".to_owned(),
            module: "ansible.builtin.package".to_owned(),
            module_fqcn: "ansible.builtin.package".to_owned(),
            filepath: "site.yml".to_owned(),
            module_options: json!({ "name": "nginx", "state": "present" }),
            yaml_lines: "- name: Install nginx\n  ansible.builtin.package:\n    name: nginx\n    state: present\n".to_owned(),
            ..Task::default()
        };
        let scan = ScanResult {
            playbooks: vec![Playbook {
                r#type: "playbook".to_owned(),
                name: "site".to_owned(),
                filepath: "site.yml".to_owned(),
                tasks: vec![task],
                plays: vec![Play {
                    r#type: "play".to_owned(),
                    name: "web".to_owned(),
                    filepath: "site.yml".to_owned(),
                    ..Play::default()
                }],
                ..Playbook::default()
            }],
            ..ScanResult::default()
        };
        let scan_json = serde_json::to_string(&scan).expect("serialize scan");
        fs::write(dir.join(DEFAULT_SCAN_RESULT_FILE), scan_json).expect("write scan");
    }

    #[test]
    fn test_project_run_with_stub_engine() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let policy_dir = workdir.path().join("policybooks/policies");
        fs::create_dir_all(&policy_dir).expect("create dirs");
        fs::write(policy_dir.join("book.yml"), POLICYBOOK).expect("write policybook");

        let project_dir = workdir.path().join("project");
        fs::create_dir_all(&project_dir).expect("create dirs");
        write_project(&project_dir);

        let stub = write_stub_engine(workdir.path());
        let engine = OpaEngine::with_executable(stub.display().to_string());
        let logger = in_memory::Logger::new(0);

        let evaluator = PolicyEvaluator::from_policy_dir(
            &workdir.path().join("policybooks"),
            Some(workdir.path().join("installed")),
            engine,
            &logger,
        )
        .expect("build evaluator");

        assert_eq!(evaluator.enabled_policies().len(), 1);

        let request = EvalRequest {
            project_dir: Some(project_dir.clone()),
            ..EvalRequest::default()
        };
        let result = evaluator
            .run(EvalType::Project, &request, &logger)
            .expect("run");

        // The task input hit the deny policy; play/role/project inputs were
        // "not applicable" for this task-targeted policy.
        assert!(result.has_violation());
        let violating_file = result
            .files
            .iter()
            .find(|f| f.violation)
            .expect("violating file");
        assert!(violating_file.path.ends_with("site.yml"));
        let policy = &violating_file.policies[0];
        assert_eq!(policy.policy_name, "Check_for_banned_packages");
        let target = &policy.targets[0];
        assert_eq!(target.validated, Some(false));
        assert_eq!(target.name.as_deref(), Some("Install nginx"));
        assert!(target
            .message
            .as_deref()
            .expect("message")
            .contains("nginx"));
        // Line attribution found the task inside the playbook body.
        let lines = target.lines.expect("lines");
        assert_eq!(lines.begin, 4);
    }

    #[test]
    fn test_missing_project_dir_is_an_error() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let policy_dir = workdir.path().join("policybooks/policies");
        fs::create_dir_all(&policy_dir).expect("create dirs");
        fs::write(policy_dir.join("book.yml"), POLICYBOOK).expect("write policybook");

        let stub = write_stub_engine(workdir.path());
        let engine = OpaEngine::with_executable(stub.display().to_string());
        let logger = in_memory::Logger::new(0);
        let evaluator = PolicyEvaluator::from_policy_dir(
            &workdir.path().join("policybooks"),
            Some(workdir.path().join("installed")),
            engine,
            &logger,
        )
        .expect("build evaluator");

        let result = evaluator.run(EvalType::Project, &EvalRequest::default(), &logger);
        assert!(matches!(result, Err(Error::EvalError { .. })));
    }
}
